//! intake-core: conversational intake flow (registration, slot booking, report lookup, support).
//!
//! The dialogue engine tracks each conversation across stateless deliveries; the reservation
//! service books capacity-bounded slots and mints sequential booking ids atomically.

mod dialogue;
mod error;
mod ledger;
mod normalize;
mod reservation;
mod session;
mod shared;

// Configuration
pub use shared::{CoreConfig, Department, DepartmentConfig, Departments};

// Errors
pub use error::{EngineError, ReservationError, StoreError, TransportError};

// Dialogue
pub use dialogue::{
    prompts, transition, Choice, ConversationState, DialogueEngine, DocumentRenderer, Effect,
    IntakeFields, MessageTransport, Outbound, Outcome, Step, StepContext, SupportDesk, Transition,
    MAX_BUTTONS, MAX_LIST_ROWS,
};

// Ledger and reservations
pub use ledger::{
    BookingRecord, Gender, IntakeStore, LedgerTxn, ReservationRequest, SlotKey, SlotLedger,
    SlotRecord, StoreStatus, TxnBody, TxnFailure,
};
pub use reservation::ReservationService;

// Sessions
pub use session::{ConversationGuard, ConversationLocks, SessionPolicy, SessionStore};

// Input normalization
pub use normalize::{
    conversation_id, extract_inbound, is_email, normalize, normalize_record_id, parse_date,
    title_case, InboundMessage, NormalizedInput, PhoneRules, RESET_TOKENS,
};
