//! Dialogue engine: drives one conversation step per inbound message.
//!
//! Each call runs normalize → lock → load (expiry applied) → transition → effect → save,
//! and returns the replies for the host to deliver.

mod collaborators;
pub mod prompts;
mod state;
pub mod transition;

pub use collaborators::{
    Choice, DocumentRenderer, MessageTransport, Outbound, SupportDesk, MAX_BUTTONS, MAX_LIST_ROWS,
};
pub use state::{ConversationState, IntakeFields, Step};
pub use transition::{Effect, Outcome, StepContext, Transition};

use crate::error::{EngineError, StoreError};
use crate::ledger::{BookingRecord, SlotLedger};
use crate::normalize::{self, NormalizedInput, PhoneRules};
use crate::reservation::ReservationService;
use crate::session::{ConversationLocks, SessionPolicy, SessionStore};
use crate::shared::{CoreConfig, Departments};
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub struct DialogueEngine {
    app_name: String,
    departments: Arc<Departments>,
    phone_rules: PhoneRules,
    policy: SessionPolicy,
    sessions: Arc<dyn SessionStore>,
    ledger: Arc<dyn SlotLedger>,
    reservations: ReservationService,
    support: Arc<dyn SupportDesk>,
    documents: Arc<dyn DocumentRenderer>,
    locks: ConversationLocks,
}

impl DialogueEngine {
    /// Validates the department table once; the engine and its reservation service share it.
    pub fn new(
        config: &CoreConfig,
        sessions: Arc<dyn SessionStore>,
        ledger: Arc<dyn SlotLedger>,
        support: Arc<dyn SupportDesk>,
        documents: Arc<dyn DocumentRenderer>,
    ) -> Result<Self, config::ConfigError> {
        let departments = Arc::new(config.departments()?);
        let reservations = ReservationService::new(
            Arc::clone(&ledger),
            Arc::clone(&departments),
            config.record_prefix.clone(),
            config.sequence_start,
        );
        Ok(Self {
            app_name: config.app_name.clone(),
            departments,
            phone_rules: PhoneRules {
                country_code: config.country_code.clone(),
                local_digits: config.local_phone_digits,
            },
            policy: SessionPolicy::new(config.session_timeout()),
            sessions,
            ledger,
            reservations,
            support,
            documents,
            locks: ConversationLocks::new(),
        })
    }

    pub fn departments(&self) -> &Departments {
        &self.departments
    }

    pub fn reservations(&self) -> &ReservationService {
        &self.reservations
    }

    /// Looks a booking up by user-typed id (`1042` and `p1042` both find `P1042`).
    pub fn find_booking(&self, raw_id: &str) -> Result<Option<BookingRecord>, StoreError> {
        self.ledger
            .find_booking(&normalize::normalize_record_id(raw_id, self.reservations.record_prefix()))
    }

    /// Conversations currently being processed.
    pub fn in_flight(&self) -> usize {
        self.locks.active()
    }

    /// Handles one raw message object (`messages[i]` of a webhook delivery).
    pub async fn handle(
        &self,
        conversation_id: &str,
        message: &serde_json::Value,
    ) -> Result<Vec<Outbound>, EngineError> {
        let input = normalize::normalize(message);
        self.handle_at(conversation_id, &input, Utc::now()).await
    }

    /// Handles one normalized input as of `now`.
    pub async fn handle_at(
        &self,
        conversation_id: &str,
        input: &NormalizedInput,
        now: DateTime<Utc>,
    ) -> Result<Vec<Outbound>, EngineError> {
        let _guard = self.locks.acquire(conversation_id).await;

        let current = match self.sessions.get(conversation_id)? {
            Some(state) if self.policy.is_expired(&state, now) => {
                tracing::info!(
                    target: "intake::dialogue",
                    conversation = %conversation_id,
                    step = ?state.step,
                    "session expired"
                );
                self.sessions.delete(conversation_id)?;
                None
            }
            other => other,
        };
        let state = current.unwrap_or_else(|| ConversationState::uninitialized(conversation_id, now));
        let from = state.step;

        let ctx = StepContext {
            app_name: &self.app_name,
            departments: &self.departments,
            ledger: self.ledger.as_ref(),
            phone_rules: &self.phone_rules,
            record_prefix: self.reservations.record_prefix(),
            now,
            today: now.date_naive(),
        };

        let transition = if input.is_reset() {
            transition::reset(conversation_id, &ctx)
        } else {
            match transition::step(state, input, &ctx) {
                Outcome::Done(t) => t,
                Outcome::Effect(effect) => self.run_effect(effect, &ctx).await,
            }
        };

        match &transition.next {
            Some(next) => {
                debug_assert!(next.is_consistent(), "uninitialized state with fields: {:?}", next);
                self.sessions.put(conversation_id, next)?
            }
            None => self.sessions.delete(conversation_id)?,
        }
        tracing::debug!(
            target: "intake::dialogue",
            conversation = %conversation_id,
            from = ?from,
            to = ?transition.next.as_ref().map(|s| s.step),
            replies = transition.replies.len(),
            "transition"
        );
        Ok(transition.replies)
    }

    async fn run_effect(&self, effect: Effect, ctx: &StepContext<'_>) -> Transition {
        match effect {
            Effect::Reserve { request, pending } => {
                let result = self.reservations.reserve(&request, ctx.now);
                if let Err(e) = &result {
                    tracing::warn!(
                        target: "intake::dialogue",
                        conversation = %pending.conversation_id,
                        error = %e,
                        "reservation not completed"
                    );
                }
                transition::after_reservation(pending, result, ctx)
            }
            Effect::LookupRecord { id } => {
                let result = self.ledger.find_booking(&id);
                let url = match &result {
                    Ok(Some(record)) => self.documents.document_url_for(&record.id),
                    Ok(None) => None,
                    Err(e) => {
                        tracing::error!(target: "intake::dialogue", record = %id, error = %e, "record lookup failed");
                        None
                    }
                };
                transition::after_lookup(&id, result, url)
            }
            Effect::AskSupport { question, pending } => {
                let answer = self.support.answer(&question).await;
                transition::after_support(pending, answer)
            }
        }
    }
}
