//! Error taxonomy shared across the intake crates.

use thiserror::Error;

/// Failures of the durable session store or slot ledger.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend: {0}")]
    Backend(#[from] sled::Error),
    #[error("corrupt record under '{key}': {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Outcome of a rejected or failed reservation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReservationError {
    /// The slot already holds `capacity` bookings. No writes were applied.
    #[error("slot is full")]
    SlotFull,
    /// The request names a department or time the configuration does not offer.
    #[error("invalid reservation request: {0}")]
    InvalidRequest(String),
    /// Storage failed; the caller may retry by restarting the flow.
    #[error("reservation backend failure: {0}")]
    Backend(String),
}

/// Failures surfaced from the dialogue engine to its host.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("session store: {0}")]
    Sessions(#[from] StoreError),
}

/// Outbound delivery failure. The engine never observes these; hosts log them.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport not configured")]
    NotConfigured,
    #[error("transport request failed: {0}")]
    Request(String),
    #[error("transport rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },
}
