//! Slot ledger: reservation counters, the booking sequence, and booking records.
//!
//! | Tree       | Key                              | Value                         |
//! |------------|----------------------------------|-------------------------------|
//! | `sessions` | conversation id                  | JSON `ConversationState`      |
//! | `slots`    | `{department}/{date}/{HH:MM}`    | JSON slot entry (count)       |
//! | `counters` | `sequence/booking`               | big-endian `u64`              |
//! | `bookings` | booking id (`P1001`)             | JSON `BookingRecord`          |

mod store;

pub use store::{IntakeStore, StoreStatus};

use crate::error::StoreError;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Male => "Male",
            Self::Female => "Female",
            Self::Other => "Other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "male" | "m" | "g_male" => Some(Self::Male),
            "female" | "f" | "g_female" => Some(Self::Female),
            "other" | "o" | "g_other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// Composite identity of a capacity-bounded slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotKey {
    pub department: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

impl SlotKey {
    pub fn new(department: impl Into<String>, date: NaiveDate, time: NaiveTime) -> Self {
        Self {
            department: department.into(),
            date,
            time,
        }
    }

    pub fn storage_key(&self) -> String {
        format!(
            "{}/{}/{}",
            self.department,
            self.date.format("%Y-%m-%d"),
            self.time.format("%H:%M")
        )
    }
}

/// Reservation count of one slot alongside its configured capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRecord {
    pub key: SlotKey,
    pub reserved_count: u32,
    pub capacity: u32,
}

impl SlotRecord {
    pub fn is_full(&self) -> bool {
        self.reserved_count >= self.capacity
    }
}

/// Everything the reservation service needs to book one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRequest {
    pub first_name: String,
    pub last_name: String,
    pub gender: Gender,
    pub address: String,
    /// Empty when the user skipped it.
    #[serde(default)]
    pub email: String,
    pub phone: String,
    pub department: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

impl ReservationRequest {
    pub fn slot_key(&self) -> SlotKey {
        SlotKey::new(self.department.clone(), self.date, self.time)
    }
}

/// Immutable result of a successful reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRecord {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub gender: Gender,
    pub address: String,
    pub email: String,
    pub phone: String,
    pub department: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub created_at: DateTime<Utc>,
}

impl BookingRecord {
    pub fn from_request(id: String, req: &ReservationRequest, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            first_name: req.first_name.clone(),
            last_name: req.last_name.clone(),
            gender: req.gender,
            address: req.address.clone(),
            email: req.email.clone(),
            phone: req.phone.clone(),
            department: req.department.clone(),
            date: req.date,
            time: req.time,
            created_at,
        }
    }

    pub fn slot_key(&self) -> SlotKey {
        SlotKey::new(self.department.clone(), self.date, self.time)
    }
}

/// Why an atomic ledger unit did not commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnFailure {
    /// The store saw a concurrent write; the whole unit is re-run by the store.
    Conflict,
    /// Abort without writes: the slot is at capacity.
    SlotFull,
    Backend(String),
}

/// Operations available inside one atomic ledger unit.
pub trait LedgerTxn {
    fn reserved_count(&self, key: &SlotKey) -> Result<u32, TxnFailure>;
    fn set_reserved_count(&self, key: &SlotKey, count: u32) -> Result<(), TxnFailure>;
    /// Increments and returns the booking sequence. An absent counter starts from `start`.
    fn next_sequence(&self, start: u64) -> Result<u64, TxnFailure>;
    fn put_booking(&self, record: &BookingRecord) -> Result<(), TxnFailure>;
}

/// Body of an atomic unit. May run more than once; only the committed run's effects are visible.
pub type TxnBody<'a> = dyn Fn(&dyn LedgerTxn) -> Result<BookingRecord, TxnFailure> + 'a;

/// Durable counters and records. Mutation only happens through [`SlotLedger::with_atomic_transaction`].
pub trait SlotLedger: Send + Sync {
    /// Runs `body` as one isolated unit: all writes commit together or not at all.
    /// Conflicts are retried internally and never returned.
    fn with_atomic_transaction(&self, body: &TxnBody<'_>) -> Result<BookingRecord, TxnFailure>;

    /// Committed reservation count of a slot (0 if never booked).
    fn reserved_count(&self, key: &SlotKey) -> Result<u32, StoreError>;

    fn find_booking(&self, id: &str) -> Result<Option<BookingRecord>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_key_format() {
        let key = SlotKey::new(
            "Cardiology",
            NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        );
        assert_eq!(key.storage_key(), "Cardiology/2026-10-19/09:00");
    }

    #[test]
    fn gender_accepts_ids_and_words() {
        assert_eq!(Gender::parse("g_female"), Some(Gender::Female));
        assert_eq!(Gender::parse("MALE"), Some(Gender::Male));
        assert_eq!(Gender::parse("unknown"), None);
    }

    #[test]
    fn ledger_is_object_safe() {
        fn _accepts_dyn(_l: &dyn SlotLedger) {}
    }
}
