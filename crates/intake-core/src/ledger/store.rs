//! Sled-backed store: one tree each for sessions, slot counters, sequence counters and bookings.
//!
//! Reservations run as a sled multi-tree transaction over `slots`, `counters` and
//! `bookings`. sled re-runs the closure on conflict, so a unit either commits all of
//! its writes or none of them.

use super::{BookingRecord, LedgerTxn, SlotKey, SlotLedger, TxnBody, TxnFailure};
use crate::dialogue::ConversationState;
use crate::error::StoreError;
use crate::session::SessionStore;
use serde::{Deserialize, Serialize};
use sled::transaction::{
    ConflictableTransactionError, TransactionError, TransactionalTree, UnabortableTransactionError,
};
use sled::{Db, Transactional, Tree};
use std::path::Path;


const SESSIONS_TREE: &str = "sessions";
const SLOTS_TREE: &str = "slots";
const COUNTERS_TREE: &str = "counters";
const BOOKINGS_TREE: &str = "bookings";

const BOOKING_SEQUENCE_KEY: &str = "sequence/booking";

/// Persisted slot counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SlotEntry {
    department: String,
    date: String,
    time: String,
    count: u32,
}

impl SlotEntry {
    fn for_key(key: &SlotKey, count: u32) -> Self {
        Self {
            department: key.department.clone(),
            date: key.date.format("%Y-%m-%d").to_string(),
            time: key.time.format("%H:%M").to_string(),
            count,
        }
    }
}

/// Session store and slot ledger over a single sled database.
pub struct IntakeStore {
    db: Db,
    sessions: Tree,
    slots: Tree,
    counters: Tree,
    bookings: Tree,
}

impl IntakeStore {
    /// Opens or creates the store at the given path.
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::from_db(sled::open(path)?)
    }

    /// In-memory store that disappears on drop.
    pub fn temporary() -> Result<Self, StoreError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self, StoreError> {
        Ok(Self {
            sessions: db.open_tree(SESSIONS_TREE)?,
            slots: db.open_tree(SLOTS_TREE)?,
            counters: db.open_tree(COUNTERS_TREE)?,
            bookings: db.open_tree(BOOKINGS_TREE)?,
            db,
        })
    }

    /// Last issued booking sequence number, if any.
    pub fn current_sequence(&self) -> Result<Option<u64>, StoreError> {
        Ok(self
            .counters
            .get(BOOKING_SEQUENCE_KEY)?
            .and_then(|v| decode_u64(&v)))
    }

    /// All bookings, ordered by id.
    pub fn scan_bookings(&self) -> Result<Vec<BookingRecord>, StoreError> {
        let mut out = Vec::new();
        for item in self.bookings.iter() {
            let (k, v) = item?;
            let key = String::from_utf8_lossy(&k).to_string();
            out.push(decode(&key, &v)?);
        }
        Ok(out)
    }

    /// Entry counts per tree for health reporting.
    pub fn status(&self) -> StoreStatus {
        StoreStatus {
            sessions: self.sessions.len(),
            slots: self.slots.len(),
            bookings: self.bookings.len(),
            size_on_disk: self.db.size_on_disk().ok(),
        }
    }

    /// Writes dirty buffers to disk; called on shutdown.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

/// Tree sizes of an [`IntakeStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStatus {
    pub sessions: usize,
    pub slots: usize,
    pub bookings: usize,
    pub size_on_disk: Option<u64>,
}

fn decode<T: for<'de> Deserialize<'de>>(key: &str, bytes: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(bytes).map_err(|source| StoreError::Corrupt {
        key: key.to_string(),
        source,
    })
}

fn decode_u64(bytes: &[u8]) -> Option<u64> {
    let arr: [u8; 8] = bytes.try_into().ok()?;
    Some(u64::from_be_bytes(arr))
}

impl SessionStore for IntakeStore {
    fn get(&self, id: &str) -> Result<Option<ConversationState>, StoreError> {
        match self.sessions.get(id.as_bytes())? {
            Some(bytes) => decode(id, &bytes).map(Some),
            None => Ok(None),
        }
    }

    fn put(&self, id: &str, state: &ConversationState) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(state).map_err(StoreError::Encode)?;
        let prev = self.sessions.insert(id.as_bytes(), bytes)?;
        tracing::debug!(
            target: "intake::store",
            conversation = id,
            step = ?state.step,
            action = if prev.is_some() { "UPDATE" } else { "INSERT" },
            "session saved"
        );
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        if self.sessions.remove(id.as_bytes())?.is_some() {
            tracing::debug!(target: "intake::store", conversation = id, action = "REMOVE", "session cleared");
        }
        Ok(())
    }
}

/// Transactional view handed to reservation bodies.
struct SledTxn<'a> {
    slots: &'a TransactionalTree,
    counters: &'a TransactionalTree,
    bookings: &'a TransactionalTree,
}

fn txn_failure(e: UnabortableTransactionError) -> TxnFailure {
    match e {
        UnabortableTransactionError::Conflict => TxnFailure::Conflict,
        UnabortableTransactionError::Storage(e) => TxnFailure::Backend(e.to_string()),
    }
}

impl LedgerTxn for SledTxn<'_> {
    fn reserved_count(&self, key: &SlotKey) -> Result<u32, TxnFailure> {
        let storage_key = key.storage_key();
        match self.slots.get(storage_key.as_bytes()).map_err(txn_failure)? {
            Some(bytes) => decode::<SlotEntry>(&storage_key, &bytes)
                .map(|e| e.count)
                .map_err(|e| TxnFailure::Backend(e.to_string())),
            None => Ok(0),
        }
    }

    fn set_reserved_count(&self, key: &SlotKey, count: u32) -> Result<(), TxnFailure> {
        let bytes = serde_json::to_vec(&SlotEntry::for_key(key, count))
            .map_err(|e| TxnFailure::Backend(e.to_string()))?;
        self.slots
            .insert(key.storage_key().as_bytes(), bytes)
            .map_err(txn_failure)?;
        Ok(())
    }

    fn next_sequence(&self, start: u64) -> Result<u64, TxnFailure> {
        let current = self
            .counters
            .get(BOOKING_SEQUENCE_KEY)
            .map_err(txn_failure)?
            .and_then(|v| decode_u64(&v))
            .unwrap_or(start);
        let next = current
            .checked_add(1)
            .ok_or_else(|| TxnFailure::Backend("booking sequence exhausted".to_string()))?;
        self.counters
            .insert(BOOKING_SEQUENCE_KEY, next.to_be_bytes().to_vec())
            .map_err(txn_failure)?;
        Ok(next)
    }

    fn put_booking(&self, record: &BookingRecord) -> Result<(), TxnFailure> {
        let bytes = serde_json::to_vec(record).map_err(|e| TxnFailure::Backend(e.to_string()))?;
        self.bookings
            .insert(record.id.as_bytes(), bytes)
            .map_err(txn_failure)?;
        Ok(())
    }
}

impl SlotLedger for IntakeStore {
    fn with_atomic_transaction(&self, body: &TxnBody<'_>) -> Result<BookingRecord, TxnFailure> {
        let result = (&self.slots, &self.counters, &self.bookings).transaction(
            |(slots, counters, bookings)| {
                let view = SledTxn {
                    slots,
                    counters,
                    bookings,
                };
                body(&view).map_err(|failure| match failure {
                    TxnFailure::Conflict => ConflictableTransactionError::Conflict,
                    other => ConflictableTransactionError::Abort(other),
                })
            },
        );
        match result {
            Ok(record) => {
                tracing::info!(
                    target: "intake::store",
                    booking = %record.id,
                    slot = %record.slot_key().storage_key(),
                    action = "COMMIT",
                    "ledger unit committed"
                );
                Ok(record)
            }
            Err(TransactionError::Abort(failure)) => Err(failure),
            Err(TransactionError::Storage(e)) => Err(TxnFailure::Backend(e.to_string())),
        }
    }

    fn reserved_count(&self, key: &SlotKey) -> Result<u32, StoreError> {
        let storage_key = key.storage_key();
        match self.slots.get(storage_key.as_bytes())? {
            Some(bytes) => decode::<SlotEntry>(&storage_key, &bytes).map(|e| e.count),
            None => Ok(0),
        }
    }

    fn find_booking(&self, id: &str) -> Result<Option<BookingRecord>, StoreError> {
        match self.bookings.get(id.as_bytes())? {
            Some(bytes) => decode(id, &bytes).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialogue::Step;
    use crate::ledger::Gender;
    use chrono::{NaiveDate, NaiveTime, Utc};

    fn key() -> SlotKey {
        SlotKey::new(
            "Neurology",
            NaiveDate::from_ymd_opt(2026, 11, 2).unwrap(),
            NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
        )
    }

    fn record(id: &str) -> BookingRecord {
        BookingRecord {
            id: id.to_string(),
            first_name: "Asha".into(),
            last_name: "Rao".into(),
            gender: Gender::Female,
            address: "12 MG Road".into(),
            email: String::new(),
            phone: "+919876543210".into(),
            department: "Neurology".into(),
            date: key().date,
            time: key().time,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn sessions_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = IntakeStore::open_path(dir.path()).unwrap();
        let state = ConversationState::new("919800000001", Step::Gender, Utc::now());
        assert!(store.get("919800000001").unwrap().is_none());
        store.put("919800000001", &state).unwrap();
        assert_eq!(store.get("919800000001").unwrap(), Some(state));
        store.delete("919800000001").unwrap();
        assert!(store.get("919800000001").unwrap().is_none());
        store.delete("919800000001").unwrap();
        store.flush().unwrap();
    }

    #[test]
    fn committed_unit_applies_all_writes() {
        let store = IntakeStore::temporary().unwrap();
        let out = store
            .with_atomic_transaction(&|txn: &dyn LedgerTxn| {
                let n = txn.next_sequence(1000)?;
                let rec = record(&format!("P{}", n));
                txn.put_booking(&rec)?;
                let c = txn.reserved_count(&key())?;
                txn.set_reserved_count(&key(), c + 1)?;
                Ok(rec)
            })
            .unwrap();
        assert_eq!(out.id, "P1001");
        assert_eq!(store.current_sequence().unwrap(), Some(1001));
        assert_eq!(SlotLedger::reserved_count(&store, &key()).unwrap(), 1);
        assert_eq!(store.find_booking("P1001").unwrap().unwrap().first_name, "Asha");
        assert_eq!(store.scan_bookings().unwrap().len(), 1);
    }

    #[test]
    fn aborted_unit_applies_nothing() {
        let store = IntakeStore::temporary().unwrap();
        let err = store
            .with_atomic_transaction(&|txn: &dyn LedgerTxn| {
                let n = txn.next_sequence(1000)?;
                txn.put_booking(&record(&format!("P{}", n)))?;
                txn.set_reserved_count(&key(), 1)?;
                Err(TxnFailure::SlotFull)
            })
            .unwrap_err();
        assert_eq!(err, TxnFailure::SlotFull);
        assert_eq!(store.current_sequence().unwrap(), None);
        assert_eq!(SlotLedger::reserved_count(&store, &key()).unwrap(), 0);
        assert!(store.find_booking("P1001").unwrap().is_none());
    }

    #[test]
    fn corrupt_session_is_reported() {
        let store = IntakeStore::temporary().unwrap();
        store.sessions.insert("x", b"not json".to_vec()).unwrap();
        assert!(matches!(store.get("x"), Err(StoreError::Corrupt { .. })));
    }
}
