//! Reservation service: capacity check, id minting and booking write in one atomic unit.

use crate::error::ReservationError;
use crate::ledger::{BookingRecord, LedgerTxn, ReservationRequest, SlotLedger, SlotRecord, TxnFailure};
use crate::shared::Departments;
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;

/// Sole mutator of slot counters and the booking sequence.
#[derive(Clone)]
pub struct ReservationService {
    ledger: Arc<dyn SlotLedger>,
    departments: Arc<Departments>,
    record_prefix: String,
    sequence_start: u64,
}

impl ReservationService {
    pub fn new(
        ledger: Arc<dyn SlotLedger>,
        departments: Arc<Departments>,
        record_prefix: impl Into<String>,
        sequence_start: u64,
    ) -> Self {
        Self {
            ledger,
            departments,
            record_prefix: record_prefix.into(),
            sequence_start,
        }
    }

    pub fn record_prefix(&self) -> &str {
        &self.record_prefix
    }

    /// Books one seat in the request's slot.
    ///
    /// Reads the slot count, rejects with [`ReservationError::SlotFull`] at capacity, else
    /// increments the sequence, writes the booking and bumps the count. The four effects
    /// commit together. Not idempotent: a retried request books again.
    pub fn reserve(
        &self,
        request: &ReservationRequest,
        now: DateTime<Utc>,
    ) -> Result<BookingRecord, ReservationError> {
        let department = self.departments.get(&request.department).ok_or_else(|| {
            ReservationError::InvalidRequest(format!("unknown department '{}'", request.department))
        })?;
        if !department.offers(request.time) {
            return Err(ReservationError::InvalidRequest(format!(
                "{} does not offer {}",
                department.name,
                request.time.format("%H:%M")
            )));
        }

        let mut canonical = request.clone();
        canonical.department = department.name.clone();
        let key = canonical.slot_key();
        let capacity = department.capacity;
        let prefix = self.record_prefix.as_str();
        let start = self.sequence_start;

        let body = |txn: &dyn LedgerTxn| -> Result<BookingRecord, TxnFailure> {
            let count = txn.reserved_count(&key)?;
            if count >= capacity {
                return Err(TxnFailure::SlotFull);
            }
            let n = txn.next_sequence(start)?;
            let record = BookingRecord::from_request(format!("{}{}", prefix, n), &canonical, now);
            txn.put_booking(&record)?;
            txn.set_reserved_count(&key, count + 1)?;
            Ok(record)
        };

        match self.ledger.with_atomic_transaction(&body) {
            Ok(record) => {
                tracing::info!(
                    target: "intake::reservation",
                    booking = %record.id,
                    slot = %key.storage_key(),
                    capacity,
                    "reservation committed"
                );
                Ok(record)
            }
            Err(TxnFailure::SlotFull) => {
                tracing::info!(
                    target: "intake::reservation",
                    slot = %key.storage_key(),
                    capacity,
                    "reservation rejected: slot full"
                );
                Err(ReservationError::SlotFull)
            }
            Err(TxnFailure::Backend(cause)) => {
                tracing::error!(target: "intake::reservation", slot = %key.storage_key(), %cause, "reservation failed");
                Err(ReservationError::Backend(cause))
            }
            Err(TxnFailure::Conflict) => {
                tracing::error!(target: "intake::reservation", slot = %key.storage_key(), "conflict escaped ledger retry");
                Err(ReservationError::Backend("transaction conflict".to_string()))
            }
        }
    }

    /// Committed counts for every time point a department offers on `date`.
    pub fn availability(
        &self,
        department: &str,
        date: NaiveDate,
    ) -> Result<Vec<SlotRecord>, ReservationError> {
        let department = self.departments.get(department).ok_or_else(|| {
            ReservationError::InvalidRequest(format!("unknown department '{}'", department))
        })?;
        department
            .time_points()
            .into_iter()
            .map(|time| {
                let key = crate::ledger::SlotKey::new(department.name.clone(), date, time);
                let reserved_count = self
                    .ledger
                    .reserved_count(&key)
                    .map_err(|e| ReservationError::Backend(e.to_string()))?;
                Ok(SlotRecord {
                    key,
                    reserved_count,
                    capacity: department.capacity,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::ledger::{Gender, IntakeStore, SlotKey};
    use crate::shared::DepartmentConfig;
    use chrono::NaiveTime;
    use std::collections::HashSet;

    fn departments(capacity: u32) -> Arc<Departments> {
        Arc::new(
            Departments::from_config(&[DepartmentConfig {
                name: "Cardiology".into(),
                opens: "09:00".into(),
                closes: "12:00".into(),
                capacity,
                slot_minutes: 60,
            }])
            .unwrap(),
        )
    }

    fn request(time_h: u32) -> ReservationRequest {
        ReservationRequest {
            first_name: "Asha".into(),
            last_name: "Rao".into(),
            gender: Gender::Female,
            address: "12 MG Road".into(),
            email: "asha@example.com".into(),
            phone: "+919876543210".into(),
            department: "cardiology".into(),
            date: NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
            time: NaiveTime::from_hms_opt(time_h, 0, 0).unwrap(),
        }
    }

    #[test]
    fn mints_sequential_ids_and_counts() {
        let store = Arc::new(IntakeStore::temporary().unwrap());
        let svc = ReservationService::new(store.clone(), departments(5), "P", 1000);
        let a = svc.reserve(&request(9), Utc::now()).unwrap();
        let b = svc.reserve(&request(9), Utc::now()).unwrap();
        assert_eq!(a.id, "P1001");
        assert_eq!(b.id, "P1002");
        assert_eq!(a.department, "Cardiology");
        let slots = svc.availability("Cardiology", request(9).date).unwrap();
        assert_eq!(slots.len(), 4);
        assert_eq!(slots[0].reserved_count, 2);
        assert_eq!(slots[1].reserved_count, 0);
    }

    #[test]
    fn full_slot_rejects_without_consuming_sequence() {
        let store = Arc::new(IntakeStore::temporary().unwrap());
        let svc = ReservationService::new(store.clone(), departments(1), "P", 1000);
        svc.reserve(&request(10), Utc::now()).unwrap();
        assert_eq!(svc.reserve(&request(10), Utc::now()), Err(ReservationError::SlotFull));
        assert_eq!(store.current_sequence().unwrap(), Some(1001));
        let next = svc.reserve(&request(11), Utc::now()).unwrap();
        assert_eq!(next.id, "P1002");
    }

    #[test]
    fn rejects_unknown_department_and_off_schedule_time() {
        let store = Arc::new(IntakeStore::temporary().unwrap());
        let svc = ReservationService::new(store, departments(1), "P", 1000);
        let mut req = request(9);
        req.department = "Radiology".into();
        assert!(matches!(svc.reserve(&req, Utc::now()), Err(ReservationError::InvalidRequest(_))));
        assert!(matches!(svc.reserve(&request(15), Utc::now()), Err(ReservationError::InvalidRequest(_))));
    }

    #[test]
    fn concurrent_attempts_never_exceed_capacity() {
        const CAPACITY: u32 = 6;
        const EXTRA: u32 = 10;
        let store = Arc::new(IntakeStore::temporary().unwrap());
        let svc = ReservationService::new(store.clone(), departments(CAPACITY), "P", 1000);
        let handles: Vec<_> = (0..CAPACITY + EXTRA)
            .map(|_| {
                let svc = svc.clone();
                std::thread::spawn(move || svc.reserve(&request(9), Utc::now()))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let ok = results.iter().filter(|r| r.is_ok()).count() as u32;
        let full = results
            .iter()
            .filter(|r| matches!(r, Err(ReservationError::SlotFull)))
            .count() as u32;
        assert_eq!(ok, CAPACITY);
        assert_eq!(full, EXTRA);
        let key = SlotKey::new("Cardiology", request(9).date, request(9).time);
        assert_eq!(store.reserved_count(&key).unwrap(), CAPACITY);
    }

    #[test]
    fn sequence_is_collision_free_under_load() {
        let store = Arc::new(IntakeStore::temporary().unwrap());
        let svc = ReservationService::new(store.clone(), departments(1000), "P", 1000);
        let handles: Vec<_> = (0..120)
            .map(|i| {
                let svc = svc.clone();
                std::thread::spawn(move || svc.reserve(&request(9 + (i % 4)), Utc::now()))
            })
            .collect();
        let mut numbers: Vec<u64> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap().id[1..].parse().unwrap())
            .collect();
        let unique: HashSet<u64> = numbers.iter().copied().collect();
        assert_eq!(unique.len(), 120);
        numbers.sort_unstable();
        assert_eq!(numbers.first(), Some(&1001));
        assert_eq!(numbers.last(), Some(&1120));
        assert_eq!(store.scan_bookings().unwrap().len(), 120);
    }

    struct BrokenLedger;

    impl SlotLedger for BrokenLedger {
        fn with_atomic_transaction(
            &self,
            _body: &crate::ledger::TxnBody<'_>,
        ) -> Result<BookingRecord, TxnFailure> {
            Err(TxnFailure::Backend("disk unplugged".into()))
        }
        fn reserved_count(&self, _key: &SlotKey) -> Result<u32, StoreError> {
            Ok(0)
        }
        fn find_booking(&self, _id: &str) -> Result<Option<BookingRecord>, StoreError> {
            Ok(None)
        }
    }

    #[test]
    fn backend_failure_is_reported() {
        let svc = ReservationService::new(Arc::new(BrokenLedger), departments(3), "P", 1000);
        assert_eq!(
            svc.reserve(&request(9), Utc::now()),
            Err(ReservationError::Backend("disk unplugged".into()))
        );
    }
}
