//! Session store contract, timeout policy, and per-conversation serialization.

use crate::dialogue::ConversationState;
use crate::error::StoreError;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Durable mapping from conversation identity to dialogue state.
pub trait SessionStore: Send + Sync {
    fn get(&self, id: &str) -> Result<Option<ConversationState>, StoreError>;
    fn put(&self, id: &str, state: &ConversationState) -> Result<(), StoreError>;
    fn delete(&self, id: &str) -> Result<(), StoreError>;
}

/// Idle-timeout rule for abandoning sessions. Evaluated lazily on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    pub timeout: Duration,
}

impl SessionPolicy {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// True once `now - last_activity` exceeds the timeout.
    pub fn is_expired(&self, state: &ConversationState, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(state.last_activity) > self.timeout
    }
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self::new(Duration::minutes(30))
    }
}

/// One async mutex per live conversation, so a conversation's read-transition-write
/// cycles never interleave. Idle entries are dropped on release.
#[derive(Debug, Default)]
pub struct ConversationLocks {
    inner: DashMap<String, Arc<Mutex<()>>>,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, id: &str) -> ConversationGuard<'_> {
        let lock = self
            .inner
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        ConversationGuard {
            locks: self,
            id: id.to_string(),
            guard: Some(guard),
        }
    }

    /// Number of conversations currently holding or waiting on a lock.
    pub fn active(&self) -> usize {
        self.inner.len()
    }

    fn release(&self, id: &str) {
        // The map's own reference is the only one left when nobody holds or waits.
        self.inner.remove_if(id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Held for the duration of one message's processing.
pub struct ConversationGuard<'a> {
    locks: &'a ConversationLocks,
    id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ConversationGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks.release(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialogue::Step;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn expiry_is_strictly_after_timeout() {
        let policy = SessionPolicy::new(Duration::minutes(30));
        let start = Utc::now();
        let state = ConversationState::new("1", Step::Menu, start);
        assert!(!policy.is_expired(&state, start));
        assert!(!policy.is_expired(&state, start + Duration::minutes(30)));
        assert!(policy.is_expired(&state, start + Duration::minutes(30) + Duration::seconds(1)));
    }

    #[tokio::test]
    async fn same_conversation_is_serialized() {
        let locks = Arc::new(ConversationLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let locks = Arc::clone(&locks);
            let inside = Arc::clone(&inside);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                let _g = locks.acquire("same").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn different_conversations_do_not_block() {
        let locks = ConversationLocks::new();
        let _a = locks.acquire("a").await;
        let _b = locks.acquire("b").await;
        assert_eq!(locks.active(), 2);
    }
}
