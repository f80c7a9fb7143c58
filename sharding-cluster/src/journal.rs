use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum JournalError {
    #[error("journal write rejected")]
    WriteRejected,
}

/// Append-only, replay-on-restart durability, keyed by a persistence id
/// derived from a type name. `E` is whatever
/// event enum a caller journals - the coordinator journals
/// `CoordinatorEvent`, a shard's remember-entities store journals
/// `RememberEntitiesEvent`.
#[async_trait]
pub trait Journal<E>: Send + Sync
where
    E: Clone + Send + Sync + 'static,
{
    async fn append(&self, persistence_id: &str, event: E) -> Result<(), JournalError>;

    async fn replay(&self, persistence_id: &str) -> Result<Vec<E>, JournalError>;
}

/// In-memory journal. Durable only for the lifetime of the process;
/// stands in for a real WAL/object-store-backed plugin in tests and
/// examples.
#[derive(Default)]
pub struct InMemoryJournal<E> {
    log: Mutex<HashMap<String, Vec<E>>>,
    fail_next_write: Mutex<bool>,
}

impl<E> InMemoryJournal<E> {
    pub fn new() -> Self {
        InMemoryJournal {
            log: Mutex::new(HashMap::new()),
            fail_next_write: Mutex::new(false),
        }
    }

    /// Test hook: make the next `append` call fail, to exercise the
    /// durable-store-failure path.
    pub fn fail_next_write(&self) {
        *self.fail_next_write.lock() = true;
    }
}

#[async_trait]
impl<E> Journal<E> for InMemoryJournal<E>
where
    E: Clone + Send + Sync + 'static,
{
    async fn append(&self, persistence_id: &str, event: E) -> Result<(), JournalError> {
        let mut should_fail = self.fail_next_write.lock();
        if *should_fail {
            *should_fail = false;
            return Err(JournalError::WriteRejected);
        }
        drop(should_fail);

        self.log
            .lock()
            .entry(persistence_id.to_string())
            .or_default()
            .push(event);
        Ok(())
    }

    async fn replay(&self, persistence_id: &str) -> Result<Vec<E>, JournalError> {
        Ok(self
            .log
            .lock()
            .get(persistence_id)
            .cloned()
            .unwrap_or_default())
    }
}

pub type SharedJournal<E> = Arc<dyn Journal<E>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replay_returns_events_in_append_order() {
        let journal: InMemoryJournal<u32> = InMemoryJournal::new();
        journal.append("type-a", 1).await.unwrap();
        journal.append("type-a", 2).await.unwrap();
        journal.append("type-b", 99).await.unwrap();

        assert_eq!(journal.replay("type-a").await.unwrap(), vec![1, 2]);
        assert_eq!(journal.replay("type-b").await.unwrap(), vec![99]);
        assert_eq!(journal.replay("type-c").await.unwrap(), Vec::<u32>::new());
    }

    #[tokio::test]
    async fn injected_failure_rejects_a_single_write() {
        let journal: InMemoryJournal<u32> = InMemoryJournal::new();
        journal.fail_next_write();

        assert_eq!(
            journal.append("type-a", 1).await,
            Err(JournalError::WriteRejected)
        );
        journal.append("type-a", 1).await.unwrap();
        assert_eq!(journal.replay("type-a").await.unwrap(), vec![1]);
    }
}
