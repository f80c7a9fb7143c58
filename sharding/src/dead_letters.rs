use crate::protocol::{DeadLetterReason, EntityId, ShardId};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::warn;

/// Sink for messages that could not be delivered. Delivery to this sink
/// is the only place a dropped message is observed at all - everywhere
/// else, loss is silent by design (the routing layer only ever promises
/// at-most-once delivery).
pub trait DeadLetters: Send + Sync {
    fn unhandled(&self, shard_id: Option<ShardId>, entity_id: Option<EntityId>, reason: DeadLetterReason);
}

/// Default sink: logs at `warn` and keeps a bounded in-memory record,
/// useful for asserting drop behavior in tests.
pub struct LoggingDeadLetters {
    recorded: Mutex<Vec<(Option<ShardId>, Option<EntityId>, DeadLetterReason)>>,
}

impl LoggingDeadLetters {
    pub fn new() -> Arc<Self> {
        Arc::new(LoggingDeadLetters {
            recorded: Mutex::new(Vec::new()),
        })
    }

    pub fn recorded(&self) -> Vec<(Option<ShardId>, Option<EntityId>, DeadLetterReason)> {
        self.recorded.lock().clone()
    }
}

impl DeadLetters for LoggingDeadLetters {
    fn unhandled(&self, shard_id: Option<ShardId>, entity_id: Option<EntityId>, reason: DeadLetterReason) {
        warn!(?shard_id, ?entity_id, ?reason, "dead letter");
        self.recorded
            .lock()
            .push((shard_id, entity_id, reason));
    }
}
