use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum QuorumError {
    #[error("quorum of {required} not reachable, only {reachable} members available")]
    Unreachable { required: usize, reachable: usize },
}

/// Quorum-read/write of keyed, last-writer-wins values - the replicated
/// data backend and `Replicator` collaborator. A real implementation
/// replicates over the cluster with a CRDT merge; this one simulates the
/// quorum requirement against a configured member count so tests can
/// exercise "writes survive on any `minCap` survivors" without a real
/// network.
#[async_trait]
pub trait Replicator<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    async fn write(&self, key: &str, value: V) -> Result<(), QuorumError>;

    async fn read(&self, key: &str) -> Option<V>;

    async fn read_all(&self, prefix: &str) -> Vec<(String, V)>;
}

struct Entry<V> {
    value: V,
    timestamp: u64,
}

/// In-memory last-writer-wins replicator. `member_count` and `min_cap`
/// model the `majority-min-cap` config: quorum size is
/// `max(ceil(member_count / 2) + 1, min_cap)`.
pub struct InMemoryReplicator<V> {
    entries: RwLock<HashMap<String, Entry<V>>>,
    clock: AtomicU64,
    member_count: RwLock<usize>,
    min_cap: usize,
    reachable_members: RwLock<usize>,
}

impl<V: Clone> InMemoryReplicator<V> {
    pub fn new(member_count: usize, min_cap: usize) -> Self {
        InMemoryReplicator {
            entries: RwLock::new(HashMap::new()),
            clock: AtomicU64::new(0),
            member_count: RwLock::new(member_count),
            min_cap,
            reachable_members: RwLock::new(member_count),
        }
    }

    pub fn quorum_size(&self) -> usize {
        let n = *self.member_count.read();
        ((n + 1) / 2 + 1).max(self.min_cap)
    }

    pub fn set_member_count(&self, n: usize) {
        *self.member_count.write() = n;
        *self.reachable_members.write() = n;
    }

    /// Test hook: simulate losing members, to exercise quorum-loss paths.
    pub fn set_reachable(&self, n: usize) {
        *self.reachable_members.write() = n;
    }
}

#[async_trait]
impl<V> Replicator<V> for InMemoryReplicator<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn write(&self, key: &str, value: V) -> Result<(), QuorumError> {
        let required = self.quorum_size();
        let reachable = *self.reachable_members.read();
        if reachable < required {
            return Err(QuorumError::Unreachable {
                required,
                reachable,
            });
        }

        let timestamp = self.clock.fetch_add(1, Ordering::SeqCst);
        let mut entries = self.entries.write();
        let replace = match entries.get(key) {
            Some(existing) => timestamp >= existing.timestamp,
            None => true,
        };
        if replace {
            entries.insert(key.to_string(), Entry { value, timestamp });
        }
        Ok(())
    }

    async fn read(&self, key: &str) -> Option<V> {
        self.entries.read().get(key).map(|e| e.value.clone())
    }

    async fn read_all(&self, prefix: &str) -> Vec<(String, V)> {
        self.entries
            .read()
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn last_write_wins() {
        let replicator: InMemoryReplicator<i32> = InMemoryReplicator::new(3, 2);
        replicator.write("k", 1).await.unwrap();
        replicator.write("k", 2).await.unwrap();
        assert_eq!(replicator.read("k").await, Some(2));
    }

    #[tokio::test]
    async fn write_fails_below_quorum() {
        let replicator: InMemoryReplicator<i32> = InMemoryReplicator::new(5, 2);
        // quorum = max(ceil(5/2)+1, 2) = max(3+1? no: (5+1)/2+1=3+1=4) -> 4
        replicator.set_reachable(2);
        assert!(replicator.write("k", 1).await.is_err());
    }

    #[tokio::test]
    async fn min_cap_can_raise_quorum_above_plain_majority() {
        // plain majority for N=2 is 2; min_cap=3 raises the requirement
        let replicator: InMemoryReplicator<i32> = InMemoryReplicator::new(2, 3);
        assert_eq!(replicator.quorum_size(), 3);
        replicator.set_reachable(2);
        assert!(replicator.write("k", 1).await.is_err());
    }
}
