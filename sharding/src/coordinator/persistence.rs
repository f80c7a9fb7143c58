use crate::protocol::{NodeId, ShardId, TypeName};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sharding_cluster::{Journal, Replicator};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

/// A fact about coordinator state worth recording durably. Handoff's
/// in-flight states are deliberately absent here - only the terminal
/// transitions are persisted; in-flight work is re-driven on restart
/// rather than replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinatorEvent {
    ShardRegionRegistered(NodeId),
    ShardRegionTerminated(NodeId),
    ShardRegionProxyRegistered(NodeId),
    ShardRegionProxyTerminated(NodeId),
    ShardHomeAllocated(ShardId, NodeId),
    ShardHomeDeallocated(ShardId),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("coordinator state write rejected")]
    WriteRejected,
}

/// What a coordinator actor rebuilds on startup (or on a singleton
/// failover): which shards are allocated where, and which regions/proxies
/// were known, independent of whether any of them happen to be currently
/// reachable or re-registered yet.
#[derive(Debug, Default, Clone)]
pub struct CoordinatorSnapshot {
    pub shard_homes: HashMap<ShardId, NodeId>,
    pub known_regions: HashSet<NodeId>,
    pub known_proxies: HashSet<NodeId>,
}

#[async_trait]
pub trait CoordinatorPersistence: Send + Sync {
    async fn record(
        &self,
        type_name: &TypeName,
        event: &CoordinatorEvent,
    ) -> Result<(), PersistenceError>;

    async fn load(&self, type_name: &TypeName) -> CoordinatorSnapshot;
}

fn apply(snapshot: &mut CoordinatorSnapshot, event: &CoordinatorEvent) {
    match event.clone() {
        CoordinatorEvent::ShardRegionRegistered(node) => {
            snapshot.known_regions.insert(node);
        }
        CoordinatorEvent::ShardRegionTerminated(node) => {
            snapshot.known_regions.remove(&node);
        }
        CoordinatorEvent::ShardRegionProxyRegistered(node) => {
            snapshot.known_proxies.insert(node);
        }
        CoordinatorEvent::ShardRegionProxyTerminated(node) => {
            snapshot.known_proxies.remove(&node);
        }
        CoordinatorEvent::ShardHomeAllocated(shard_id, node) => {
            snapshot.shard_homes.insert(shard_id, node);
        }
        CoordinatorEvent::ShardHomeDeallocated(shard_id) => {
            snapshot.shard_homes.remove(&shard_id);
        }
    }
}

/// Event-sourced persistence: one ordered log per type-name, replayed in
/// full on every startup. Simple, strongly ordered, and the natural
/// default for a single-writer singleton.
pub struct EventSourcedCoordinatorPersistence {
    journal: Arc<dyn Journal<CoordinatorEvent>>,
}

impl EventSourcedCoordinatorPersistence {
    pub fn new(journal: Arc<dyn Journal<CoordinatorEvent>>) -> Self {
        EventSourcedCoordinatorPersistence { journal }
    }
}

#[async_trait]
impl CoordinatorPersistence for EventSourcedCoordinatorPersistence {
    async fn record(
        &self,
        type_name: &TypeName,
        event: &CoordinatorEvent,
    ) -> Result<(), PersistenceError> {
        self.journal
            .append(type_name.as_str(), event.clone())
            .await
            .map_err(|_| PersistenceError::WriteRejected)
    }

    async fn load(&self, type_name: &TypeName) -> CoordinatorSnapshot {
        let events = self
            .journal
            .replay(type_name.as_str())
            .await
            .unwrap_or_default();
        let mut snapshot = CoordinatorSnapshot::default();
        for event in &events {
            apply(&mut snapshot, event);
        }
        snapshot
    }
}

/// Replicated (CRDT-backed) persistence: shard homes and region/proxy
/// membership each live as last-write-wins entries under a per-type-name
/// key prefix, quorum-written through `Replicator`. There is no ordered
/// log to replay; `load` instead reads back the converged set of entries,
/// which is why `ShardHomeDeallocated` is represented as writing `None`
/// rather than a delete - `Replicator` only ever overwrites, it never
/// removes a key.
pub struct ReplicatedCoordinatorPersistence {
    shard_homes: Arc<dyn Replicator<Option<NodeId>>>,
    region_presence: Arc<dyn Replicator<bool>>,
    proxy_presence: Arc<dyn Replicator<bool>>,
}

impl ReplicatedCoordinatorPersistence {
    pub fn new(
        shard_homes: Arc<dyn Replicator<Option<NodeId>>>,
        region_presence: Arc<dyn Replicator<bool>>,
        proxy_presence: Arc<dyn Replicator<bool>>,
    ) -> Self {
        ReplicatedCoordinatorPersistence {
            shard_homes,
            region_presence,
            proxy_presence,
        }
    }
}

fn shard_key(type_name: &TypeName, shard_id: &ShardId) -> String {
    format!("{type_name}/shard/{shard_id}")
}

fn region_key(type_name: &TypeName, node: &NodeId) -> String {
    format!("{type_name}/region/{node}")
}

fn proxy_key(type_name: &TypeName, node: &NodeId) -> String {
    format!("{type_name}/proxy/{node}")
}

#[async_trait]
impl CoordinatorPersistence for ReplicatedCoordinatorPersistence {
    async fn record(
        &self,
        type_name: &TypeName,
        event: &CoordinatorEvent,
    ) -> Result<(), PersistenceError> {
        let result = match event {
            CoordinatorEvent::ShardRegionRegistered(node) => {
                self.region_presence
                    .write(&region_key(type_name, node), true)
                    .await
            }
            CoordinatorEvent::ShardRegionTerminated(node) => {
                self.region_presence
                    .write(&region_key(type_name, node), false)
                    .await
            }
            CoordinatorEvent::ShardRegionProxyRegistered(node) => {
                self.proxy_presence
                    .write(&proxy_key(type_name, node), true)
                    .await
            }
            CoordinatorEvent::ShardRegionProxyTerminated(node) => {
                self.proxy_presence
                    .write(&proxy_key(type_name, node), false)
                    .await
            }
            CoordinatorEvent::ShardHomeAllocated(shard_id, node) => {
                self.shard_homes
                    .write(&shard_key(type_name, shard_id), Some(node.clone()))
                    .await
            }
            CoordinatorEvent::ShardHomeDeallocated(shard_id) => {
                self.shard_homes
                    .write(&shard_key(type_name, shard_id), None)
                    .await
            }
        };
        result.map_err(|_| PersistenceError::WriteRejected)
    }

    async fn load(&self, type_name: &TypeName) -> CoordinatorSnapshot {
        let mut snapshot = CoordinatorSnapshot::default();

        for (key, home) in self
            .shard_homes
            .read_all(&format!("{type_name}/shard/"))
            .await
        {
            if let Some(node) = home {
                let shard_id = key.rsplit('/').next().unwrap_or(&key);
                snapshot
                    .shard_homes
                    .insert(ShardId::from(shard_id), node);
            }
        }

        for (key, present) in self
            .region_presence
            .read_all(&format!("{type_name}/region/"))
            .await
        {
            if present {
                let node = key.rsplit('/').next().unwrap_or(&key);
                snapshot.known_regions.insert(NodeId::from(node));
            }
        }

        for (key, present) in self
            .proxy_presence
            .read_all(&format!("{type_name}/proxy/"))
            .await
        {
            if present {
                let node = key.rsplit('/').next().unwrap_or(&key);
                snapshot.known_proxies.insert(NodeId::from(node));
            }
        }

        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sharding_cluster::{InMemoryJournal, InMemoryReplicator};

    #[tokio::test]
    async fn event_sourced_replay_reconstructs_shard_homes() {
        let persistence =
            EventSourcedCoordinatorPersistence::new(Arc::new(InMemoryJournal::new()));
        let type_name = TypeName::from("Game");

        persistence
            .record(
                &type_name,
                &CoordinatorEvent::ShardRegionRegistered(NodeId::from("n1")),
            )
            .await
            .unwrap();
        persistence
            .record(
                &type_name,
                &CoordinatorEvent::ShardHomeAllocated(ShardId::from("1"), NodeId::from("n1")),
            )
            .await
            .unwrap();
        persistence
            .record(
                &type_name,
                &CoordinatorEvent::ShardHomeAllocated(ShardId::from("2"), NodeId::from("n1")),
            )
            .await
            .unwrap();
        persistence
            .record(&type_name, &CoordinatorEvent::ShardHomeDeallocated(ShardId::from("2")))
            .await
            .unwrap();

        let snapshot = persistence.load(&type_name).await;
        assert_eq!(snapshot.shard_homes.len(), 1);
        assert_eq!(
            snapshot.shard_homes.get(&ShardId::from("1")),
            Some(&NodeId::from("n1"))
        );
        assert!(snapshot.known_regions.contains(&NodeId::from("n1")));
    }

    #[tokio::test]
    async fn replicated_load_reflects_latest_write_per_key() {
        let persistence = ReplicatedCoordinatorPersistence::new(
            Arc::new(InMemoryReplicator::new(1, 1)),
            Arc::new(InMemoryReplicator::new(1, 1)),
            Arc::new(InMemoryReplicator::new(1, 1)),
        );
        let type_name = TypeName::from("Game");

        persistence
            .record(
                &type_name,
                &CoordinatorEvent::ShardHomeAllocated(ShardId::from("1"), NodeId::from("n1")),
            )
            .await
            .unwrap();
        persistence
            .record(
                &type_name,
                &CoordinatorEvent::ShardHomeAllocated(ShardId::from("1"), NodeId::from("n2")),
            )
            .await
            .unwrap();

        let snapshot = persistence.load(&type_name).await;
        assert_eq!(
            snapshot.shard_homes.get(&ShardId::from("1")),
            Some(&NodeId::from("n2"))
        );
    }
}
