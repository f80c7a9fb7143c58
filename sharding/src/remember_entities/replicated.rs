use super::{EntitiesStore, RememberEntitiesError, RememberEntitiesProvider, ShardsStore};
use crate::protocol::{EntityId, ShardId, TypeName};
use async_trait::async_trait;
use sharding_cluster::Replicator;
use std::collections::HashSet;
use std::sync::Arc;

/// Replicated (CRDT OR-Set-shaped) backend: each `(type_name, shard_id)`
/// key holds the current member set, replicated with a configured quorum.
/// The set itself already gives add-wins/idempotent membership; only the
/// whole-set snapshot is replicated per write here rather than per-element
/// deltas, which is sufficient to keep `AddEntity(e)` idempotent and
/// convergent without needing real per-element vector clocks in this
/// in-memory reference implementation.
pub struct ReplicatedRememberEntities {
    shards_replicator: Arc<dyn Replicator<HashSet<ShardId>>>,
    entities_replicator: Arc<dyn Replicator<HashSet<EntityId>>>,
}

impl ReplicatedRememberEntities {
    pub fn new(
        shards_replicator: Arc<dyn Replicator<HashSet<ShardId>>>,
        entities_replicator: Arc<dyn Replicator<HashSet<EntityId>>>,
    ) -> Self {
        ReplicatedRememberEntities {
            shards_replicator,
            entities_replicator,
        }
    }
}

fn shards_key(type_name: &TypeName) -> String {
    format!("shards:{type_name}")
}

fn entities_key(type_name: &TypeName, shard_id: &ShardId) -> String {
    format!("entities:{type_name}:{shard_id}")
}

#[async_trait]
impl RememberEntitiesProvider for ReplicatedRememberEntities {
    async fn start_shards_store(&self, type_name: &TypeName) -> Arc<dyn ShardsStore> {
        Arc::new(ReplicatedShardsStore {
            key: shards_key(type_name),
            replicator: self.shards_replicator.clone(),
        })
    }

    async fn start_entities_store(
        &self,
        type_name: &TypeName,
        shard_id: &ShardId,
    ) -> Arc<dyn EntitiesStore> {
        Arc::new(ReplicatedEntitiesStore {
            key: entities_key(type_name, shard_id),
            replicator: self.entities_replicator.clone(),
        })
    }
}

struct ReplicatedShardsStore {
    key: String,
    replicator: Arc<dyn Replicator<HashSet<ShardId>>>,
}

#[async_trait]
impl ShardsStore for ReplicatedShardsStore {
    async fn shards(&self) -> HashSet<ShardId> {
        self.replicator.read(&self.key).await.unwrap_or_default()
    }

    async fn add_shard(&self, shard_id: ShardId) -> Result<(), RememberEntitiesError> {
        let mut current = self.shards().await;
        current.insert(shard_id);
        self.replicator
            .write(&self.key, current)
            .await
            .map_err(|_| RememberEntitiesError::WriteFailed)
    }

    async fn remove_shard(&self, shard_id: &ShardId) -> Result<(), RememberEntitiesError> {
        let mut current = self.shards().await;
        current.remove(shard_id);
        self.replicator
            .write(&self.key, current)
            .await
            .map_err(|_| RememberEntitiesError::WriteFailed)
    }
}

struct ReplicatedEntitiesStore {
    key: String,
    replicator: Arc<dyn Replicator<HashSet<EntityId>>>,
}

#[async_trait]
impl EntitiesStore for ReplicatedEntitiesStore {
    async fn entities(&self) -> HashSet<EntityId> {
        self.replicator.read(&self.key).await.unwrap_or_default()
    }

    async fn add_entity(&self, entity_id: EntityId) -> Result<(), RememberEntitiesError> {
        let mut current = self.entities().await;
        current.insert(entity_id);
        self.replicator
            .write(&self.key, current)
            .await
            .map_err(|_| RememberEntitiesError::WriteFailed)
    }

    async fn remove_entity(&self, entity_id: &EntityId) -> Result<(), RememberEntitiesError> {
        let mut current = self.entities().await;
        current.remove(entity_id);
        self.replicator
            .write(&self.key, current)
            .await
            .map_err(|_| RememberEntitiesError::WriteFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sharding_cluster::InMemoryReplicator;

    fn provider() -> ReplicatedRememberEntities {
        ReplicatedRememberEntities::new(
            Arc::new(InMemoryReplicator::new(1, 1)),
            Arc::new(InMemoryReplicator::new(1, 1)),
        )
    }

    #[tokio::test]
    async fn add_entity_is_idempotent() {
        let provider = provider();
        let store = provider
            .start_entities_store(&"Type".into(), &"shard-1".into())
            .await;
        store.add_entity("x".into()).await.unwrap();
        store.add_entity("x".into()).await.unwrap();
        assert_eq!(store.entities().await.len(), 1);
    }

    #[tokio::test]
    async fn remove_then_read_converges() {
        let provider = provider();
        let store = provider
            .start_entities_store(&"Type".into(), &"shard-1".into())
            .await;
        store.add_entity("x".into()).await.unwrap();
        store.add_entity("y".into()).await.unwrap();
        store.remove_entity(&"x".into()).await.unwrap();

        let remaining = store.entities().await;
        assert!(!remaining.contains(&EntityId::from("x")));
        assert!(remaining.contains(&EntityId::from("y")));
    }
}
