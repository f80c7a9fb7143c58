//! Remember-Entities Store: a pluggable, durable log of shard membership
//! and entity existence, used to restart entities after crashes. The
//! core depends only on the `RememberEntitiesProvider` contract below -
//! `eventsourced` and `replicated` are the two canonical backends; a
//! caller can supply any third implementation of the same trait (the
//! `remember-entities-store: custom` configuration).

mod eventsourced;
mod replicated;

pub use eventsourced::EventSourcedRememberEntities;
pub use replicated::ReplicatedRememberEntities;

use crate::protocol::{EntityId, ShardId, TypeName};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RememberEntitiesError {
    #[error("remember-entities write rejected, retry with backoff")]
    WriteFailed,
}

#[async_trait]
pub trait ShardsStore: Send + Sync {
    async fn shards(&self) -> HashSet<ShardId>;
    async fn add_shard(&self, shard_id: ShardId) -> Result<(), RememberEntitiesError>;
    async fn remove_shard(&self, shard_id: &ShardId) -> Result<(), RememberEntitiesError>;
}

#[async_trait]
pub trait EntitiesStore: Send + Sync {
    async fn entities(&self) -> HashSet<EntityId>;
    async fn add_entity(&self, entity_id: EntityId) -> Result<(), RememberEntitiesError>;
    async fn remove_entity(&self, entity_id: &EntityId) -> Result<(), RememberEntitiesError>;
}

#[async_trait]
pub trait RememberEntitiesProvider: Send + Sync {
    async fn start_shards_store(&self, type_name: &TypeName) -> Arc<dyn ShardsStore>;

    async fn start_entities_store(
        &self,
        type_name: &TypeName,
        shard_id: &ShardId,
    ) -> Arc<dyn EntitiesStore>;
}
