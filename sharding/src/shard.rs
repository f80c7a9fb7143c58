//! Shard: per-shard owner on a node. Knows its entities; enforces
//! at-most-one-incarnation-at-a-time; drives passivation and hand-off.

use crate::dead_letters::DeadLetters;
use crate::entity::{Entity, EntityRecipe, EntityResponse};
use crate::error::DeliveryError;
use crate::protocol::{DeadLetterReason, EntityId, ShardId, TypeName};
use crate::remember_entities::EntitiesStore;
use async_trait::async_trait;
use sharding_core::{Actor, ActorContext, Handler, Message};
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

enum EntityMailboxItem {
    Deliver(Box<dyn Any + Send>, oneshot::Sender<EntityResponse>),
}

struct EntityHandle {
    tx: mpsc::Sender<EntityMailboxItem>,
}

fn spawn_entity(mut entity: Box<dyn Entity>) -> EntityHandle {
    let (tx, mut rx) = mpsc::channel(32);
    tokio::spawn(async move {
        while let Some(EntityMailboxItem::Deliver(payload, reply)) = rx.recv().await {
            let response = entity.handle(payload).await;
            let terminal = matches!(response, EntityResponse::Stopped);
            let _ = reply.send(response);
            if terminal {
                break;
            }
        }
    });
    EntityHandle { tx }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EntityStatus {
    Active,
    Passivating,
}

struct EntityRuntime {
    handle: EntityHandle,
    status: EntityStatus,
    buffer: VecDeque<Box<dyn Any + Send>>,
}

pub struct DeliverToEntity {
    pub entity_id: EntityId,
    pub payload: Box<dyn Any + Send>,
}
impl Message for DeliverToEntity {
    type Result = Result<(), DeliveryError>;
}

pub struct StopAllEntities;
impl Message for StopAllEntities {
    type Result = ();
}

struct PassivationStopped {
    entity_id: EntityId,
}
impl Message for PassivationStopped {
    type Result = ();
}

pub struct Shard {
    type_name: TypeName,
    shard_id: ShardId,
    recipe: Arc<dyn EntityRecipe>,
    remember_entities: Option<Arc<dyn EntitiesStore>>,
    dead_letters: Arc<dyn DeadLetters>,
    handoff_timeout: Duration,
    entities: HashMap<EntityId, EntityRuntime>,
    handing_off: bool,
}

impl Shard {
    pub fn new(
        type_name: TypeName,
        shard_id: ShardId,
        recipe: Arc<dyn EntityRecipe>,
        remember_entities: Option<Arc<dyn EntitiesStore>>,
        dead_letters: Arc<dyn DeadLetters>,
        handoff_timeout: Duration,
    ) -> Self {
        Shard {
            type_name,
            shard_id,
            recipe,
            remember_entities,
            dead_letters,
            handoff_timeout,
            entities: HashMap::new(),
            handing_off: false,
        }
    }

    fn start_entity(&mut self, entity_id: EntityId) {
        let entity = self.recipe.new_entity(&entity_id);
        self.entities.insert(
            entity_id.clone(),
            EntityRuntime {
                handle: spawn_entity(entity),
                status: EntityStatus::Active,
                buffer: VecDeque::new(),
            },
        );
        self.commit_entity_added(entity_id);
    }

    /// Fires off the durable write for a newly started entity with
    /// bounded retry; the entity is usable in memory immediately, per
    /// the "in-memory state remains consistent with the last successful
    /// write" allowance - a prolonged durable-store outage degrades
    /// recoverability on the next restart, not current availability.
    fn commit_entity_added(&self, entity_id: EntityId) {
        let Some(store) = self.remember_entities.clone() else {
            return;
        };
        tokio::spawn(async move {
            retry_write(|| store.add_entity(entity_id.clone())).await;
        });
    }

    fn commit_entity_removed(&self, entity_id: EntityId) {
        let Some(store) = self.remember_entities.clone() else {
            return;
        };
        tokio::spawn(async move {
            retry_write(|| store.remove_entity(&entity_id)).await;
        });
    }

    async fn deliver_active(
        &mut self,
        entity_id: &EntityId,
        payload: Box<dyn Any + Send>,
        ctx: &ActorContext<Self>,
    ) -> Result<(), DeliveryError> {
        let tx = {
            let runtime = self
                .entities
                .get(entity_id)
                .ok_or(DeliveryError::EntityUnavailable)?;
            runtime.handle.tx.clone()
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        if tx
            .send(EntityMailboxItem::Deliver(payload, reply_tx))
            .await
            .is_err()
        {
            self.entities.remove(entity_id);
            return Err(DeliveryError::EntityUnavailable);
        }

        match reply_rx.await {
            Ok(EntityResponse::Handled) => Ok(()),
            Ok(EntityResponse::Passivate(stop_message)) => {
                if let Some(runtime) = self.entities.get_mut(entity_id) {
                    runtime.status = EntityStatus::Passivating;
                }
                self.begin_passivation(entity_id.clone(), stop_message, ctx);
                Ok(())
            }
            Ok(EntityResponse::Stopped) => {
                self.entities.remove(entity_id);
                self.commit_entity_removed(entity_id.clone());
                Err(DeliveryError::EntityUnavailable)
            }
            Err(_) => {
                self.entities.remove(entity_id);
                Err(DeliveryError::EntityUnavailable)
            }
        }
    }

    fn begin_passivation(
        &self,
        entity_id: EntityId,
        stop_message: Box<dyn Any + Send>,
        ctx: &ActorContext<Self>,
    ) {
        let Some(runtime) = self.entities.get(&entity_id) else {
            return;
        };
        let tx = runtime.handle.tx.clone();
        let self_ref = ctx.actor_ref();
        tokio::spawn(async move {
            let (reply_tx, reply_rx) = oneshot::channel();
            let _ = tx
                .send(EntityMailboxItem::Deliver(stop_message, reply_tx))
                .await;
            let _ = reply_rx.await;
            let _ = self_ref.notify(PassivationStopped { entity_id }).await;
        });
    }
}

async fn retry_write<F, Fut>(mut write: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), crate::remember_entities::RememberEntitiesError>>,
{
    let mut delay = Duration::from_millis(50);
    for attempt in 0..3 {
        if write().await.is_ok() {
            return;
        }
        if attempt < 2 {
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
    }
    warn!("remember-entities write failed after retries, durable record may lag in-memory state");
}

#[async_trait]
impl Actor for Shard {
    async fn started(&mut self, _ctx: &mut ActorContext<Self>) {
        if let Some(store) = self.remember_entities.clone() {
            for entity_id in store.entities().await {
                self.start_entity(entity_id);
            }
        }
    }
}

#[async_trait]
impl Handler<DeliverToEntity> for Shard {
    async fn handle(
        &mut self,
        msg: DeliverToEntity,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), DeliveryError> {
        if self.handing_off {
            self.dead_letters.unhandled(
                Some(self.shard_id.clone()),
                Some(msg.entity_id.clone()),
                DeadLetterReason::HandoffInProgress,
            );
            return Err(DeliveryError::HandoffInProgress);
        }

        let status = self.entities.get(&msg.entity_id).map(|r| r.status);
        match status {
            Some(EntityStatus::Active) => self.deliver_active(&msg.entity_id, msg.payload, ctx).await,
            Some(EntityStatus::Passivating) => {
                if let Some(runtime) = self.entities.get_mut(&msg.entity_id) {
                    runtime.buffer.push_back(msg.payload);
                }
                Ok(())
            }
            None => {
                self.start_entity(msg.entity_id.clone());
                self.deliver_active(&msg.entity_id, msg.payload, ctx).await
            }
        }
    }
}

#[async_trait]
impl Handler<PassivationStopped> for Shard {
    async fn handle(&mut self, msg: PassivationStopped, ctx: &mut ActorContext<Self>) {
        let runtime = match self.entities.remove(&msg.entity_id) {
            Some(runtime) => runtime,
            None => return,
        };
        self.commit_entity_removed(msg.entity_id.clone());

        if runtime.buffer.is_empty() {
            return;
        }

        self.start_entity(msg.entity_id.clone());
        for payload in runtime.buffer {
            let _ = self.deliver_active(&msg.entity_id, payload, ctx).await;
        }
    }
}

#[async_trait]
impl Handler<StopAllEntities> for Shard {
    async fn handle(&mut self, _msg: StopAllEntities, ctx: &mut ActorContext<Self>) {
        self.handing_off = true;
        let entity_ids: Vec<EntityId> = self.entities.keys().cloned().collect();
        let timeout = self.handoff_timeout;

        let mut waiters = Vec::new();
        for entity_id in entity_ids {
            let tx = match self.entities.get(&entity_id) {
                Some(runtime) => runtime.handle.tx.clone(),
                None => continue,
            };
            let stop_message = self.recipe.handoff_stop_message();
            waiters.push(async move {
                let (reply_tx, reply_rx) = oneshot::channel();
                let _ = tx
                    .send(EntityMailboxItem::Deliver(stop_message, reply_tx))
                    .await;
                let result = tokio::time::timeout(timeout, reply_rx).await;
                (entity_id, result)
            });
        }

        let results = futures::future::join_all(waiters).await;
        for (entity_id, result) in results {
            match result {
                Ok(Ok(EntityResponse::Stopped)) => {}
                Ok(Ok(_other)) => {
                    warn!(%entity_id, "entity responded without stopping to a hand-off stop message");
                }
                _ => {
                    warn!(%entity_id, "entity did not acknowledge hand-off stop within timeout, force-stopping");
                }
            }
            self.entities.remove(&entity_id);
            self.commit_entity_removed(entity_id);
        }

        let _ = ctx;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dead_letters::LoggingDeadLetters;
    use crate::remember_entities::EventSourcedRememberEntities;
    use sharding_cluster::InMemoryJournal;
    use sharding_core::{spawn, ActorId};

    struct EchoEntity;

    #[async_trait]
    impl Entity for EchoEntity {
        async fn handle(&mut self, payload: Box<dyn Any + Send>) -> EntityResponse {
            if let Ok(command) = payload.downcast::<TestCommand>() {
                return match *command {
                    TestCommand::Ping(tx) => {
                        let _ = tx.send(());
                        EntityResponse::Handled
                    }
                    TestCommand::PassivateNow => {
                        EntityResponse::Passivate(Box::new(TestCommand::StopNow))
                    }
                    TestCommand::StopNow => EntityResponse::Stopped,
                };
            }
            EntityResponse::Handled
        }
    }

    enum TestCommand {
        Ping(oneshot::Sender<()>),
        PassivateNow,
        StopNow,
    }

    struct EchoRecipe;
    impl EntityRecipe for EchoRecipe {
        fn new_entity(&self, _entity_id: &EntityId) -> Box<dyn Entity> {
            Box::new(EchoEntity)
        }

        fn handoff_stop_message(&self) -> Box<dyn Any + Send> {
            Box::new(TestCommand::StopNow)
        }
    }

    fn shard() -> sharding_core::LocalActorRef<Shard> {
        spawn(
            Shard::new(
                "Test".into(),
                "1".into(),
                Arc::new(EchoRecipe),
                None,
                LoggingDeadLetters::new(),
                Duration::from_millis(200),
            ),
            ActorId::generate(),
        )
    }

    #[tokio::test]
    async fn starts_entity_on_first_message_and_forwards() {
        let shard = shard();
        let (tx, rx) = oneshot::channel();
        shard
            .send(DeliverToEntity {
                entity_id: "alpha".into(),
                payload: Box::new(TestCommand::Ping(tx)),
            })
            .await
            .unwrap()
            .unwrap();
        rx.await.unwrap();
    }

    #[tokio::test]
    async fn passivation_buffers_and_replays_pending_message() {
        let shard = shard();

        shard
            .send(DeliverToEntity {
                entity_id: "alpha".into(),
                payload: Box::new(TestCommand::PassivateNow),
            })
            .await
            .unwrap()
            .unwrap();

        let (tx, rx) = oneshot::channel();
        shard
            .send(DeliverToEntity {
                entity_id: "alpha".into(),
                payload: Box::new(TestCommand::Ping(tx)),
            })
            .await
            .unwrap()
            .unwrap();

        // the buffered ping is replayed into a fresh incarnation once the
        // old one finishes stopping.
        rx.await.unwrap();
    }

    #[tokio::test]
    async fn hand_off_stops_all_active_entities() {
        let shard = shard();
        shard
            .send(DeliverToEntity {
                entity_id: "alpha".into(),
                payload: Box::new(TestCommand::StopNow),
            })
            .await
            .unwrap()
            .unwrap_err(); // the entity stops immediately, delivery "fails" as unavailable

        shard.send(StopAllEntities).await.unwrap();

        let result = shard
            .send(DeliverToEntity {
                entity_id: "alpha".into(),
                payload: Box::new(TestCommand::PassivateNow),
            })
            .await
            .unwrap();
        assert_eq!(result, Err(DeliveryError::HandoffInProgress));
    }

    #[tokio::test]
    async fn remembered_entities_are_started_eagerly_on_restart() {
        let journal = Arc::new(InMemoryJournal::new());
        let provider = EventSourcedRememberEntities::new(
            Arc::new(InMemoryJournal::new()),
            journal.clone(),
        );
        let store = provider.start_entities_store(&"Test".into(), &"1".into()).await;
        store.add_entity("x".into()).await.unwrap();
        store.add_entity("y".into()).await.unwrap();

        let restarted = spawn(
            Shard::new(
                "Test".into(),
                "1".into(),
                Arc::new(EchoRecipe),
                Some(store),
                LoggingDeadLetters::new(),
                Duration::from_millis(200),
            ),
            ActorId::generate(),
        );

        // give the started() hook a chance to run before asserting.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (tx, rx) = oneshot::channel();
        restarted
            .send(DeliverToEntity {
                entity_id: "x".into(),
                payload: Box::new(TestCommand::Ping(tx)),
            })
            .await
            .unwrap()
            .unwrap();
        rx.await.unwrap();
    }
}
