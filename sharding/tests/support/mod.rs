//! Shared entity fixture for the cross-component scenario tests in this
//! directory. Mirrors the `EchoEntity`/`TestCommand` shape used by
//! `shard.rs`'s own unit tests, generalized to carry routing keys so it
//! can be driven through the full `Sharding` facade instead of a bare
//! `Shard` actor.

use async_trait::async_trait;
use parking_lot::Mutex;
use sharding::{Entity, EntityId, EntityRecipe, EntityResponse, MessageExtractor, ShardId};
use std::any::Any;
use std::sync::Arc;
use tokio::sync::oneshot;

pub enum TestCommand {
    Ping {
        shard_id: ShardId,
        entity_id: EntityId,
        reply: oneshot::Sender<EntityId>,
    },
    PassivateNow {
        shard_id: ShardId,
        entity_id: EntityId,
    },
    StopNow,
}

pub struct TestExtractor;

impl MessageExtractor<TestCommand> for TestExtractor {
    fn shard_id(&self, message: &TestCommand) -> Option<ShardId> {
        match message {
            TestCommand::Ping { shard_id, .. } => Some(shard_id.clone()),
            TestCommand::PassivateNow { shard_id, .. } => Some(shard_id.clone()),
            TestCommand::StopNow => None,
        }
    }

    fn entity_id(&self, message: &TestCommand) -> Option<EntityId> {
        match message {
            TestCommand::Ping { entity_id, .. } => Some(entity_id.clone()),
            TestCommand::PassivateNow { entity_id, .. } => Some(entity_id.clone()),
            TestCommand::StopNow => None,
        }
    }
}

struct EchoEntity {
    entity_id: EntityId,
}

#[async_trait]
impl Entity for EchoEntity {
    async fn handle(&mut self, payload: Box<dyn Any + Send>) -> EntityResponse {
        match payload.downcast::<TestCommand>() {
            Ok(command) => match *command {
                TestCommand::Ping { reply, .. } => {
                    let _ = reply.send(self.entity_id.clone());
                    EntityResponse::Handled
                }
                TestCommand::PassivateNow { .. } => {
                    EntityResponse::Passivate(Box::new(TestCommand::StopNow))
                }
                TestCommand::StopNow => EntityResponse::Stopped,
            },
            Err(_) => EntityResponse::Handled,
        }
    }
}

/// Records every entity id `new_entity` was called for, in order -
/// lets a test assert both "this entity started" and "it started
/// exactly once" / "it restarted".
#[derive(Default)]
pub struct StartLog {
    started: Mutex<Vec<EntityId>>,
}

impl StartLog {
    pub fn started(&self) -> Vec<EntityId> {
        self.started.lock().clone()
    }
}

pub struct EchoRecipe {
    pub log: Arc<StartLog>,
}

impl EchoRecipe {
    pub fn new() -> Self {
        EchoRecipe {
            log: Arc::new(StartLog::default()),
        }
    }
}

impl EntityRecipe for EchoRecipe {
    fn new_entity(&self, entity_id: &EntityId) -> Box<dyn Entity> {
        self.log.started.lock().push(entity_id.clone());
        Box::new(EchoEntity {
            entity_id: entity_id.clone(),
        })
    }

    fn handoff_stop_message(&self) -> Box<dyn Any + Send> {
        Box::new(TestCommand::StopNow)
    }
}
