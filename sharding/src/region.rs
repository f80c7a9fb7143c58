//! Shard Region: the only place user code sends messages for a type on a
//! given node. Resolves shard location, buffers pending messages, hosts
//! local Shards, and proxies to remote Regions.

use crate::config::{BufferOverflowPolicy, ShardingConfig};
use crate::dead_letters::DeadLetters;
use crate::entity::EntityRecipe;
use crate::error::DeliveryError;
use crate::protocol::{
    BeginHandOff, BeginHandOffAck, CoordinatorRef, DeadLetterReason, EntityId, GetShardHome,
    GetShardHomeResult, GracefulShutdownReq, HandOff, HostShard, NodeId, Register, RegionRef,
    RegisterProxy, ShardId, ShardStarted, ShardStopped, TypeName,
};
use crate::remember_entities::RememberEntitiesProvider;
use crate::shard::{DeliverToEntity, Shard, StopAllEntities};
use async_trait::async_trait;
use sharding_core::{Actor, ActorContext, Handler, LocalActorRef, Message};
use std::any::Any;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::warn;

pub struct Deliver {
    pub shard_id: ShardId,
    pub entity_id: EntityId,
    pub payload: Box<dyn Any + Send>,
}
impl Message for Deliver {
    type Result = Result<(), DeliveryError>;
}

pub struct GracefulShutdown;
impl Message for GracefulShutdown {
    type Result = ();
}

/// Re-sends `Register` if not yet acknowledged and re-requests a home for
/// any shard still sitting in a non-empty buffer; callers drive this on
/// whatever schedule `retry-interval` implies - the core has no internal
/// timer wheel, that scheduling is an external collaborator's job.
pub struct Retry;
impl Message for Retry {
    type Result = ();
}

struct ShardResolved {
    shard_id: ShardId,
    region: RegionRef,
}
impl Message for ShardResolved {
    type Result = ();
}

struct ShutdownDrained;
impl Message for ShutdownDrained {
    type Result = ();
}

struct BufferedEnvelope {
    entity_id: EntityId,
    payload: Box<dyn Any + Send>,
}

pub struct Region {
    node_id: NodeId,
    type_name: TypeName,
    is_proxy: bool,
    config: Arc<ShardingConfig>,
    coordinator: Option<CoordinatorRef>,
    recipe: Arc<dyn EntityRecipe>,
    remember_entities_provider: Option<Arc<dyn RememberEntitiesProvider>>,
    dead_letters: Arc<dyn DeadLetters>,
    shard_homes: HashMap<ShardId, RegionRef>,
    shards: HashMap<ShardId, LocalActorRef<Shard>>,
    buffers: HashMap<ShardId, VecDeque<BufferedEnvelope>>,
    pending_resolution: HashSet<ShardId>,
    registered: bool,
    shutting_down: bool,
}

impl Region {
    pub fn new(
        node_id: NodeId,
        type_name: TypeName,
        is_proxy: bool,
        config: Arc<ShardingConfig>,
        coordinator: Option<CoordinatorRef>,
        recipe: Arc<dyn EntityRecipe>,
        remember_entities_provider: Option<Arc<dyn RememberEntitiesProvider>>,
        dead_letters: Arc<dyn DeadLetters>,
    ) -> Self {
        Region {
            node_id,
            type_name,
            is_proxy,
            config,
            coordinator,
            recipe,
            remember_entities_provider,
            dead_letters,
            shard_homes: HashMap::new(),
            shards: HashMap::new(),
            buffers: HashMap::new(),
            pending_resolution: HashSet::new(),
            registered: false,
            shutting_down: false,
        }
    }

    fn self_ref(&self, ctx: &ActorContext<Self>) -> RegionRef {
        RegionRef::new(
            self.node_id.clone(),
            self.type_name.clone(),
            self.is_proxy,
            ctx.actor_ref(),
        )
    }

    async fn ensure_shard_started(&mut self, shard_id: &ShardId) -> LocalActorRef<Shard> {
        if let Some(existing) = self.shards.get(shard_id) {
            return existing.clone();
        }

        let entities_store = match &self.remember_entities_provider {
            Some(provider) if self.config.remember_entities => {
                Some(provider.start_entities_store(&self.type_name, shard_id).await)
            }
            _ => None,
        };

        let shard_ref = sharding_core::spawn(
            Shard::new(
                self.type_name.clone(),
                shard_id.clone(),
                self.recipe.clone(),
                entities_store,
                self.dead_letters.clone(),
                self.config.handoff_timeout,
            ),
            sharding_core::ActorId::generate(),
        );
        self.shards.insert(shard_id.clone(), shard_ref.clone());
        shard_ref
    }

    async fn dispatch_known(
        &mut self,
        region: RegionRef,
        shard_id: ShardId,
        entity_id: EntityId,
        payload: Box<dyn Any + Send>,
    ) -> Result<(), DeliveryError> {
        if region.node_id == self.node_id {
            let shard_ref = self.ensure_shard_started(&shard_id).await;
            match shard_ref.send(DeliverToEntity { entity_id, payload }).await {
                Ok(inner) => inner,
                Err(_) => Err(DeliveryError::EntityUnavailable),
            }
        } else {
            match region
                .actor
                .send(Deliver {
                    shard_id,
                    entity_id,
                    payload,
                })
                .await
            {
                Ok(inner) => inner,
                Err(_) => Err(DeliveryError::EntityUnavailable),
            }
        }
    }

    fn buffer(&mut self, shard_id: ShardId, entity_id: EntityId, payload: Box<dyn Any + Send>) {
        let buffer = self.buffers.entry(shard_id.clone()).or_default();
        if buffer.len() >= self.config.buffer_size {
            match self.config.buffer_overflow_policy {
                BufferOverflowPolicy::DropNewest => {
                    self.dead_letters.unhandled(
                        Some(shard_id),
                        Some(entity_id),
                        DeadLetterReason::BufferOverflow,
                    );
                    return;
                }
                BufferOverflowPolicy::DropOldest => {
                    if let Some(dropped) = buffer.pop_front() {
                        self.dead_letters.unhandled(
                            Some(shard_id.clone()),
                            Some(dropped.entity_id),
                            DeadLetterReason::BufferOverflow,
                        );
                    }
                }
            }
        }
        self.buffers
            .entry(shard_id)
            .or_default()
            .push_back(BufferedEnvelope { entity_id, payload });
    }

    fn resolve_shard(&mut self, shard_id: ShardId, ctx: &ActorContext<Self>) {
        if !self.pending_resolution.insert(shard_id.clone()) {
            return;
        }
        let Some(coordinator) = self.coordinator.clone() else {
            self.pending_resolution.remove(&shard_id);
            return;
        };
        let requester = self.self_ref(ctx);
        let self_ref = ctx.actor_ref();
        let retry_interval = self.config.retry_interval;

        tokio::spawn(async move {
            loop {
                let result = coordinator
                    .send(GetShardHome {
                        shard_id: shard_id.clone(),
                        requester: requester.clone(),
                    })
                    .await;
                match result {
                    Ok(GetShardHomeResult::ShardHome(_, region)) => {
                        let _ = self_ref
                            .notify(ShardResolved {
                                shard_id,
                                region,
                            })
                            .await;
                        return;
                    }
                    _ => {
                        tokio::time::sleep(retry_interval).await;
                    }
                }
            }
        });
    }
}

#[async_trait]
impl Actor for Region {
    async fn started(&mut self, ctx: &mut ActorContext<Self>) {
        let region_ref = self.self_ref(ctx);
        if let Some(coordinator) = self.coordinator.clone() {
            let result = if self.is_proxy {
                coordinator.send(RegisterProxy { region: region_ref }).await
            } else {
                coordinator.send(Register { region: region_ref }).await
            };
            match result {
                Ok(_) => self.registered = true,
                Err(err) => warn!(?err, "initial registration with coordinator failed, relying on retry"),
            }
        }
    }
}

#[async_trait]
impl Handler<Deliver> for Region {
    async fn handle(&mut self, msg: Deliver, ctx: &mut ActorContext<Self>) -> Result<(), DeliveryError> {
        if self.shutting_down {
            self.dead_letters.unhandled(
                Some(msg.shard_id),
                Some(msg.entity_id),
                DeadLetterReason::ShardTypeNotStarted,
            );
            return Err(DeliveryError::ShardTypeNotStarted);
        }

        match self.shard_homes.get(&msg.shard_id).cloned() {
            Some(region) => {
                self.dispatch_known(region, msg.shard_id, msg.entity_id, msg.payload)
                    .await
            }
            None => {
                self.buffer(msg.shard_id.clone(), msg.entity_id, msg.payload);
                self.resolve_shard(msg.shard_id, ctx);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Handler<ShardResolved> for Region {
    async fn handle(&mut self, msg: ShardResolved, ctx: &mut ActorContext<Self>) {
        self.pending_resolution.remove(&msg.shard_id);
        self.shard_homes.insert(msg.shard_id.clone(), msg.region.clone());

        if msg.region.node_id == self.node_id {
            self.ensure_shard_started(&msg.shard_id).await;
        }

        let buffered = self.buffers.remove(&msg.shard_id).unwrap_or_default();
        for envelope in buffered {
            if let Err(err) = self
                .dispatch_known(
                    msg.region.clone(),
                    msg.shard_id.clone(),
                    envelope.entity_id.clone(),
                    envelope.payload,
                )
                .await
            {
                warn!(shard_id = %msg.shard_id, ?err, "failed to replay buffered message after resolution");
            }
        }
        let _ = ctx;
    }
}

#[async_trait]
impl Handler<HostShard> for Region {
    async fn handle(&mut self, msg: HostShard, ctx: &mut ActorContext<Self>) -> ShardStarted {
        let home = self.self_ref(ctx);
        self.ensure_shard_started(&msg.shard_id).await;
        self.shard_homes.insert(msg.shard_id.clone(), home);
        ShardStarted {
            shard_id: msg.shard_id,
        }
    }
}

#[async_trait]
impl Handler<BeginHandOff> for Region {
    async fn handle(&mut self, msg: BeginHandOff, _ctx: &mut ActorContext<Self>) -> BeginHandOffAck {
        self.shard_homes.remove(&msg.shard_id);
        BeginHandOffAck {
            shard_id: msg.shard_id,
        }
    }
}

#[async_trait]
impl Handler<HandOff> for Region {
    async fn handle(&mut self, msg: HandOff, _ctx: &mut ActorContext<Self>) -> ShardStopped {
        if let Some(shard_ref) = self.shards.remove(&msg.shard_id) {
            let _ = shard_ref.send(StopAllEntities).await;
            shard_ref.stop().await;
        }
        ShardStopped {
            shard_id: msg.shard_id,
        }
    }
}

#[async_trait]
impl Handler<GracefulShutdown> for Region {
    async fn handle(&mut self, _msg: GracefulShutdown, ctx: &mut ActorContext<Self>) {
        self.shutting_down = true;
        let region_ref = self.self_ref(ctx);
        let self_ref = ctx.actor_ref();
        match self.coordinator.clone() {
            Some(coordinator) => {
                tokio::spawn(async move {
                    let _ = coordinator
                        .send(GracefulShutdownReq { region: region_ref })
                        .await;
                    let _ = self_ref.notify(ShutdownDrained).await;
                });
            }
            None => ctx.stop(),
        }
    }
}

#[async_trait]
impl Handler<ShutdownDrained> for Region {
    async fn handle(&mut self, _msg: ShutdownDrained, ctx: &mut ActorContext<Self>) {
        ctx.stop();
    }
}

#[async_trait]
impl Handler<Retry> for Region {
    async fn handle(&mut self, _msg: Retry, ctx: &mut ActorContext<Self>) {
        if !self.registered {
            if let Some(coordinator) = self.coordinator.clone() {
                let region_ref = self.self_ref(ctx);
                let result = if self.is_proxy {
                    coordinator.send(RegisterProxy { region: region_ref }).await
                } else {
                    coordinator.send(Register { region: region_ref }).await
                };
                self.registered = result.is_ok();
            }
        }

        let pending: Vec<ShardId> = self
            .buffers
            .keys()
            .filter(|shard_id| !self.pending_resolution.contains(*shard_id))
            .cloned()
            .collect();
        for shard_id in pending {
            self.resolve_shard(shard_id, ctx);
        }
    }
}
