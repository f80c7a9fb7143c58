//! Guardian / bootstrap: wires a type's Shard Region to the cluster-wide
//! Coordinator singleton and drives the periodic ticks (`RebalanceTick`,
//! `Retry`) that in a real deployment come from an external scheduler.
//! This is the thin layer a caller actually touches - the equivalent of
//! the teacher's own `Sharding::<ActorFactory>::start(remote)` /
//! `.get(id, recipe)` entry point, generalized to this crate's
//! `MessageExtractor`-based routing instead of a per-call recipe.

use crate::allocation::AllocationStrategy;
use crate::config::ShardingConfig;
use crate::coordinator::{CoordinatorPersistence, ShardCoordinator};
use crate::dead_letters::DeadLetters;
use crate::entity::{Entity, EntityRecipe};
use crate::error::DeliveryError;
use crate::protocol::{
    CoordinatorRef, DeadLetterReason, EntityId, MessageExtractor, NodeId, RebalanceTick, RegionRef,
    TypeName,
};
use crate::region::{Deliver, GracefulShutdown, Region, Retry};
use crate::remember_entities::RememberEntitiesProvider;
use parking_lot::Mutex;
use sharding_cluster::{SingletonFactory, SingletonHandle, SingletonManager};
use sharding_core::{spawn, ActorId, LocalActorRef};
use std::any::Any;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// A proxy region (§3, §6) never hosts a shard locally - the Coordinator's
/// allocation strategies always exclude `is_proxy` regions from placement
/// (see `allocation::hosting_regions`) - so a proxy never needs a real
/// `EntityRecipe`. This stand-in exists only to satisfy `Region::new`'s
/// signature; hitting either method would mean that invariant broke.
struct UnreachableEntityRecipe;

impl EntityRecipe for UnreachableEntityRecipe {
    fn new_entity(&self, _entity_id: &EntityId) -> Box<dyn Entity> {
        unreachable!("a proxy region was asked to host a shard locally")
    }

    fn handoff_stop_message(&self) -> Box<dyn Any + Send> {
        unreachable!("a proxy region was asked to host a shard locally")
    }
}

/// Owns the cluster-wide `ShardCoordinator` singleton for one type name:
/// the Coordinator actor, the `SingletonManager` handle supervising its
/// election/restart, and the `RebalanceTick` driver from §4.1.
pub struct CoordinatorHandle {
    pub actor: CoordinatorRef,
    singleton: SingletonHandle,
    _rebalance_ticker: JoinHandle<()>,
}

impl CoordinatorHandle {
    /// Elects (via `singleton_manager`) and starts the one `ShardCoordinator`
    /// instance for `type_name`, then begins ticking `RebalanceTick` on
    /// `config.rebalance_interval`.
    pub async fn start(
        type_name: TypeName,
        config: Arc<ShardingConfig>,
        persistence: Arc<dyn CoordinatorPersistence>,
        allocation_strategy: Arc<dyn AllocationStrategy>,
        singleton_manager: Arc<dyn SingletonManager>,
    ) -> Self {
        let slot: Arc<Mutex<Option<CoordinatorRef>>> = Arc::new(Mutex::new(None));
        let factory_slot = slot.clone();
        let factory_type_name = type_name.clone();
        let factory_config = config.clone();

        let factory: SingletonFactory = Box::new(move || {
            let slot = factory_slot.clone();
            let type_name = factory_type_name.clone();
            let config = factory_config.clone();
            let persistence = persistence.clone();
            let allocation_strategy = allocation_strategy.clone();
            Box::pin(async move {
                let actor = spawn(
                    ShardCoordinator::new(type_name, config, persistence, allocation_strategy),
                    ActorId::generate(),
                );
                *slot.lock() = Some(actor);
            })
        });

        let singleton = singleton_manager.run(factory).await;
        let actor = slot
            .lock()
            .clone()
            .expect("singleton factory installs a coordinator ref before returning");

        let rebalance_ticker = {
            let actor = actor.clone();
            let interval = config.rebalance_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    if actor.send(RebalanceTick).await.is_err() {
                        break;
                    }
                }
            })
        };

        CoordinatorHandle {
            actor,
            singleton,
            _rebalance_ticker: rebalance_ticker,
        }
    }

    /// Decommission this coordinator instance. Does not stop the actor
    /// task directly - a real `SingletonManager` would use this as the
    /// signal to stop scheduling restarts for it.
    pub fn terminate(&self) {
        self.singleton.terminate();
    }
}

/// A running Shard Region for one `(node, type_name)` pair, plus the
/// `Retry` driver from §4.2. This is the handle application code holds
/// and sends messages through.
pub struct Sharding {
    node_id: NodeId,
    type_name: TypeName,
    is_proxy: bool,
    region: LocalActorRef<Region>,
    dead_letters: Arc<dyn DeadLetters>,
    _retry_ticker: JoinHandle<()>,
}

impl Sharding {
    /// Start a hosting Region: it resolves shard homes from `coordinator`,
    /// starts local Shards, and creates entities via `recipe`.
    pub async fn start(
        node_id: NodeId,
        type_name: TypeName,
        config: Arc<ShardingConfig>,
        coordinator: CoordinatorRef,
        recipe: Arc<dyn EntityRecipe>,
        remember_entities_provider: Option<Arc<dyn RememberEntitiesProvider>>,
        dead_letters: Arc<dyn DeadLetters>,
    ) -> Self {
        Sharding::start_region(
            node_id,
            type_name,
            false,
            config,
            Some(coordinator),
            recipe,
            remember_entities_provider,
            dead_letters,
        )
        .await
    }

    /// Start a proxy Region (§3, §6 Proxy Region; S6): routes to shards
    /// homed by `coordinator` but never hosts one locally. Used for
    /// cross-data-center access, where `coordinator` is the remote DC's
    /// Coordinator singleton.
    pub async fn start_proxy(
        node_id: NodeId,
        type_name: TypeName,
        config: Arc<ShardingConfig>,
        coordinator: CoordinatorRef,
        dead_letters: Arc<dyn DeadLetters>,
    ) -> Self {
        Sharding::start_region(
            node_id,
            type_name,
            true,
            config,
            Some(coordinator),
            Arc::new(UnreachableEntityRecipe),
            None,
            dead_letters,
        )
        .await
    }

    async fn start_region(
        node_id: NodeId,
        type_name: TypeName,
        is_proxy: bool,
        config: Arc<ShardingConfig>,
        coordinator: Option<CoordinatorRef>,
        recipe: Arc<dyn EntityRecipe>,
        remember_entities_provider: Option<Arc<dyn RememberEntitiesProvider>>,
        dead_letters: Arc<dyn DeadLetters>,
    ) -> Self {
        let region = spawn(
            Region::new(
                node_id.clone(),
                type_name.clone(),
                is_proxy,
                config.clone(),
                coordinator,
                recipe,
                remember_entities_provider,
                dead_letters.clone(),
            ),
            ActorId::generate(),
        );

        let retry_ticker = {
            let region = region.clone();
            let interval = config.retry_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    if region.send(Retry).await.is_err() {
                        break;
                    }
                }
            })
        };

        Sharding {
            node_id,
            type_name,
            is_proxy,
            region,
            dead_letters,
            _retry_ticker: retry_ticker,
        }
    }

    /// The addressable reference other Regions/the Coordinator use to
    /// reach this Region.
    pub fn region_ref(&self) -> RegionRef {
        RegionRef::new(
            self.node_id.clone(),
            self.type_name.clone(),
            self.is_proxy,
            self.region.clone(),
        )
    }

    /// Route `message` to its entity. Extracts `shard_id`/`entity_id` via
    /// `extractor`; a `None` from either routes to dead-letters as
    /// "unhandled" per §4.2, rather than erroring the caller.
    pub async fn send<M: Send + 'static>(
        &self,
        extractor: &dyn MessageExtractor<M>,
        message: M,
    ) -> Result<(), DeliveryError> {
        let shard_id = extractor.shard_id(&message);
        let entity_id = extractor.entity_id(&message);
        let (shard_id, entity_id) = match (shard_id, entity_id) {
            (Some(shard_id), Some(entity_id)) => (shard_id, entity_id),
            (shard_id, entity_id) => {
                self.dead_letters
                    .unhandled(shard_id, entity_id, DeadLetterReason::Unhandled);
                return Ok(());
            }
        };

        match self
            .region
            .send(Deliver {
                shard_id,
                entity_id,
                payload: Box::new(message),
            })
            .await
        {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::EntityUnavailable),
        }
    }

    /// Drain this Region's local shards and stop it (§4.2 Graceful
    /// Shutdown).
    pub async fn graceful_shutdown(&self) {
        let _ = self.region.send(GracefulShutdown).await;
    }
}
