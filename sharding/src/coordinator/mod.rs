//! Shard Coordinator: the process-wide singleton authority over shard
//! placement. Holds the Allocation Map, drives rebalance, and is the only
//! component that persists an allocation decision before anyone acts on
//! it.

mod persistence;
mod state;

pub use persistence::{
    CoordinatorEvent, CoordinatorPersistence, CoordinatorSnapshot, EventSourcedCoordinatorPersistence,
    PersistenceError, ReplicatedCoordinatorPersistence,
};
pub use state::{CoordinatorState, ShardStatus};

use crate::allocation::AllocationStrategy;
use crate::config::ShardingConfig;
use crate::protocol::{
    BeginHandOff, CoordinatorStateQuery, CoordinatorStateSnapshot, GetShardHome, GetShardHomeResult,
    GracefulShutdownReq, HandOff, HostShard, NodeId, Register, RegisterAck, RegionRef, RegisterProxy,
    RegionTerminated, RebalanceTick, ShardId, TypeName,
};
use async_trait::async_trait;
use sharding_core::{Actor, ActorContext, Handler, Message};
use std::sync::Arc;
use tracing::{info, warn};

pub struct ShardCoordinator {
    type_name: TypeName,
    config: Arc<ShardingConfig>,
    persistence: Arc<dyn CoordinatorPersistence>,
    allocation_strategy: Arc<dyn AllocationStrategy>,
    state: CoordinatorState,
}

impl ShardCoordinator {
    pub fn new(
        type_name: TypeName,
        config: Arc<ShardingConfig>,
        persistence: Arc<dyn CoordinatorPersistence>,
        allocation_strategy: Arc<dyn AllocationStrategy>,
    ) -> Self {
        ShardCoordinator {
            type_name,
            config,
            persistence,
            allocation_strategy,
            state: CoordinatorState::new(),
        }
    }

    fn begin_handoff(&mut self, shard_id: ShardId, node: NodeId, ctx: &ActorContext<Self>) {
        let region = match self.state.registered_regions.get(&node) {
            Some(region) => region.clone(),
            None => return,
        };
        self.state
            .shards
            .insert(shard_id.clone(), ShardStatus::BeginningHandOff(node.clone()));

        let self_ref = ctx.actor_ref();
        let timeout = self.config.handoff_timeout;
        tokio::spawn(async move {
            let begin_ok = tokio::time::timeout(
                timeout,
                region.actor.send(BeginHandOff {
                    shard_id: shard_id.clone(),
                }),
            )
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false);

            if !begin_ok {
                let _ = self_ref
                    .notify(HandoffCompleted {
                        shard_id,
                        node,
                        outcome: HandoffOutcome::TimedOut,
                    })
                    .await;
                return;
            }

            // Advance BeginningHandOff -> HandingOff before the stop itself
            // goes out, matching §5's total order per shard; `send` (not
            // `notify`) blocks on the handler completing so the state is
            // updated before we proceed.
            let _ = self_ref
                .send(HandoffAdvanced {
                    shard_id: shard_id.clone(),
                    node: node.clone(),
                })
                .await;

            let outcome = match tokio::time::timeout(
                timeout,
                region.actor.send(HandOff {
                    shard_id: shard_id.clone(),
                }),
            )
            .await
            {
                Ok(Ok(_stopped)) => HandoffOutcome::Stopped,
                _ => HandoffOutcome::TimedOut,
            };

            let _ = self_ref
                .notify(HandoffCompleted {
                    shard_id,
                    node,
                    outcome,
                })
                .await;
        });
    }

    /// Allocate `shard_id` via the configured strategy, persist the
    /// decision, mark it `Allocated`, and tell the chosen region to host
    /// it - the same sequence used for first-time placement in
    /// `GetShardHome` and for proactively re-homing a shard immediately
    /// after its hand-off drains (spec.md §2 step 6: "Coordinator then
    /// allocates the shard to a new Region"). Returns `None` (no action
    /// this tick) if the strategy declines or persistence fails.
    async fn allocate_shard_home(&mut self, shard_id: ShardId, requester: &RegionRef) -> Option<RegionRef> {
        let allocations = self.state.allocations();
        let region = match self
            .allocation_strategy
            .allocate_shard(requester, &shard_id, &allocations)
            .await
        {
            Ok(region) => region,
            Err(err) => {
                warn!(shard_id = %shard_id, ?err, "allocation strategy declined, no action this tick");
                return None;
            }
        };

        let event = CoordinatorEvent::ShardHomeAllocated(shard_id.clone(), region.node_id.clone());
        if let Err(err) = self.persistence.record(&self.type_name, &event).await {
            warn!(shard_id = %shard_id, ?err, "failed to persist shard allocation");
            return None;
        }

        self.state
            .shards
            .insert(shard_id.clone(), ShardStatus::Allocated(region.node_id.clone()));

        match tokio::time::timeout(
            self.config.shard_start_timeout,
            region.actor.send(HostShard {
                shard_id: shard_id.clone(),
            }),
        )
        .await
        {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                warn!(shard_id = %shard_id, ?err, "failed to notify region to host shard")
            }
            Err(_) => {
                warn!(shard_id = %shard_id, "timed out waiting for region to host shard")
            }
        }

        Some(region)
    }
}

#[async_trait]
impl Actor for ShardCoordinator {
    async fn started(&mut self, _ctx: &mut ActorContext<Self>) {
        let snapshot = self.persistence.load(&self.type_name).await;
        for (shard_id, node) in snapshot.shard_homes {
            self.state.shards.insert(shard_id, ShardStatus::Allocated(node));
        }
        self.state.known_regions = snapshot.known_regions;
        self.state.known_proxies = snapshot.known_proxies;
        info!(type_name = %self.type_name, shards = self.state.shards.len(), "coordinator started");
    }
}

/// Internal continuation posted to self once `BeginHandOff` is acked,
/// advancing the per-shard state machine from `BeginningHandOff` to
/// `HandingOff` before the stop message itself goes out.
#[derive(Debug, Clone)]
struct HandoffAdvanced {
    shard_id: ShardId,
    node: NodeId,
}
impl Message for HandoffAdvanced {
    type Result = ();
}

/// Internal continuation posted to self once a spawned handoff round trip
/// finishes - kept off the public wire protocol since no other component
/// ever sends it.
#[derive(Debug, Clone)]
struct HandoffCompleted {
    shard_id: ShardId,
    node: NodeId,
    outcome: HandoffOutcome,
}
impl Message for HandoffCompleted {
    type Result = ();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandoffOutcome {
    Stopped,
    TimedOut,
}

#[async_trait]
impl Handler<HandoffAdvanced> for ShardCoordinator {
    async fn handle(&mut self, msg: HandoffAdvanced, _ctx: &mut ActorContext<Self>) {
        // Only advance if still BeginningHandOff for this same node - a
        // concurrent RegionTerminated could already have moved the shard
        // to Unallocated in the meantime, and that transition must win.
        if matches!(
            self.state.shards.get(&msg.shard_id),
            Some(ShardStatus::BeginningHandOff(n)) if *n == msg.node
        ) {
            self.state
                .shards
                .insert(msg.shard_id, ShardStatus::HandingOff(msg.node));
        }
    }
}

#[async_trait]
impl Handler<HandoffCompleted> for ShardCoordinator {
    async fn handle(&mut self, msg: HandoffCompleted, _ctx: &mut ActorContext<Self>) {
        match msg.outcome {
            HandoffOutcome::Stopped => {
                let event = CoordinatorEvent::ShardHomeDeallocated(msg.shard_id.clone());
                if self.persistence.record(&self.type_name, &event).await.is_ok() {
                    self.state
                        .shards
                        .insert(msg.shard_id.clone(), ShardStatus::Unallocated);

                    // Proactively re-home the freed shard rather than
                    // waiting for new traffic to trigger GetShardHome -
                    // spec.md §2 step 6: "Coordinator then allocates the
                    // shard to a new Region". The old owner (if still
                    // live) stands in as the strategy's `requester`
                    // argument; both shipped strategies ignore it for
                    // this decision and only use it for placement of a
                    // never-before-seen shard.
                    let requester = self
                        .state
                        .registered_regions
                        .get(&msg.node)
                        .cloned()
                        .or_else(|| self.state.registered_regions.values().next().cloned());
                    if let Some(requester) = requester {
                        self.allocate_shard_home(msg.shard_id, &requester).await;
                    }
                } else {
                    warn!(shard_id = %msg.shard_id, "failed to persist hand-off completion, leaving shard in hand-off state for the next tick to retry");
                }
            }
            HandoffOutcome::TimedOut => {
                warn!(shard_id = %msg.shard_id, node = %msg.node, "hand-off timed out, reverting to allocated");
                self.state
                    .shards
                    .insert(msg.shard_id, ShardStatus::Allocated(msg.node));
            }
        }
    }
}

#[async_trait]
impl Handler<Register> for ShardCoordinator {
    async fn handle(&mut self, msg: Register, ctx: &mut ActorContext<Self>) -> RegisterAck {
        let node = msg.region.node_id.clone();
        if !self.state.known_regions.contains(&node) {
            let event = CoordinatorEvent::ShardRegionRegistered(node.clone());
            if let Err(err) = self.persistence.record(&self.type_name, &event).await {
                warn!(%node, ?err, "failed to persist region registration, will retry on next register");
            } else {
                self.state.known_regions.insert(node.clone());
            }
        }
        self.state.registered_regions.insert(node, msg.region);
        RegisterAck {
            coordinator: ctx.actor_ref(),
        }
    }
}

#[async_trait]
impl Handler<RegisterProxy> for ShardCoordinator {
    async fn handle(&mut self, msg: RegisterProxy, ctx: &mut ActorContext<Self>) -> RegisterAck {
        let node = msg.region.node_id.clone();
        if !self.state.known_proxies.contains(&node) {
            let event = CoordinatorEvent::ShardRegionProxyRegistered(node.clone());
            if let Err(err) = self.persistence.record(&self.type_name, &event).await {
                warn!(%node, ?err, "failed to persist proxy registration, will retry on next register");
            } else {
                self.state.known_proxies.insert(node.clone());
            }
        }
        self.state.registered_proxies.insert(node, msg.region);
        RegisterAck {
            coordinator: ctx.actor_ref(),
        }
    }
}

#[async_trait]
impl Handler<GetShardHome> for ShardCoordinator {
    async fn handle(&mut self, msg: GetShardHome, _ctx: &mut ActorContext<Self>) -> GetShardHomeResult {
        match self.state.shards.get(&msg.shard_id).cloned() {
            Some(ShardStatus::Allocated(node)) => {
                match self.state.registered_regions.get(&node) {
                    Some(region) => GetShardHomeResult::ShardHome(msg.shard_id, region.clone()),
                    // Allocated to a node that hasn't re-registered with
                    // this coordinator instance yet (post-failover
                    // window); the caller retries.
                    None => GetShardHomeResult::NoAnswer,
                }
            }
            Some(ShardStatus::BeginningHandOff(_)) | Some(ShardStatus::HandingOff(_)) => {
                GetShardHomeResult::ShardHomeDeallocated(msg.shard_id)
            }
            Some(ShardStatus::Unallocated) | None => {
                match self
                    .allocate_shard_home(msg.shard_id.clone(), &msg.requester)
                    .await
                {
                    Some(region) => GetShardHomeResult::ShardHome(msg.shard_id, region),
                    None => GetShardHomeResult::NoAnswer,
                }
            }
        }
    }
}

#[async_trait]
impl Handler<GracefulShutdownReq> for ShardCoordinator {
    async fn handle(&mut self, msg: GracefulShutdownReq, ctx: &mut ActorContext<Self>) {
        let node = msg.region.node_id.clone();
        let shard_ids: Vec<ShardId> = self
            .state
            .shards
            .iter()
            .filter(|(_, status)| matches!(status, ShardStatus::Allocated(n) if *n == node))
            .map(|(shard_id, _)| shard_id.clone())
            .collect();

        if shard_ids.is_empty() {
            return;
        }

        let region = msg.region.clone();
        let timeout = self.config.handoff_timeout;
        for shard_id in &shard_ids {
            self.state
                .shards
                .insert(shard_id.clone(), ShardStatus::BeginningHandOff(node.clone()));
        }

        let results = futures::future::join_all(shard_ids.iter().cloned().map(|shard_id| {
            let region = region.clone();
            async move {
                let begin = tokio::time::timeout(
                    timeout,
                    region.actor.send(BeginHandOff {
                        shard_id: shard_id.clone(),
                    }),
                )
                .await;
                if begin.is_err() || begin.unwrap().is_err() {
                    return (shard_id, false);
                }
                let stopped = tokio::time::timeout(
                    timeout,
                    region.actor.send(HandOff {
                        shard_id: shard_id.clone(),
                    }),
                )
                .await;
                (shard_id, stopped.is_ok() && stopped.unwrap().is_ok())
            }
        }))
        .await;

        for (shard_id, success) in results {
            if success {
                let event = CoordinatorEvent::ShardHomeDeallocated(shard_id.clone());
                if self.persistence.record(&self.type_name, &event).await.is_ok() {
                    self.state.shards.insert(shard_id, ShardStatus::Unallocated);
                } else {
                    self.state
                        .shards
                        .insert(shard_id, ShardStatus::Allocated(node.clone()));
                }
            } else {
                self.state
                    .shards
                    .insert(shard_id, ShardStatus::Allocated(node.clone()));
            }
        }

        let _ = ctx;
    }
}

#[async_trait]
impl Handler<RegionTerminated> for ShardCoordinator {
    async fn handle(&mut self, msg: RegionTerminated, _ctx: &mut ActorContext<Self>) {
        let node = msg.region_node;
        self.state.registered_regions.remove(&node);
        self.state.registered_proxies.remove(&node);

        let orphaned: Vec<ShardId> = self
            .state
            .shards
            .iter()
            .filter(|(_, status)| match status {
                ShardStatus::Allocated(n)
                | ShardStatus::BeginningHandOff(n)
                | ShardStatus::HandingOff(n) => *n == node,
                ShardStatus::Unallocated => false,
            })
            .map(|(shard_id, _)| shard_id.clone())
            .collect();

        for shard_id in orphaned {
            let event = CoordinatorEvent::ShardHomeDeallocated(shard_id.clone());
            if self.persistence.record(&self.type_name, &event).await.is_ok() {
                self.state.shards.insert(shard_id, ShardStatus::Unallocated);
            } else {
                warn!(%shard_id, "failed to persist deallocation for shard on terminated region");
            }
        }

        if self.state.known_regions.contains(&node) {
            let event = CoordinatorEvent::ShardRegionTerminated(node.clone());
            let _ = self.persistence.record(&self.type_name, &event).await;
            self.state.known_regions.remove(&node);
        }
        if self.state.known_proxies.contains(&node) {
            let event = CoordinatorEvent::ShardRegionProxyTerminated(node.clone());
            let _ = self.persistence.record(&self.type_name, &event).await;
            self.state.known_proxies.remove(&node);
        }
    }
}

#[async_trait]
impl Handler<RebalanceTick> for ShardCoordinator {
    async fn handle(&mut self, _msg: RebalanceTick, ctx: &mut ActorContext<Self>) {
        let allocations = self.state.allocations();
        let pending = self.state.pending_rebalance();
        let chosen = match self.allocation_strategy.rebalance(&allocations, &pending).await {
            Ok(chosen) => chosen,
            Err(err) => {
                warn!(?err, "allocation strategy failed this tick, retrying next tick");
                return;
            }
        };

        for shard_id in chosen {
            if let Some(ShardStatus::Allocated(node)) = self.state.shards.get(&shard_id).cloned() {
                self.begin_handoff(shard_id, node, ctx);
            }
        }
    }
}

#[async_trait]
impl Handler<CoordinatorStateQuery> for ShardCoordinator {
    async fn handle(
        &mut self,
        _msg: CoordinatorStateQuery,
        _ctx: &mut ActorContext<Self>,
    ) -> CoordinatorStateSnapshot {
        let mut allocations: std::collections::HashMap<NodeId, Vec<ShardId>> =
            std::collections::HashMap::new();
        let mut rebalancing = Vec::new();
        for (shard_id, status) in &self.state.shards {
            match status {
                ShardStatus::Allocated(node) => {
                    allocations.entry(node.clone()).or_default().push(shard_id.clone())
                }
                ShardStatus::BeginningHandOff(_) | ShardStatus::HandingOff(_) => {
                    rebalancing.push(shard_id.clone())
                }
                ShardStatus::Unallocated => {}
            }
        }
        CoordinatorStateSnapshot {
            allocations,
            unallocated: self.state.unallocated(),
            rebalancing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::LeastShardAllocationStrategy;
    use crate::config::ShardingConfig;
    use crate::protocol::RegionRef;
    use sharding_cluster::InMemoryJournal;
    use sharding_core::{spawn, ActorId};

    fn region(node: &str) -> RegionRef {
        let actor = crate::region::test_support::spawn_noop_region();
        RegionRef::new(node.into(), "TestType".into(), false, actor)
    }

    fn coordinator() -> sharding_core::LocalActorRef<ShardCoordinator> {
        let persistence = Arc::new(EventSourcedCoordinatorPersistence::new(Arc::new(
            InMemoryJournal::new(),
        )));
        let strategy = Arc::new(LeastShardAllocationStrategy::new(10, 1.0));
        spawn(
            ShardCoordinator::new(
                "TestType".into(),
                Arc::new(ShardingConfig::default()),
                persistence,
                strategy,
            ),
            ActorId::generate(),
        )
    }

    #[tokio::test]
    async fn allocates_first_request_and_reuses_the_home_on_replay() {
        let coordinator = coordinator();
        let region_a = region("a");

        coordinator
            .send(Register {
                region: region_a.clone(),
            })
            .await
            .unwrap();

        let first = coordinator
            .send(GetShardHome {
                shard_id: "1".into(),
                requester: region_a.clone(),
            })
            .await
            .unwrap();
        let home = match first {
            GetShardHomeResult::ShardHome(_, region) => region,
            other => panic!("expected ShardHome, got {other:?}"),
        };
        assert_eq!(home.node_id, NodeId::from("a"));

        let second = coordinator
            .send(GetShardHome {
                shard_id: "1".into(),
                requester: region_a,
            })
            .await
            .unwrap();
        match second {
            GetShardHomeResult::ShardHome(_, region) => assert_eq!(region.node_id, NodeId::from("a")),
            other => panic!("expected cached ShardHome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn region_termination_deallocates_its_shards() {
        let coordinator = coordinator();
        let region_a = region("a");

        coordinator
            .send(Register {
                region: region_a.clone(),
            })
            .await
            .unwrap();
        coordinator
            .send(GetShardHome {
                shard_id: "1".into(),
                requester: region_a.clone(),
            })
            .await
            .unwrap();

        coordinator
            .send(RegionTerminated {
                region_node: "a".into(),
            })
            .await
            .unwrap();

        let snapshot = coordinator.send(CoordinatorStateQuery).await.unwrap();
        assert!(snapshot.unallocated.contains(&ShardId::from("1")));
    }
}
