use crate::protocol::{NodeId, RegionRef, ShardId};
use std::collections::{HashMap, HashSet};

/// Per-shard handoff state machine: `Allocated` is the only state
/// observable across a coordinator restart (it is the only one recorded
/// by a persisted event); `BeginningHandOff`/`HandingOff` are in-flight,
/// in-memory only, and are idempotently re-driven rather than replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardStatus {
    Allocated(NodeId),
    BeginningHandOff(NodeId),
    HandingOff(NodeId),
    Unallocated,
}

/// The coordinator's live working state: the handoff FSM per shard plus
/// the set of regions/proxies currently registered *with this instance*.
/// `registered_regions`/`registered_proxies` hold live, dispatchable
/// `RegionRef`s and are never persisted directly - only the fact that a
/// node was registered is (`ShardRegionRegistered`/`...Proxy...`); after a
/// coordinator failover the new instance knows *which* nodes were
/// members but has no live ref until each region re-`Register`s.
#[derive(Debug, Default)]
pub struct CoordinatorState {
    pub shards: HashMap<ShardId, ShardStatus>,
    pub known_regions: HashSet<NodeId>,
    pub known_proxies: HashSet<NodeId>,
    pub registered_regions: HashMap<NodeId, RegionRef>,
    pub registered_proxies: HashMap<NodeId, RegionRef>,
}

impl CoordinatorState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocation Map, restricted to regions this instance currently
    /// has a live ref for - a shard allocated to a node that
    /// hasn't re-registered yet since a failover is omitted, not wrongly
    /// reported, per the "never inconsistent" Non-goal.
    pub fn allocations(&self) -> HashMap<RegionRef, HashSet<ShardId>> {
        let mut map: HashMap<RegionRef, HashSet<ShardId>> = HashMap::new();
        for (shard_id, status) in &self.shards {
            if let ShardStatus::Allocated(node) = status {
                if let Some(region) = self.registered_regions.get(node) {
                    map.entry(region.clone()).or_default().insert(shard_id.clone());
                }
            }
        }
        // Regions with zero shards still participate in allocation
        // decisions (a freshly joined node must be chosen over a loaded
        // one), so ensure every known, live-registered region appears.
        for region in self.registered_regions.values() {
            map.entry(region.clone()).or_default();
        }
        map
    }

    pub fn pending_rebalance(&self) -> HashSet<ShardId> {
        self.shards
            .iter()
            .filter(|(_, status)| {
                matches!(status, ShardStatus::BeginningHandOff(_) | ShardStatus::HandingOff(_))
            })
            .map(|(shard_id, _)| shard_id.clone())
            .collect()
    }

    pub fn unallocated(&self) -> Vec<ShardId> {
        self.shards
            .iter()
            .filter(|(_, status)| matches!(status, ShardStatus::Unallocated))
            .map(|(shard_id, _)| shard_id.clone())
            .collect()
    }
}
