//! Allocation Strategy: a pure policy over a snapshot of current
//! allocations, deciding new-shard placement and the rebalance set.

mod least_shard;
mod legacy;

pub use least_shard::LeastShardAllocationStrategy;
pub use legacy::LegacyThresholdAllocationStrategy;

use crate::error::AllocationError;
use crate::protocol::{RegionRef, ShardId};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

/// Implementations MUST be deterministic given
/// the same inputs, MUST NOT propose moving a shard already in
/// `rebalance_in_progress`, and MUST NOT return a region absent from
/// `current_allocations`. An `Err` is equivalent to "no action this
/// tick" per §7 - the Coordinator logs it and the next tick retries;
/// it is never fatal.
#[async_trait]
pub trait AllocationStrategy: Send + Sync {
    async fn rebalance(
        &self,
        current_allocations: &HashMap<RegionRef, HashSet<ShardId>>,
        rebalance_in_progress: &HashSet<ShardId>,
    ) -> Result<HashSet<ShardId>, AllocationError>;

    async fn allocate_shard(
        &self,
        requester: &RegionRef,
        shard_id: &ShardId,
        current_allocations: &HashMap<RegionRef, HashSet<ShardId>>,
    ) -> Result<RegionRef, AllocationError>;
}

/// Regions that host shards, sorted by `node_id` for deterministic
/// tie-breaks. Proxy regions never host shards and are always excluded.
pub(crate) fn hosting_regions<'a>(
    current_allocations: &'a HashMap<RegionRef, HashSet<ShardId>>,
) -> Vec<(&'a RegionRef, &'a HashSet<ShardId>)> {
    let mut regions: Vec<_> = current_allocations
        .iter()
        .filter(|(region, _)| !region.is_proxy)
        .collect();
    regions.sort_by(|a, b| a.0.node_id.cmp(&b.0.node_id));
    regions
}
