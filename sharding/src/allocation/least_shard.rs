use super::{hosting_regions, AllocationStrategy};
use crate::error::AllocationError;
use crate::protocol::{RegionRef, ShardId};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

/// Default allocation algorithm ("least-shard"):
///
/// - New-shard placement always goes to the region with the fewest
///   currently allocated shards, ties broken by `node_id` ordering.
/// - Rebalance triggers only when `most - least > 1`; it moves up to
///   `min(absolute_limit, ceil(relative_limit * num_regions))` shards,
///   drawn from the most-loaded region(s) down toward the cluster-wide
///   average, never touching a shard already mid-rebalance.
pub struct LeastShardAllocationStrategy {
    pub absolute_limit: u32,
    pub relative_limit: f64,
}

impl LeastShardAllocationStrategy {
    pub fn new(absolute_limit: u32, relative_limit: f64) -> Self {
        LeastShardAllocationStrategy {
            absolute_limit,
            relative_limit,
        }
    }
}

#[async_trait]
impl AllocationStrategy for LeastShardAllocationStrategy {
    async fn rebalance(
        &self,
        current_allocations: &HashMap<RegionRef, HashSet<ShardId>>,
        rebalance_in_progress: &HashSet<ShardId>,
    ) -> Result<HashSet<ShardId>, AllocationError> {
        let regions = hosting_regions(current_allocations);
        if regions.len() < 2 {
            return Ok(HashSet::new());
        }

        let counts: Vec<usize> = regions.iter().map(|(_, shards)| shards.len()).collect();
        let most = *counts.iter().max().unwrap();
        let least = *counts.iter().min().unwrap();
        if most.saturating_sub(least) <= 1 {
            return Ok(HashSet::new());
        }

        let num_regions = regions.len();
        let relative_cap =
            ((self.relative_limit * num_regions as f64).ceil() as usize).max(1);
        let max_to_move = (self.absolute_limit as usize).min(relative_cap);

        let total: usize = counts.iter().sum();
        let target = (total as f64 / num_regions as f64).ceil() as usize;

        let mut by_load_desc = regions;
        by_load_desc.sort_by(|a, b| {
            b.1.len()
                .cmp(&a.1.len())
                .then_with(|| a.0.node_id.cmp(&b.0.node_id))
        });

        let mut chosen = HashSet::new();
        for (region, shards) in by_load_desc {
            if chosen.len() >= max_to_move {
                break;
            }
            if shards.len() <= target {
                continue;
            }

            let mut candidates: Vec<&ShardId> = shards
                .iter()
                .filter(|shard_id| !rebalance_in_progress.contains(shard_id))
                .collect();
            candidates.sort();

            let take = (shards.len() - target).min(max_to_move - chosen.len());
            for shard_id in candidates.into_iter().take(take) {
                let _ = region;
                chosen.insert(shard_id.clone());
            }
        }

        Ok(chosen)
    }

    async fn allocate_shard(
        &self,
        _requester: &RegionRef,
        _shard_id: &ShardId,
        current_allocations: &HashMap<RegionRef, HashSet<ShardId>>,
    ) -> Result<RegionRef, AllocationError> {
        hosting_regions(current_allocations)
            .into_iter()
            .min_by(|a, b| {
                a.1.len()
                    .cmp(&b.1.len())
                    .then_with(|| a.0.node_id.cmp(&b.0.node_id))
            })
            .map(|(region, _)| region.clone())
            .ok_or(AllocationError::NoEligibleRegion)
    }
}
