use super::{hosting_regions, AllocationStrategy};
use crate::error::AllocationError;
use crate::protocol::{RegionRef, ShardId};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

/// Legacy allocation algorithm: operates on a single threshold and a
/// max-simultaneous-rebalance cap. Placement is the same least-loaded
/// rule as the default strategy; only the rebalance trigger and cap
/// differ.
pub struct LegacyThresholdAllocationStrategy {
    pub threshold: u32,
    pub max_simultaneous_rebalance: u32,
}

impl LegacyThresholdAllocationStrategy {
    pub fn new(threshold: u32, max_simultaneous_rebalance: u32) -> Self {
        LegacyThresholdAllocationStrategy {
            threshold,
            max_simultaneous_rebalance,
        }
    }
}

#[async_trait]
impl AllocationStrategy for LegacyThresholdAllocationStrategy {
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
        if most.saturating_sub(least) < self.threshold as usize {
            return Ok(HashSet::new());
        }

        let mut by_load_desc = regions;
        by_load_desc.sort_by(|a, b| {
            b.1.len()
                .cmp(&a.1.len())
                .then_with(|| a.0.node_id.cmp(&b.0.node_id))
        });

        let cap = self.max_simultaneous_rebalance as usize;
        let mut chosen = HashSet::new();
        for (_, shards) in by_load_desc {
            if chosen.len() >= cap {
                break;
            }
            let mut candidates: Vec<&ShardId> = shards
                .iter()
                .filter(|shard_id| !rebalance_in_progress.contains(shard_id))
                .collect();
            candidates.sort();
            for shard_id in candidates {
                if chosen.len() >= cap {
                    break;
                }
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
