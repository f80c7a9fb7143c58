//! Regions A, B, C start out holding the cluster's shards between them.
//! A new region D joins; the Coordinator's periodic `RebalanceTick`
//! notices the imbalance, hands shards off from the most-loaded regions,
//! and re-homes them onto D - bounded by the configured limits, never
//! touching a shard already mid-rebalance.

mod support;

use sharding::allocation::LeastShardAllocationStrategy;
use sharding::coordinator::EventSourcedCoordinatorPersistence;
use sharding::protocol::CoordinatorStateQuery;
use sharding::{LoggingDeadLetters, Sharding, ShardingConfig};
use sharding::bootstrap::CoordinatorHandle;
use sharding_cluster::{InMemoryJournal, InMemorySingletonManager};
use std::sync::Arc;
use std::time::Duration;
use support::{EchoRecipe, TestCommand, TestExtractor};
use tokio::sync::oneshot;

#[tokio::test]
async fn new_region_picks_up_shards_handed_off_from_the_busiest_region() {
    let type_name: sharding::TypeName = "Game".into();
    let config = Arc::new(ShardingConfig {
        rebalance_interval: Duration::from_millis(15),
        retry_interval: Duration::from_millis(15),
        least_shard_allocation_absolute_limit: 3,
        least_shard_allocation_relative_limit: 1.0,
        ..ShardingConfig::default()
    });

    let persistence = Arc::new(EventSourcedCoordinatorPersistence::new(Arc::new(
        InMemoryJournal::new(),
    )));
    let allocation_strategy = Arc::new(LeastShardAllocationStrategy::new(
        config.least_shard_allocation_absolute_limit,
        config.least_shard_allocation_relative_limit,
    ));
    let coordinator = CoordinatorHandle::start(
        type_name.clone(),
        config.clone(),
        persistence,
        allocation_strategy,
        Arc::new(InMemorySingletonManager::new()),
    )
    .await;

    let recipe = Arc::new(EchoRecipe::new());
    let dead_letters = LoggingDeadLetters::new();

    let mut regions = Vec::new();
    for node in ["A", "B", "C"] {
        regions.push(
            Sharding::start(
                node.into(),
                type_name.clone(),
                config.clone(),
                coordinator.actor.clone(),
                recipe.clone(),
                None,
                dead_letters.clone(),
            )
            .await,
        );
    }

    // Home 30 shards across A/B/C; least-shard placement converges to an
    // even 10/10/10 split since those are the only hosting regions yet.
    for i in 0..30u32 {
        let (reply, reply_rx) = oneshot::channel();
        regions[0]
            .send(
                &TestExtractor,
                TestCommand::Ping {
                    shard_id: i.to_string().as_str().into(),
                    entity_id: "seed".into(),
                    reply,
                },
            )
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), reply_rx)
            .await
            .expect("seed entity never answered")
            .unwrap();
    }

    let before = coordinator.actor.send(CoordinatorStateQuery).await.unwrap();
    assert_eq!(before.allocations.values().map(Vec::len).sum::<usize>(), 30);
    assert!(!before.allocations.contains_key(&"D".into()));

    let region_d = Sharding::start(
        "D".into(),
        type_name,
        config,
        coordinator.actor.clone(),
        recipe,
        None,
        dead_letters,
    )
    .await;
    let _ = &region_d;

    let mut moved_to_d = 0;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(25)).await;
        let snapshot = coordinator.actor.send(CoordinatorStateQuery).await.unwrap();
        moved_to_d = snapshot.allocations.get(&"D".into()).map(Vec::len).unwrap_or(0);
        if moved_to_d > 0 {
            break;
        }
    }

    assert!(
        moved_to_d > 0,
        "expected the coordinator to have handed at least one shard off to the new region"
    );
}
