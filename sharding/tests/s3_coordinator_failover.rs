//! The Coordinator singleton is re-elected on another node after a
//! failure. The new instance replays the allocation map from the shared
//! journal, so it already knows shard "42" belongs to node A - but it
//! cannot answer `GetShardHome` for it until region A re-registers, since
//! the live `RegionRef` handle isn't part of what gets persisted.

mod support;

use sharding::allocation::LeastShardAllocationStrategy;
use sharding::bootstrap::CoordinatorHandle;
use sharding::coordinator::EventSourcedCoordinatorPersistence;
use sharding::protocol::{GetShardHome, GetShardHomeResult, Register};
use sharding::{LoggingDeadLetters, NodeId, Sharding, ShardingConfig};
use sharding_cluster::{InMemoryJournal, InMemorySingletonManager};
use std::sync::Arc;
use std::time::Duration;
use support::{EchoRecipe, TestCommand, TestExtractor};
use tokio::sync::oneshot;

#[tokio::test]
async fn new_coordinator_instance_needs_a_re_register_before_it_can_answer() {
    let type_name: sharding::TypeName = "Game".into();
    let config = Arc::new(ShardingConfig::default());
    let shared_journal = Arc::new(InMemoryJournal::new());

    let persistence1 = Arc::new(EventSourcedCoordinatorPersistence::new(shared_journal.clone()));
    let strategy1 = Arc::new(LeastShardAllocationStrategy::new(10, 1.0));
    let coordinator1 = CoordinatorHandle::start(
        type_name.clone(),
        config.clone(),
        persistence1,
        strategy1,
        Arc::new(InMemorySingletonManager::new()),
    )
    .await;

    let recipe = Arc::new(EchoRecipe::new());
    let region_a = Sharding::start(
        "A".into(),
        type_name.clone(),
        config.clone(),
        coordinator1.actor.clone(),
        recipe,
        None,
        LoggingDeadLetters::new(),
    )
    .await;

    let (reply, reply_rx) = oneshot::channel();
    region_a
        .send(
            &TestExtractor,
            TestCommand::Ping {
                shard_id: "42".into(),
                entity_id: "alpha".into(),
                reply,
            },
        )
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(2), reply_rx)
        .await
        .expect("entity never answered")
        .unwrap();

    // Coordinator 1 crashes; a fresh instance takes over, loading the same
    // journal.
    coordinator1.actor.stop().await;
    coordinator1.terminate();

    let persistence2 = Arc::new(EventSourcedCoordinatorPersistence::new(shared_journal));
    let strategy2 = Arc::new(LeastShardAllocationStrategy::new(10, 1.0));
    let coordinator2 = CoordinatorHandle::start(
        type_name,
        config,
        persistence2,
        strategy2,
        Arc::new(InMemorySingletonManager::new()),
    )
    .await;

    let region_a_ref = region_a.region_ref();

    let before_reregister = coordinator2
        .actor
        .send(GetShardHome {
            shard_id: "42".into(),
            requester: region_a_ref.clone(),
        })
        .await
        .unwrap();
    assert_eq!(before_reregister, GetShardHomeResult::NoAnswer);

    coordinator2
        .actor
        .send(Register {
            region: region_a_ref.clone(),
        })
        .await
        .unwrap();

    let after_reregister = coordinator2
        .actor
        .send(GetShardHome {
            shard_id: "42".into(),
            requester: region_a_ref,
        })
        .await
        .unwrap();
    match after_reregister {
        GetShardHomeResult::ShardHome(shard_id, region) => {
            assert_eq!(shard_id.as_str(), "42");
            assert_eq!(region.node_id, NodeId::from("A"));
        }
        other => panic!("expected the shard to resolve to region A, got {other:?}"),
    }
}
