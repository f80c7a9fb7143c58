use async_trait::async_trait;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A handle to a running singleton instance. Dropping it does not stop the
/// instance; call `terminate` to decommission it explicitly.
pub struct SingletonHandle {
    terminated: Arc<Mutex<bool>>,
}

impl SingletonHandle {
    pub fn terminate(&self) {
        *self.terminated.lock() = true;
    }

    pub fn is_terminated(&self) -> bool {
        *self.terminated.lock()
    }
}

pub type Factory = Box<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Elects and restarts exactly one instance of a singleton (the Shard
/// Coordinator) cluster-wide. A real implementation ties
/// this to cluster membership's oldest-member rule and restarts on
/// failover; this in-memory stand-in runs the factory's startup routine
/// on-demand, immediately, with no real election (single-process tests
/// have nothing else to elect against).
#[async_trait]
pub trait SingletonManager: Send + Sync {
    async fn run(&self, start: Factory) -> SingletonHandle;
}

pub struct InMemorySingletonManager;

impl InMemorySingletonManager {
    pub fn new() -> Self {
        InMemorySingletonManager
    }
}

impl Default for InMemorySingletonManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SingletonManager for InMemorySingletonManager {
    async fn run(&self, start: Factory) -> SingletonHandle {
        start().await;
        SingletonHandle {
            terminated: Arc::new(Mutex::new(false)),
        }
    }
}
