use crate::protocol::TypeName;
use thiserror::Error;

/// Propagation policy: local recoverable errors are absorbed and
/// retried by the actor that saw them and never appear here. Only
/// persistent configuration errors and user-visible delivery failures
/// reach a caller as a typed `Result`.
#[derive(Debug, Error)]
pub enum ShardingError {
    #[error("shard type not started: {0}")]
    ShardTypeNotStarted(TypeName),

    #[error("shard type already started: {0}")]
    ShardTypeAlreadyStarted(TypeName),

    #[error("invalid sharding configuration: {0}")]
    InvalidConfig(#[from] crate::config::ConfigError),

    #[error("coordinator unavailable")]
    CoordinatorUnavailable,

    #[error("region actor unavailable: {0}")]
    RegionUnavailable(#[from] sharding_core::ActorRefErr),
}

/// User-visible delivery failures, surfaced per-message rather than
/// aborting the whole Region/Shard.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("message dropped: shard is handing off")]
    HandoffInProgress,

    #[error("message dropped: buffer overflow")]
    BufferOverflow,

    #[error("entity unavailable")]
    EntityUnavailable,

    #[error("shard type not started")]
    ShardTypeNotStarted,
}

/// An `AllocationStrategy` call failed. Per §7, this is never fatal: the
/// Coordinator treats it as "no action this tick", logs it, and the next
/// `RebalanceTick`/`GetShardHome` retries from scratch.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AllocationError {
    #[error("allocation strategy declined to place the shard")]
    NoEligibleRegion,

    #[error("allocation strategy failed: {0}")]
    StrategyFailed(String),
}
