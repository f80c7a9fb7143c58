//! The data model and wire message contracts for cluster sharding.
//! Implementations MUST preserve these shapes across rolling upgrades -
//! they are the control-plane contracts between Region, Shard and
//! Coordinator, transcribed as `sharding_core::Message` impls.

use crate::coordinator::ShardCoordinator;
use crate::region::Region;
use serde::{Deserialize, Serialize};
use sharding_core::{LocalActorRef, Message};
use std::fmt;

macro_rules! string_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_newtype!(TypeName);
string_newtype!(ShardId);
string_newtype!(EntityId);
string_newtype!(NodeId);

/// Addressable reference to a Shard Region on some node. Equality/identity
/// is by `(node_id, type_name)` - a node hosts at most one Region actor
/// per entity type - not by the underlying actor handle: references
/// across components are addresses, not owning pointers.
///
/// Real cross-process delivery (wire-level remoting/serialization) is
/// explicitly out of scope here; within this crate every `RegionRef`
/// still resolves to a deliverable in-process mailbox so the handoff and
/// rebalance protocols can be exercised end-to-end in tests without a
/// network. A production build swaps `actor` for a handle that serializes
/// and ships bytes to the named node instead.
#[derive(Clone)]
pub struct RegionRef {
    pub node_id: NodeId,
    pub type_name: TypeName,
    pub is_proxy: bool,
    pub(crate) actor: LocalActorRef<Region>,
}

impl RegionRef {
    pub fn new(node_id: NodeId, type_name: TypeName, is_proxy: bool, actor: LocalActorRef<Region>) -> Self {
        RegionRef {
            node_id,
            type_name,
            is_proxy,
            actor,
        }
    }
}

impl PartialEq for RegionRef {
    fn eq(&self, other: &Self) -> bool {
        self.node_id == other.node_id && self.type_name == other.type_name
    }
}

impl Eq for RegionRef {}

impl std::hash::Hash for RegionRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.node_id.hash(state);
        self.type_name.hash(state);
    }
}

impl fmt::Debug for RegionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionRef")
            .field("node_id", &self.node_id)
            .field("type_name", &self.type_name)
            .field("is_proxy", &self.is_proxy)
            .finish()
    }
}

pub type CoordinatorRef = LocalActorRef<ShardCoordinator>;

// ---------------------------------------------------------------------
// Region <-> Coordinator control protocol
// ---------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Register {
    pub region: RegionRef,
}
impl Message for Register {
    type Result = RegisterAck;
}

#[derive(Debug, Clone)]
pub struct RegisterProxy {
    pub region: RegionRef,
}
impl Message for RegisterProxy {
    type Result = RegisterAck;
}

#[derive(Debug, Clone)]
pub struct RegisterAck {
    pub coordinator: CoordinatorRef,
}
impl Message for RegisterAck {
    type Result = ();
}

#[derive(Debug, Clone)]
pub struct GetShardHome {
    pub shard_id: ShardId,
    pub requester: RegionRef,
}
impl Message for GetShardHome {
    type Result = GetShardHomeResult;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetShardHomeResult {
    ShardHome(ShardId, RegionRef),
    ShardHomeDeallocated(ShardId),
    /// The allocation strategy declined, or persisting the allocation
    /// failed - the coordinator does not ack and the region retries on
    /// its own schedule.
    NoAnswer,
}

#[derive(Debug, Clone)]
pub struct HostShard {
    pub shard_id: ShardId,
}
impl Message for HostShard {
    type Result = ShardStarted;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardStarted {
    pub shard_id: ShardId,
}

#[derive(Debug, Clone)]
pub struct BeginHandOff {
    pub shard_id: ShardId,
}
impl Message for BeginHandOff {
    type Result = BeginHandOffAck;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeginHandOffAck {
    pub shard_id: ShardId,
}

#[derive(Debug, Clone)]
pub struct HandOff {
    pub shard_id: ShardId,
}
impl Message for HandOff {
    type Result = ShardStopped;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardStopped {
    pub shard_id: ShardId,
}

#[derive(Debug, Clone)]
pub struct GracefulShutdownReq {
    pub region: RegionRef,
}
impl Message for GracefulShutdownReq {
    type Result = ();
}

/// Delivered by cluster membership when a region's node leaves the
/// cluster or is confirmed unreachable for good.
#[derive(Debug, Clone)]
pub struct RegionTerminated {
    pub region_node: NodeId,
}
impl Message for RegionTerminated {
    type Result = ();
}

#[derive(Debug, Clone)]
pub struct RebalanceTick;
impl Message for RebalanceTick {
    type Result = ();
}

#[derive(Debug, Clone)]
pub struct CoordinatorStateQuery;
impl Message for CoordinatorStateQuery {
    type Result = CoordinatorStateSnapshot;
}

#[derive(Debug, Clone, Default)]
pub struct CoordinatorStateSnapshot {
    pub allocations: std::collections::HashMap<NodeId, Vec<ShardId>>,
    pub unallocated: Vec<ShardId>,
    pub rebalancing: Vec<ShardId>,
}

// ---------------------------------------------------------------------
// Region <-> Shard, entity envelope
// ---------------------------------------------------------------------

/// A user message addressed to a single entity, after the region has
/// extracted routing keys via a `MessageExtractor`.
#[derive(Debug, Clone)]
pub struct EntityEnvelope<M> {
    pub shard_id: ShardId,
    pub entity_id: EntityId,
    pub message: M,
}

/// User code implements this once per entity type to derive `ShardId`/
/// `EntityId` from an incoming message. Returning `None` routes the
/// message to dead-letters as "unhandled".
pub trait MessageExtractor<M>: Send + Sync {
    fn shard_id(&self, message: &M) -> Option<ShardId>;
    fn entity_id(&self, message: &M) -> Option<EntityId>;
}

/// Reason a message never reached its destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeadLetterReason {
    Unhandled,
    BufferOverflow,
    HandoffInProgress,
    ShardTypeNotStarted,
}
