//! Reference (in-memory) implementations of the collaborators the core
//! treats as external: cluster membership, the durability journal, the
//! CRDT replicator, and the singleton manager that elects the coordinator.
//!
//! None of this is part of the sharding core itself - a real deployment
//! swaps every one of these for a cluster membership/gossip library, a
//! real journal plugin (e.g. backed by a WAL or object store), a CRDT
//! replicator, and a singleton-election mechanism. These exist so the
//! `sharding` crate's integration tests can exercise the full protocol
//! in-process, and so examples have somewhere to start from.

mod journal;
mod logging;
mod membership;
mod replicator;
mod singleton;

pub use journal::{InMemoryJournal, Journal, JournalError};
pub use logging::init_test_logging;
pub use membership::{InMemoryMembership, Member, MemberEvent, MemberStatus, Membership};
pub use replicator::{InMemoryReplicator, QuorumError, Replicator};
pub use singleton::{Factory as SingletonFactory, InMemorySingletonManager, SingletonHandle, SingletonManager};
