//! Minimal actor kernel: a single-threaded-mailbox executor per actor
//! instance, scheduled onto a shared tokio thread pool.
//!
//! This is the substrate the `sharding` crate's Coordinator, Region and
//! Shard actors run on. It carries none of the sharding domain logic -
//! only the "one mailbox, one message at a time, suspend only between
//! messages" execution model.

mod actor;
mod actor_ref;
mod context;
mod message;
mod registry;

pub use actor::{Actor, ActorId};
pub use actor_ref::{spawn, ActorRefErr, LocalActorRef};
pub use context::ActorContext;
pub use message::{Handler, Message};
pub use registry::Registry;
