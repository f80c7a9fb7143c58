//! User entity business logic is an external collaborator: the core only
//! needs a narrow, type-erased contract so `Shard` can manage lifecycle
//! without being generic over every possible user message type. A real
//! application wraps its typed entity actor behind this trait once at
//! the edge.

use crate::protocol::EntityId;
use async_trait::async_trait;
use std::any::Any;

/// What handling one message tells the owning `Shard` to do next. Any
/// application-level reply to the original sender is the entity's own
/// business - e.g. a reply channel embedded in the message payload - and
/// is entirely opaque to the routing layer, which only ever promises
/// at-most-once delivery, not a synchronous answer.
pub enum EntityResponse {
    /// The message was handled; no lifecycle change.
    Handled,
    /// The entity asks to be passivated: buffer further messages and
    /// deliver `stop_message` next; when that delivery itself resolves
    /// to `Stopped`, replay the buffer into a fresh incarnation.
    Passivate(Box<dyn Any + Send>),
    /// This incarnation is finished handling messages; the Shard tears
    /// it down. Returned by an entity after processing its stop-message,
    /// whether from passivation or from hand-off.
    Stopped,
}

#[async_trait]
pub trait Entity: Send + 'static {
    async fn handle(&mut self, message: Box<dyn Any + Send>) -> EntityResponse;
}

/// Produces a fresh entity incarnation and the fixed message every
/// incarnation of every entity in this shard type is sent during
/// hand-off, regardless of whatever entity-chosen message a given
/// `Passivate` used.
pub trait EntityRecipe: Send + Sync {
    fn new_entity(&self, entity_id: &EntityId) -> Box<dyn Entity>;
    fn handoff_stop_message(&self) -> Box<dyn Any + Send>;
}
