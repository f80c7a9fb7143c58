use crate::actor::Actor;
use crate::context::ActorContext;
use async_trait::async_trait;

/// A typed request with a typed response, the unit of cross-actor
/// communication. Messages never carry a reference back into the sender -
/// only values.
pub trait Message: Send + 'static {
    type Result: Send + 'static;
}

/// Implemented once per `(Actor, Message)` pair an actor accepts. Handlers
/// run to completion without yielding to another message; suspension
/// happens only at the `.await` of the *next* mailbox item, never inside
/// one (see the concurrency model this kernel exists to support).
#[async_trait]
pub trait Handler<M: Message>: Actor {
    async fn handle(&mut self, message: M, ctx: &mut ActorContext<Self>) -> M::Result;
}
