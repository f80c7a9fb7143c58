use crate::actor::{Actor, ActorId};
use crate::actor_ref::LocalActorRef;

/// Per-actor handle passed to every `started`/`stopped`/`Handler::handle`
/// call. Owns nothing shared - it is the actor's view of its own identity
/// and its own mailbox, for posting follow-up self-messages (the pattern
/// used to deliver "durability write completed" continuations).
pub struct ActorContext<A: Actor> {
    id: ActorId,
    self_ref: LocalActorRef<A>,
    stopping: bool,
}

impl<A: Actor> ActorContext<A> {
    pub(crate) fn new(id: ActorId, self_ref: LocalActorRef<A>) -> Self {
        ActorContext {
            id,
            self_ref,
            stopping: false,
        }
    }

    pub fn id(&self) -> &ActorId {
        &self.id
    }

    pub fn actor_ref(&self) -> LocalActorRef<A> {
        self.self_ref.clone()
    }

    /// Request that the mailbox loop exit after this message finishes
    /// processing. `stopped()` still runs.
    pub fn stop(&mut self) {
        self.stopping = true;
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.stopping
    }
}
