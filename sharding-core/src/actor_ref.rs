use crate::actor::{Actor, ActorId};
use crate::context::ActorContext;
use crate::message::{Handler, Message};
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

const MAILBOX_CAPACITY: usize = 1024;

/// Failure to deliver to or receive from an actor's mailbox - the actor's
/// task has already exited (stopped, panicked, or was never started).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ActorRefErr {
    #[error("actor unavailable")]
    ActorUnavailable,
}

/// A cloneable, address-like handle to a single actor's mailbox. Dropping
/// every clone is how an actor is stopped without an explicit message -
/// there is deliberately no `Drop`-time side effect beyond that, mirroring
/// "references are addresses, not owning pointers".
pub struct LocalActorRef<A: Actor> {
    id: ActorId,
    tx: mpsc::Sender<MailboxItem<A>>,
}

impl<A: Actor> Clone for LocalActorRef<A> {
    fn clone(&self) -> Self {
        LocalActorRef {
            id: self.id.clone(),
            tx: self.tx.clone(),
        }
    }
}

impl<A: Actor> PartialEq for LocalActorRef<A> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<A: Actor> Eq for LocalActorRef<A> {}

impl<A: Actor> std::hash::Hash for LocalActorRef<A> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<A: Actor> std::fmt::Debug for LocalActorRef<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalActorRef")
            .field("actor", &A::type_name())
            .field("id", &self.id)
            .finish()
    }
}

impl<A: Actor> LocalActorRef<A> {
    pub fn id(&self) -> &ActorId {
        &self.id
    }

    /// Send a message and await its typed result.
    pub async fn send<M>(&self, message: M) -> Result<M::Result, ActorRefErr>
    where
        A: Handler<M>,
        M: Message,
    {
        let (tx, rx) = oneshot::channel();
        let envelope = HandlerEnvelope {
            msg: Some(message),
            reply: Some(tx),
        };
        self.tx
            .send(MailboxItem::Handle(Box::new(envelope)))
            .await
            .map_err(|_| ActorRefErr::ActorUnavailable)?;
        rx.await.map_err(|_| ActorRefErr::ActorUnavailable)
    }

    /// Send a message without waiting for a reply (fire-and-forget,
    /// at-most-once - the mailbox may already be gone).
    pub async fn notify<M>(&self, message: M) -> Result<(), ActorRefErr>
    where
        A: Handler<M>,
        M: Message,
    {
        let envelope = HandlerEnvelope {
            msg: Some(message),
            reply: None,
        };
        self.tx
            .send(MailboxItem::Handle(Box::new(envelope)))
            .await
            .map_err(|_| ActorRefErr::ActorUnavailable)
    }

    /// Request the actor stop after draining messages already queued
    /// ahead of this one.
    pub async fn stop(&self) {
        let _ = self.tx.send(MailboxItem::Stop).await;
    }
}

enum MailboxItem<A: Actor> {
    Handle(Box<dyn Envelope<A> + Send>),
    Stop,
}

#[async_trait]
trait Envelope<A: Actor> {
    async fn handle(&mut self, actor: &mut A, ctx: &mut ActorContext<A>);
}

struct HandlerEnvelope<M: Message> {
    msg: Option<M>,
    reply: Option<oneshot::Sender<M::Result>>,
}

#[async_trait]
impl<A, M> Envelope<A> for HandlerEnvelope<M>
where
    A: Handler<M>,
    M: Message,
{
    async fn handle(&mut self, actor: &mut A, ctx: &mut ActorContext<A>) {
        let msg = self.msg.take().expect("envelope handled twice");
        let result = actor.handle(msg, ctx).await;
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(result);
        }
    }
}

/// Spawn `actor` onto the shared tokio thread pool and return a ref to its
/// mailbox. The returned task runs until every `LocalActorRef` clone is
/// dropped or `stop()` is called.
pub fn spawn<A: Actor>(actor: A, id: ActorId) -> LocalActorRef<A> {
    let (tx, mut rx) = mpsc::channel::<MailboxItem<A>>(MAILBOX_CAPACITY);
    let self_ref = LocalActorRef {
        id: id.clone(),
        tx,
    };
    let loop_ref = self_ref.clone();

    tokio::spawn(async move {
        let mut actor = actor;
        let mut ctx = ActorContext::new(id.clone(), loop_ref);
        debug!(actor_id = %id, actor = A::type_name(), "actor started");
        actor.started(&mut ctx).await;

        while let Some(item) = rx.recv().await {
            match item {
                MailboxItem::Handle(mut envelope) => {
                    envelope.handle(&mut actor, &mut ctx).await;
                }
                MailboxItem::Stop => break,
            }

            if ctx.is_stopping() {
                break;
            }
        }

        actor.stopped(&mut ctx).await;
        debug!(actor_id = %id, actor = A::type_name(), "actor stopped");
    });

    self_ref
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::Actor;
    use async_trait::async_trait;

    struct Counter {
        seen: Vec<u32>,
    }

    #[async_trait]
    impl Actor for Counter {}

    struct Push(u32);
    impl Message for Push {
        type Result = usize;
    }

    #[async_trait]
    impl Handler<Push> for Counter {
        async fn handle(&mut self, message: Push, _ctx: &mut ActorContext<Self>) -> usize {
            self.seen.push(message.0);
            self.seen.len()
        }
    }

    struct Drain;
    impl Message for Drain {
        type Result = Vec<u32>;
    }

    #[async_trait]
    impl Handler<Drain> for Counter {
        async fn handle(&mut self, _message: Drain, _ctx: &mut ActorContext<Self>) -> Vec<u32> {
            self.seen.clone()
        }
    }

    #[tokio::test]
    async fn messages_from_one_sender_are_delivered_in_order() {
        let actor_ref = spawn(Counter { seen: Vec::new() }, ActorId::generate());

        for i in 0..50 {
            actor_ref.send(Push(i)).await.expect("send");
        }

        let seen = actor_ref.send(Drain).await.expect("drain");
        let expected: Vec<u32> = (0..50).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn send_after_stop_fails() {
        let actor_ref = spawn(Counter { seen: Vec::new() }, ActorId::generate());
        actor_ref.stop().await;

        // give the mailbox loop a chance to observe the Stop item and exit
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let result = actor_ref.send(Push(1)).await;
        assert!(result.is_err());
    }
}
