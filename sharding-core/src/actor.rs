use crate::context::ActorContext;
use async_trait::async_trait;
use std::fmt;
use uuid::Uuid;

/// Opaque identity of a single actor instance, unique within the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(String);

impl ActorId {
    pub fn generate() -> Self {
        ActorId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ActorId {
    fn from(s: &str) -> Self {
        ActorId(s.to_string())
    }
}

impl From<String> for ActorId {
    fn from(s: String) -> Self {
        ActorId(s)
    }
}

/// A unit of state owned by exactly one mailbox loop. `started`/`stopped`
/// are the only lifecycle hooks; everything else happens through
/// `Handler<M>` impls dispatched one message at a time.
#[async_trait]
pub trait Actor: Send + Sized + 'static {
    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }

    async fn started(&mut self, _ctx: &mut ActorContext<Self>) {}

    async fn stopped(&mut self, _ctx: &mut ActorContext<Self>) {}
}
