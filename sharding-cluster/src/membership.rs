use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Member {
    pub node_id: String,
    pub role: Option<String>,
    pub data_center: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    Up,
    Down,
    Unreachable,
    Reachable,
}

#[derive(Debug, Clone)]
pub struct MemberEvent {
    pub member: Member,
    pub status: MemberStatus,
}

/// The cluster membership collaborator: an ordered stream of member
/// up/down/unreachable/reachable events, an "oldest member" notion for
/// singleton election, and a self-address/DC label. Gossip and failure
/// detection themselves are out of scope - only this contract is.
#[async_trait]
pub trait Membership: Send + Sync {
    fn self_member(&self) -> Member;

    fn members(&self) -> Vec<Member>;

    /// The member that has been `Up` the longest, used to decide who runs
    /// the coordinator singleton. `None` only if the cluster is empty.
    fn oldest_member(&self) -> Option<Member>;

    fn subscribe(&self) -> broadcast::Receiver<MemberEvent>;
}

struct State {
    members: Vec<Member>,
}

/// In-memory membership: members are added/removed by test code calling
/// `join`/`leave` directly, in "oldest joined first" order.
pub struct InMemoryMembership {
    self_member: Member,
    state: RwLock<State>,
    events: broadcast::Sender<MemberEvent>,
}

impl InMemoryMembership {
    pub fn new(self_member: Member) -> Self {
        let (events, _) = broadcast::channel(256);
        let state = State {
            members: vec![self_member.clone()],
        };
        InMemoryMembership {
            self_member,
            state: RwLock::new(state),
            events,
        }
    }

    pub fn join(&self, member: Member) {
        {
            let mut state = self.state.write();
            if !state.members.contains(&member) {
                state.members.push(member.clone());
            }
        }
        let _ = self.events.send(MemberEvent {
            member,
            status: MemberStatus::Up,
        });
    }

    pub fn leave(&self, node_id: &str) {
        let removed = {
            let mut state = self.state.write();
            let idx = state.members.iter().position(|m| m.node_id == node_id);
            idx.map(|i| state.members.remove(i))
        };
        if let Some(member) = removed {
            let _ = self.events.send(MemberEvent {
                member,
                status: MemberStatus::Down,
            });
        }
    }

    pub fn mark_unreachable(&self, node_id: &str) {
        if let Some(member) = self
            .state
            .read()
            .members
            .iter()
            .find(|m| m.node_id == node_id)
            .cloned()
        {
            let _ = self.events.send(MemberEvent {
                member,
                status: MemberStatus::Unreachable,
            });
        }
    }
}

#[async_trait]
impl Membership for InMemoryMembership {
    fn self_member(&self) -> Member {
        self.self_member.clone()
    }

    fn members(&self) -> Vec<Member> {
        self.state.read().members.clone()
    }

    fn oldest_member(&self) -> Option<Member> {
        self.state.read().members.first().cloned()
    }

    fn subscribe(&self) -> broadcast::Receiver<MemberEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: &str) -> Member {
        Member {
            node_id: id.to_string(),
            role: None,
            data_center: "dc1".to_string(),
        }
    }

    #[test]
    fn oldest_member_is_first_joined() {
        let membership = InMemoryMembership::new(member("a"));
        membership.join(member("b"));
        membership.join(member("c"));
        assert_eq!(membership.oldest_member().unwrap().node_id, "a");

        membership.leave("a");
        assert_eq!(membership.oldest_member().unwrap().node_id, "b");
    }
}
