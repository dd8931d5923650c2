//! Coordinator role state. Guarded by a single mutex: the election procedure sets and clears
//! these fields under lock.

use crate::types::ClientAddr;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Follower,
    Candidate,
    Leader,
}

pub struct RoleState {
    inner: Mutex<Inner>,
}

struct Inner {
    state: NodeState,
    coordinator_addr: Option<ClientAddr>,
    election_in_progress: bool,
}

impl RoleState {
    pub fn new_follower(coordinator_addr: ClientAddr) -> RoleState {
        RoleState {
            inner: Mutex::new(Inner {
                state: NodeState::Follower,
                coordinator_addr: Some(coordinator_addr),
                election_in_progress: false,
            }),
        }
    }

    pub fn new_leader(self_addr: ClientAddr) -> RoleState {
        RoleState {
            inner: Mutex::new(Inner {
                state: NodeState::Leader,
                coordinator_addr: Some(self_addr),
                election_in_progress: false,
            }),
        }
    }

    pub fn state(&self) -> NodeState {
        self.inner.lock().unwrap().state
    }

    pub fn coordinator_addr(&self) -> Option<ClientAddr> {
        self.inner.lock().unwrap().coordinator_addr
    }

    pub fn is_leader(&self) -> bool {
        self.state() == NodeState::Leader
    }

    /// Begins a candidacy, unless one is already running. Returns `false` if an election was
    /// already in progress.
    pub fn begin_election(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.election_in_progress {
            return false;
        }
        inner.election_in_progress = true;
        inner.state = NodeState::Candidate;
        true
    }

    /// No higher-id peer objected within the timeout; declare self LEADER.
    pub fn declare_leader(&self, self_addr: ClientAddr) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = NodeState::Leader;
        inner.coordinator_addr = Some(self_addr);
        inner.election_in_progress = false;
    }

    /// A higher-id peer objected; stay FOLLOWER and wait for a COORDINATOR broadcast.
    pub fn yield_to_higher_peer(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = NodeState::Follower;
        inner.election_in_progress = false;
    }

    /// A `COORDINATOR <addr>` frame arrived; adopt the new leader.
    pub fn adopt_coordinator(&self, addr: ClientAddr) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = NodeState::Follower;
        inner.coordinator_addr = Some(addr);
        inner.election_in_progress = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn ip(n: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, n))
    }

    #[test]
    fn begin_election_is_exclusive() {
        let role = RoleState::new_follower(ip(1));
        assert!(role.begin_election());
        assert!(!role.begin_election());
        assert_eq!(role.state(), NodeState::Candidate);
    }

    #[test]
    fn declare_leader_clears_in_progress_and_allows_new_election_later() {
        let role = RoleState::new_follower(ip(1));
        role.begin_election();
        role.declare_leader(ip(2));
        assert_eq!(role.state(), NodeState::Leader);
        assert_eq!(role.coordinator_addr(), Some(ip(2)));
        assert!(role.begin_election());
    }

    #[test]
    fn adopt_coordinator_resets_to_follower() {
        let role = RoleState::new_follower(ip(1));
        role.begin_election();
        role.adopt_coordinator(ip(3));
        assert_eq!(role.state(), NodeState::Follower);
        assert_eq!(role.coordinator_addr(), Some(ip(3)));
    }
}
