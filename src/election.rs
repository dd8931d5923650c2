//! Bully election, driven by three event sources: a timer tick from the health monitor, an
//! incoming `ELECTION` frame, and an incoming `COORDINATOR` frame. Wire tokens and the overall
//! shape are grounded in the original prototype's `startElection`/`checkCoordinator`; the state
//! machine itself and its bounded wait are this crate's own.

use crate::fleet::FleetView;
use crate::membership;
use crate::state::RoleState;
use crate::types::{ClientAddr, NodeId};
use crate::wire;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tracing::{info, warn};

/// Bounded wait for a higher-id peer to object.
pub const ELECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs a full candidacy: challenges every peer with a strictly greater id, waits out the
/// timeout, and declares LEADER if nobody with a higher id answered. On winning, also takes over
/// the Coordinator's registration/release/broadcast duties so the new leader can accept further
/// SuperNodes. Returns `true` if this node became LEADER.
pub async fn run_election(
    self_id: NodeId,
    self_addr: ClientAddr,
    fleet: Arc<FleetView>,
    role: Arc<RoleState>,
    register_port: u16,
    release_port: u16,
    election_port: u16,
    broadcast_port: u16,
) -> bool {
    if !role.begin_election() {
        info!(self_id, "election already in progress, not starting another");
        return false;
    }
    info!(self_id, "starting election");

    let higher_peers: Vec<_> =
        fleet.snapshot().into_iter().filter(|p| p.id > self_id).collect();

    let mut any_objection = false;
    for peer in &higher_peers {
        match challenge(peer.addr, election_port, self_id).await {
            Some(true) => {
                info!(self_id, peer_id = peer.id, "peer objects, yielding");
                any_objection = true;
            }
            Some(false) => {
                info!(self_id, peer_id = peer.id, "peer yielded");
            }
            None => {
                warn!(self_id, peer_id = peer.id, "no reply from higher peer during election");
            }
        }
    }

    if any_objection {
        role.yield_to_higher_peer();
        return false;
    }

    info!(self_id, "no higher peer objected, declaring leader");
    role.declare_leader(self_addr);
    announce_coordinator(&fleet, self_id, self_addr, broadcast_port).await;
    membership::spawn_coordinator_duties(fleet, register_port, release_port, broadcast_port);
    true
}

/// Dials one higher-id peer's election port with `ELECTION <selfId>`. Returns `Some(true)` if
/// the peer objects (is itself still participating, i.e. replied `OUT`), `Some(false)` if it
/// yielded (`OK`), or `None` on timeout/unreachable - treated as no objection.
async fn challenge(peer_addr: ClientAddr, election_port: u16, self_id: NodeId) -> Option<bool> {
    let fut = async {
        let mut stream = wire::dial(peer_addr, election_port).await.ok()?;
        wire::write_line(&mut stream, &format!("ELECTION {self_id}\n")).await.ok()?;
        let mut reader = BufReader::new(stream);
        let line = wire::read_line(&mut reader).await.ok()??;
        Some(line.trim() == "OUT")
    };
    tokio::time::timeout(ELECTION_TIMEOUT, fut).await.ok().flatten()
}

/// Handles an inbound `ELECTION <k>` frame: replies `OUT` (and starts our own candidacy if we
/// aren't already running one) when we outrank the challenger, `OK` otherwise.
#[allow(clippy::too_many_arguments)]
pub async fn handle_election_request(
    self_id: NodeId,
    self_addr: ClientAddr,
    fleet: Arc<FleetView>,
    role: Arc<RoleState>,
    register_port: u16,
    release_port: u16,
    election_port: u16,
    broadcast_port: u16,
    challenger_id: NodeId,
    stream: &mut TcpStream,
) -> std::io::Result<()> {
    if self_id > challenger_id {
        wire::write_line(stream, "OUT\n").await.map_err(io_err)?;
        tokio::spawn(async move {
            run_election(
                self_id,
                self_addr,
                fleet,
                role,
                register_port,
                release_port,
                election_port,
                broadcast_port,
            )
            .await;
        });
    } else {
        wire::write_line(stream, "OK\n").await.map_err(io_err)?;
    }
    Ok(())
}

/// Dials every known peer's broadcast port with `COORDINATOR <selfAddr>`.
async fn announce_coordinator(
    fleet: &FleetView,
    self_id: NodeId,
    self_addr: ClientAddr,
    broadcast_port: u16,
) {
    for peer in fleet.snapshot() {
        if peer.id == self_id {
            continue;
        }
        if let Ok(mut stream) = wire::dial(peer.addr, broadcast_port).await {
            let _ = wire::write_line(&mut stream, &format!("COORDINATOR {self_addr}\n")).await;
        }
    }
}

/// Handles an inbound `COORDINATOR <addr>` frame: adopt the new leader.
pub fn handle_coordinator_announcement(role: &RoleState, addr: ClientAddr) {
    info!(%addr, "adopting new coordinator");
    role.adopt_coordinator(addr);
}

fn io_err(e: crate::error::OverlayError) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(n: u8) -> ClientAddr {
        ClientAddr::V4(Ipv4Addr::new(127, 0, 0, n))
    }

    #[tokio::test]
    async fn election_with_no_higher_peers_declares_leader() {
        let fleet = Arc::new(FleetView::new());
        fleet.replace_from_addr_list(vec![ip(1), ip(2), ip(3)]);
        let role = Arc::new(RoleState::new_follower(ip(1)));

        // self_id = 2 is the highest id in a 3-member fleet (0, 1, 2); no higher peer exists.
        // register_port 0 lets the winning branch's spawn_coordinator_duties bind an ephemeral
        // port instead of colliding with a real one.
        let became_leader =
            run_election(2, ip(3), fleet.clone(), role.clone(), 0, 0, 0, 0).await;
        assert!(became_leader);
        assert_eq!(role.coordinator_addr(), Some(ip(3)));
    }

    #[tokio::test]
    async fn election_already_in_progress_is_not_restarted() {
        let fleet = Arc::new(FleetView::new());
        fleet.replace_from_addr_list(vec![ip(1)]);
        let role = Arc::new(RoleState::new_follower(ip(1)));
        assert!(role.begin_election());

        let became_leader = run_election(0, ip(1), fleet, role, 0, 0, 0, 0).await;
        assert!(!became_leader);
    }

    #[tokio::test]
    async fn coordinator_announcement_updates_role() {
        let role = RoleState::new_follower(ip(1));
        handle_coordinator_announcement(&role, ip(9));
        assert_eq!(role.coordinator_addr(), Some(ip(9)));
    }
}
