//! Health monitor: periodic liveness probe of the Coordinator's registration port from every
//! non-leader SuperNode. Grounded on the original prototype's `checkCoordinator`, reimplemented
//! against `tokio::time::interval` instead of a blocking `time.Sleep` loop.

use crate::election;
use crate::fleet::FleetView;
use crate::state::RoleState;
use crate::types::{ClientAddr, NodeId};
use crate::wire;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Probe period.
pub const PROBE_INTERVAL: Duration = Duration::from_secs(5);

/// Runs forever, probing the coordinator and invoking an election on failure. Exits as soon as
/// this node becomes LEADER.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    self_id: NodeId,
    self_addr: ClientAddr,
    register_port: u16,
    release_port: u16,
    election_port: u16,
    broadcast_port: u16,
    fleet: Arc<FleetView>,
    role: Arc<RoleState>,
) {
    let mut ticker = tokio::time::interval(PROBE_INTERVAL);
    loop {
        ticker.tick().await;
        if role.is_leader() {
            info!(self_id, "became leader, health monitor exiting");
            return;
        }
        let Some(coordinator_addr) = role.coordinator_addr() else {
            continue;
        };
        match wire::dial(coordinator_addr, register_port).await {
            Ok(_) => {
                info!(self_id, %coordinator_addr, "coordinator is alive");
            }
            Err(e) => {
                warn!(self_id, %coordinator_addr, error = %e, "coordinator unreachable, starting election");
                election::run_election(
                    self_id,
                    self_addr,
                    fleet.clone(),
                    role.clone(),
                    register_port,
                    release_port,
                    election_port,
                    broadcast_port,
                )
                .await;
            }
        }
    }
}
