//! Coordinator-side membership service: registration, release barrier, and peer-list broadcast,
//! each on its own port. Grounded on the original prototype's `handleSuperNodeRegistration` /
//! `freeSuperNodes` / `broadcastSuperNodes`, reimplemented with a tokio accept loop instead of a
//! blocking listener goroutine per connection.

use crate::fleet::FleetView;
use crate::types::ClientAddr;
use crate::wire;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Quiescence window before the first release/broadcast cycle.
pub const RELEASE_DELAY: Duration = Duration::from_secs(5);
/// Delay between the release barrier and the peer-list broadcast.
pub const BROADCAST_DELAY: Duration = Duration::from_secs(2);

/// Runs the registration accept loop forever. Each accepted connection is handled inline, not
/// spawned, so registration order is exactly connection-arrival order.
///
/// `on_registered` fires after each successful registration with the up-to-date member count;
/// the bootstrap driver uses it to decide when to run the first release/broadcast cycle and to
/// trigger the repeat cycle for every later joiner.
pub async fn run_registration(
    listener: TcpListener,
    fleet: Arc<FleetView>,
    on_registered: impl Fn(usize) + Send + 'static,
) -> std::io::Result<()> {
    loop {
        let (mut stream, peer) = listener.accept().await?;
        let addr = peer.ip();
        if fleet.contains_addr(addr) {
            info!(%addr, "registration refused, address already a member");
            continue;
        }
        let Some(id) = fleet.register(addr) else {
            info!(%addr, "registration lost a race, address already a member");
            continue;
        };
        if let Err(e) = wire::write_line(&mut stream, &id.to_string()).await {
            warn!(%addr, error = %e, "failed to send id grant");
            continue;
        }
        match wire::read_upto(&mut stream, 1024).await {
            Ok(ack) if ack == "ACK" => {
                info!(%addr, id, "supernode registered");
                on_registered(fleet.len());
            }
            Ok(other) => {
                warn!(%addr, id, payload = %other, "expected ACK, got something else");
            }
            Err(e) => {
                warn!(%addr, id, error = %e, "failed to read registration ack");
            }
        }
    }
}

/// Binds the registration listener and starts serving Coordinator duties: accepting new
/// SuperNodes and, for each one, immediately releasing and rebroadcasting the fleet view with no
/// bootstrap delay. Used both by the initial leader's later-joiner path and by a node that has
/// just won an election and must take over registration without running through the bootstrap
/// threshold again.
pub fn spawn_coordinator_duties(
    fleet: Arc<FleetView>,
    register_port: u16,
    release_port: u16,
    broadcast_port: u16,
) {
    tokio::spawn(async move {
        let listener = match TcpListener::bind(("0.0.0.0", register_port)).await {
            Ok(l) => l,
            Err(e) => {
                error!(error = %e, "newly elected coordinator failed to bind registration port");
                return;
            }
        };
        let on_registered = {
            let fleet = fleet.clone();
            move |_count: usize| {
                let fleet = fleet.clone();
                tokio::spawn(async move {
                    release_now(&fleet, release_port).await;
                    broadcast_now(&fleet, broadcast_port).await;
                });
            }
        };
        if let Err(e) = run_registration(listener, fleet, on_registered).await {
            error!(error = %e, "coordinator registration loop exited");
        }
    });
}

/// After `RELEASE_DELAY`, dial every member's release port with `FINALIZED`.
pub async fn run_release_barrier(fleet: &FleetView, release_port: u16) {
    sleep(RELEASE_DELAY).await;
    release_now(fleet, release_port).await;
}

/// Sends `FINALIZED` to every member immediately, with no delay. Used for the first bootstrap
/// cycle after its quiescence window, and for a later joiner's own release, which is not gated
/// behind the bootstrap delay.
pub async fn release_now(fleet: &FleetView, release_port: u16) {
    for member in fleet.snapshot() {
        match wire::dial(member.addr, release_port).await {
            Ok(mut stream) => {
                if let Err(e) = wire::write_line(&mut stream, "FINALIZED").await {
                    warn!(addr = %member.addr, error = %e, "failed to send FINALIZED");
                }
            }
            Err(e) => {
                warn!(addr = %member.addr, error = %e, "member unreachable during release barrier");
            }
        }
    }
}

/// After `BROADCAST_DELAY`, dial every member's broadcast port with the comma-joined fleet
/// address list.
pub async fn run_broadcast(fleet: &FleetView, broadcast_port: u16) {
    sleep(BROADCAST_DELAY).await;
    broadcast_now(fleet, broadcast_port).await;
}

/// Sends the current fleet view to every member immediately, with no delay. Used to repeat the
/// broadcast whenever membership changes.
pub async fn broadcast_now(fleet: &FleetView, broadcast_port: u16) {
    let addrs: Vec<String> = fleet.snapshot().into_iter().map(|m| m.addr.to_string()).collect();
    let payload = addrs.join(",");
    for member in fleet.snapshot() {
        match wire::dial(member.addr, broadcast_port).await {
            Ok(mut stream) => {
                if let Err(e) = wire::write_line(&mut stream, &payload).await {
                    warn!(addr = %member.addr, error = %e, "failed to send fleet broadcast");
                }
            }
            Err(e) => {
                warn!(addr = %member.addr, error = %e, "member unreachable during broadcast");
            }
        }
    }
}

/// Runs the first bootstrap cycle once the initial member count reaches `threshold`, then keeps
/// re-running the release+broadcast cycle for every later registration.
pub struct BootstrapGate {
    threshold: usize,
    first_cycle_done: AtomicUsize,
}

impl BootstrapGate {
    pub fn new(threshold: usize) -> BootstrapGate {
        BootstrapGate { threshold, first_cycle_done: AtomicUsize::new(0) }
    }

    /// Called after every successful registration. Returns `true` exactly once, the first time
    /// the member count reaches `threshold` - signalling the caller to run the first
    /// release+broadcast cycle. Every call after that (later joiners) returns `false`, since
    /// those are handled by the caller's own per-registration cycle instead.
    pub fn should_run_first_cycle(&self, member_count: usize) -> bool {
        if member_count < self.threshold {
            return false;
        }
        self.first_cycle_done.compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst).is_ok()
    }

    pub fn first_cycle_has_run(&self) -> bool {
        self.first_cycle_done.load(Ordering::SeqCst) != 0
    }
}
