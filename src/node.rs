//! Node bootstrap: decides LEADER vs FOLLOWER and starts the right subsystems. Grounded on
//! `tailsrv::main`'s top-level wiring of listeners into spawned tasks.

use crate::config::{Args, Role};
use crate::election;
use crate::fleet::FleetView;
use crate::health;
use crate::index::Index;
use crate::membership::{self, BootstrapGate};
use crate::session::{self, SessionCtx};
use crate::state::RoleState;
use crate::types::{ClientAddr, NodeId};
use crate::wire;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tracing::{error, info, warn};

/// Resolves `Args::role` into a concrete `Role`, auto-detecting by probing the registration port
/// when the flag is omitted.
pub async fn resolve_role(args: &Args) -> Role {
    if let Some(role) = args.role {
        return role;
    }
    match TcpListener::bind(("0.0.0.0", args.register_port)).await {
        Ok(listener) => {
            drop(listener);
            Role::Leader
        }
        Err(_) => Role::Follower,
    }
}

/// Runs this process forever as the given role.
pub async fn run(args: Args, role: Role) -> std::io::Result<()> {
    match role {
        Role::Leader => run_leader(args).await,
        Role::Follower => run_follower(args).await,
    }
}

async fn run_leader(args: Args) -> std::io::Result<()> {
    let self_addr = local_addr();
    info!(%self_addr, "starting as coordinator");

    let fleet = Arc::new(FleetView::new());
    let role = Arc::new(RoleState::new_leader(self_addr));
    let index = Arc::new(Index::new());
    let gate = Arc::new(BootstrapGate::new(args.bootstrap_threshold));

    let registration_listener =
        TcpListener::bind(("0.0.0.0", args.register_port)).await.map_err(|e| {
            error!(error = %e, "failed to bind coordinator registration port");
            e
        })?;

    let release_port = args.release_port;
    let broadcast_port = args.broadcast_port;
    let fleet_for_registration = fleet.clone();
    let registration_task = tokio::spawn(async move {
        let fleet = fleet_for_registration;
        let on_registered = {
            let fleet = fleet.clone();
            move |count: usize| {
                let fleet = fleet.clone();
                let gate = gate.clone();
                if gate.should_run_first_cycle(count) {
                    tokio::spawn(async move {
                        membership::run_release_barrier(&fleet, release_port).await;
                        membership::run_broadcast(&fleet, broadcast_port).await;
                    });
                } else if gate.first_cycle_has_run() {
                    // A later joiner: release it (and, harmlessly, re-release existing members)
                    // and rebroadcast the new view, with no bootstrap delay.
                    tokio::spawn(async move {
                        membership::release_now(&fleet, release_port).await;
                        membership::broadcast_now(&fleet, broadcast_port).await;
                    });
                }
            }
        };
        if let Err(e) =
            membership::run_registration(registration_listener, fleet, on_registered).await
        {
            error!(error = %e, "registration loop exited");
        }
    });

    let election_task = spawn_election_listener(
        0,
        self_addr,
        args.register_port,
        args.release_port,
        args.election_port,
        args.broadcast_port,
        fleet.clone(),
        role,
    );
    // The Coordinator serves clients immediately; it has no broadcast to wait for.
    let ready = Arc::new(Notify::new());
    ready.notify_one();
    let client_task = spawn_client_listener(args.client_port, index, fleet, 0, ready);

    let _ = tokio::join!(registration_task, election_task, client_task);
    Ok(())
}

async fn run_follower(args: Args) -> std::io::Result<()> {
    let self_addr = local_addr();
    let coordinator_addr =
        args.coordinator_addr.expect("follower startup requires --coordinator-addr");

    let self_id = register_with_coordinator(coordinator_addr, args.register_port).await?;
    info!(self_id, %self_addr, "registered with coordinator");

    wait_for_finalized(args.release_port).await?;
    info!(self_id, "received FINALIZED, starting client service");

    let fleet = Arc::new(FleetView::new());
    let role = Arc::new(RoleState::new_follower(coordinator_addr));
    let index = Arc::new(Index::new());
    let first_broadcast = Arc::new(Notify::new());

    let broadcast_task = spawn_broadcast_receiver(
        args.broadcast_port,
        fleet.clone(),
        role.clone(),
        first_broadcast.clone(),
    );
    let election_task = spawn_election_listener(
        self_id,
        self_addr,
        args.register_port,
        args.release_port,
        args.election_port,
        args.broadcast_port,
        fleet.clone(),
        role.clone(),
    );
    let health_task = tokio::spawn(health::run(
        self_id,
        self_addr,
        args.register_port,
        args.release_port,
        args.election_port,
        args.broadcast_port,
        fleet.clone(),
        role,
    ));
    let client_task =
        spawn_client_listener(args.client_port, index, fleet, self_id, first_broadcast);

    let _ = tokio::join!(broadcast_task, election_task, health_task, client_task);
    Ok(())
}

/// FOLLOWER bootstrap's dial-in: connect, read the granted id, send ACK.
async fn register_with_coordinator(
    coordinator_addr: ClientAddr,
    register_port: u16,
) -> std::io::Result<NodeId> {
    let mut stream = wire::dial(coordinator_addr, register_port)
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    let mut buf = vec![0u8; 64];
    let n = stream.read(&mut buf).await?;
    let id: NodeId = String::from_utf8_lossy(&buf[..n])
        .trim()
        .parse()
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "bad id grant"))?;
    stream.write_all(b"ACK").await?;
    Ok(id)
}

/// Blocks on the release port until a single `FINALIZED` connection arrives.
async fn wait_for_finalized(release_port: u16) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", release_port)).await?;
    loop {
        let (mut stream, _) = listener.accept().await?;
        let mut buf = vec![0u8; 64];
        let n = stream.read(&mut buf).await.unwrap_or(0);
        if String::from_utf8_lossy(&buf[..n]).trim() == "FINALIZED" {
            return Ok(());
        }
    }
}

/// `ready` must fire before the accept loop starts: a SuperNode must not serve clients until it
/// has received at least one peer-list broadcast. The leader fires it immediately since it has
/// no broadcast to wait for; a follower fires it from `spawn_broadcast_receiver`.
fn spawn_client_listener(
    client_port: u16,
    index: Arc<Index>,
    fleet: Arc<FleetView>,
    self_id: NodeId,
    ready: Arc<Notify>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let listener = match TcpListener::bind(("0.0.0.0", client_port)).await {
            Ok(l) => l,
            Err(e) => {
                error!(error = %e, "failed to bind client port");
                return;
            }
        };
        ready.notified().await;
        let ctx = Arc::new(SessionCtx { index, fleet, self_id, client_port });
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "accept failed on client port");
                    continue;
                }
            };
            let ctx = ctx.clone();
            tokio::spawn(async move {
                session::run(stream, peer.ip(), ctx).await;
            });
        }
    })
}

/// `first_broadcast` is signalled the first time a real fleet-list broadcast (not a
/// `COORDINATOR` announcement) replaces the fleet view, unblocking the client listener.
fn spawn_broadcast_receiver(
    broadcast_port: u16,
    fleet: Arc<FleetView>,
    role: Arc<RoleState>,
    first_broadcast: Arc<Notify>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let listener = match TcpListener::bind(("0.0.0.0", broadcast_port)).await {
            Ok(l) => l,
            Err(e) => {
                error!(error = %e, "failed to bind broadcast port");
                return;
            }
        };
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => continue,
            };
            let mut buf = String::new();
            if stream.read_to_string(&mut buf).await.is_err() {
                continue;
            }
            let text = buf.trim();
            if let Some(rest) = text.strip_prefix("COORDINATOR ") {
                if let Ok(addr) = rest.trim().parse::<ClientAddr>() {
                    election::handle_coordinator_announcement(&role, addr);
                }
                continue;
            }
            let addrs: Vec<ClientAddr> =
                text.split(',').filter(|s| !s.is_empty()).filter_map(|s| s.parse().ok()).collect();
            if !addrs.is_empty() {
                fleet.replace_from_addr_list(addrs);
                info!(count = fleet.len(), "fleet view updated from broadcast");
                first_broadcast.notify_one();
            }
        }
    })
}

/// Listens for inbound `ELECTION <k>` challenges and `COORDINATOR <addr>` announcements sharing
/// the election port.
#[allow(clippy::too_many_arguments)]
fn spawn_election_listener(
    self_id: NodeId,
    self_addr: ClientAddr,
    register_port: u16,
    release_port: u16,
    election_port: u16,
    broadcast_port: u16,
    fleet: Arc<FleetView>,
    role: Arc<RoleState>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let listener = match TcpListener::bind(("0.0.0.0", election_port)).await {
            Ok(l) => l,
            Err(e) => {
                error!(error = %e, "failed to bind election port");
                return;
            }
        };
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => continue,
            };
            let fleet = fleet.clone();
            let role = role.clone();
            tokio::spawn(async move {
                if let Some(challenger_id) = read_election_challenge(&mut stream).await {
                    let _ = election::handle_election_request(
                        self_id,
                        self_addr,
                        fleet,
                        role,
                        register_port,
                        release_port,
                        election_port,
                        broadcast_port,
                        challenger_id,
                        &mut stream,
                    )
                    .await;
                }
            });
        }
    })
}

/// Reads exactly one newline-terminated `ELECTION <k>` frame, unlike the broadcast receiver's
/// `read_to_string`: the sender on this port keeps the connection open waiting for our reply
/// (`challenge()` in `election.rs`), so waiting for EOF here would deadlock.
async fn read_election_challenge(stream: &mut TcpStream) -> Option<NodeId> {
    let mut reader = tokio::io::BufReader::new(stream);
    let line = wire::read_line(&mut reader).await.ok()??;
    line.strip_prefix("ELECTION ")?.trim().parse::<NodeId>().ok()
}

/// This process's own address as seen by peers. A real deployment resolves this from the local
/// interface; loopback is the correct answer for the integration tests in this crate.
fn local_addr() -> ClientAddr {
    IpAddr::V4(std::net::Ipv4Addr::LOCALHOST)
}
