//! Overlay broker: fans a DOWNLOAD miss out to peer SuperNodes, first FOUND wins. Factored into
//! one per-peer query function so it can be unit-tested against a fake peer listener without
//! touching the sequential fallback loop.
//!
//! `query_peer` deliberately returns the holder address as a raw string rather than a parsed
//! `IpAddr`: a peer's `FOUND` line crosses a trust boundary, and the DOWNLOAD handler itself
//! validates it and produces the dedicated invalid-IP error rather than silently dropping a
//! malformed reply.

use crate::error::OverlayError;
use crate::fleet::FleetView;
use crate::proto::{Command, Response};
use crate::types::{ClientAddr, NodeId};
use crate::wire;
use std::net::IpAddr;
use tokio::io::BufReader;
use tracing::{debug, warn};

/// Queries one peer's client port for `name`. Never recurses - the peer's own SEARCH handler
/// only ever consults its local index.
pub async fn query_peer(peer_addr: IpAddr, client_port: u16, name: &str) -> Option<String> {
    let mut stream = match wire::dial(peer_addr, client_port).await {
        Ok(s) => s,
        Err(e) => {
            debug!(%peer_addr, error = %e, "peer unreachable during overlay search");
            return None;
        }
    };
    if let Err(e) = wire::write_line(&mut stream, &format!("SEARCH {name}\n")).await {
        debug!(%peer_addr, error = %e, "failed to send SEARCH to peer");
        return None;
    }
    let mut reader = BufReader::new(stream);
    let line = match wire::read_line(&mut reader).await {
        Ok(Some(line)) => line,
        Ok(None) => return None,
        Err(e) => {
            debug!(%peer_addr, error = %e, "failed to read SEARCH reply from peer");
            return None;
        }
    };
    if line.trim() == "NOTFOUND" {
        return None;
    }
    match line.strip_prefix("FOUND ") {
        Some(s) => Some(s.trim().to_owned()),
        None => {
            let err = OverlayError::BadPeerResponse(line.clone());
            warn!(%peer_addr, error = %err, "peer sent an unrecognized SEARCH reply");
            None
        }
    }
}

/// Iterates the fleet view (excluding `self_id`), issuing `query_peer` to each until one
/// returns `Some`. First-response-wins; peers are tried in fleet-view order.
pub async fn search_overlay(
    fleet: &FleetView,
    self_id: NodeId,
    client_port: u16,
    name: &str,
) -> Option<String> {
    for peer in fleet.snapshot() {
        if peer.id == self_id {
            continue;
        }
        if let Some(holder) = query_peer(peer.addr, client_port, name).await {
            return Some(holder);
        }
    }
    let err = OverlayError::NoPeerFound;
    warn!(file = name, error = %err, "no peer in the overlay holds this file");
    None
}

/// Formats this SuperNode's reply to a peer's SEARCH: consult only the local index, never
/// recurse.
pub fn local_search_response(holder: Option<ClientAddr>) -> Response {
    match holder {
        Some(addr) => Response::Found { addr },
        None => Response::NotFound,
    }
}

/// Parses an inbound `SEARCH <name>` line the way the client-session dispatcher does, kept here
/// so the broker's own tests can drive a fake peer with the real parser.
pub fn parse_search(line: &str) -> Option<Command> {
    line.parse::<Command>().ok().filter(|c| matches!(c, Command::Search { .. }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Index;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// A fake peer that answers every SEARCH according to a local `Index`.
    async fn spawn_fake_peer(index: std::sync::Arc<Index>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let (mut sock, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => return,
                };
                let index = index.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 256];
                    let n = sock.read(&mut buf).await.unwrap_or(0);
                    if n == 0 {
                        return;
                    }
                    let line = String::from_utf8_lossy(&buf[..n]);
                    if let Some(Command::Search { name }) = parse_search(line.trim()) {
                        let reply = local_search_response(index.pick(&name)).to_wire();
                        let _ = sock.write_all(reply.as_bytes()).await;
                    }
                });
            }
        });
        port
    }

    /// A fake peer that always answers with a fixed, possibly-malformed line.
    async fn spawn_fixed_reply_peer(reply: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let (mut sock, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => return,
                };
                tokio::spawn(async move {
                    let _ = sock.write_all(reply.as_bytes()).await;
                });
            }
        });
        port
    }

    #[tokio::test]
    async fn query_peer_returns_holder_on_found() {
        let index = std::sync::Arc::new(Index::new());
        let holder: ClientAddr = "127.0.0.1".parse().unwrap();
        index.record("x.bin", holder);
        let port = spawn_fake_peer(index).await;

        let found = query_peer("127.0.0.1".parse().unwrap(), port, "x.bin").await;
        assert_eq!(found, Some(holder.to_string()));
    }

    #[tokio::test]
    async fn query_peer_returns_none_on_notfound() {
        let index = std::sync::Arc::new(Index::new());
        let port = spawn_fake_peer(index).await;

        let found = query_peer("127.0.0.1".parse().unwrap(), port, "missing.bin").await;
        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn query_peer_returns_none_on_unreachable_peer() {
        // Nothing listens on this port.
        let found = query_peer("127.0.0.1".parse().unwrap(), 1, "x.bin").await;
        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn query_peer_surfaces_malformed_found_payload_unparsed() {
        // A buggy/hostile peer returning garbage after FOUND is handed back as-is; it's the
        // DOWNLOAD handler's job (session.rs) to reject it, not the broker's.
        let port = spawn_fixed_reply_peer("FOUND not-an-ip\n").await;
        let found = query_peer("127.0.0.1".parse().unwrap(), port, "x.bin").await;
        assert_eq!(found, Some("not-an-ip".to_owned()));
    }
}
