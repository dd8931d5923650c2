//! One cooperative task per connected Client, in the shape of `tailsrv::pool::client_task`: a
//! tokio task owning a `TcpStream` for its whole lifetime.

use crate::broker;
use crate::error::ProtocolError;
use crate::fleet::FleetView;
use crate::index::Index;
use crate::proto::{basename, Command, Response};
use crate::types::{ClientAddr, NodeId};
use crate::wire;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tracing::{info, warn};

pub struct SessionCtx {
    pub index: Arc<Index>,
    pub fleet: Arc<FleetView>,
    pub self_id: NodeId,
    pub client_port: u16,
}

/// Runs a single client session to completion: read, dispatch, reply, repeat until EOF/CLOSE,
/// then evict. Mirrors the original prototype's `handleClient`.
pub async fn run(stream: TcpStream, peer_addr: ClientAddr, ctx: Arc<SessionCtx>) {
    info!(%peer_addr, "client connected");
    let mut reader = BufReader::new(stream);
    loop {
        let line = match wire::read_line(&mut reader).await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!(%peer_addr, "client disconnected");
                break;
            }
            Err(e) => {
                warn!(%peer_addr, error = %e, "error reading from client");
                break;
            }
        };

        let response = match line.parse::<Command>() {
            Ok(Command::Close) => {
                info!(%peer_addr, "client sent CLOSE");
                break;
            }
            Ok(cmd) => handle_command(cmd, peer_addr, &ctx).await,
            Err(_) => {
                warn!(%peer_addr, %line, "malformed command");
                Response::Invalid
            }
        };

        let stream = reader.get_mut();
        if let Err(e) = wire::write_line(stream, &response.to_wire()).await {
            warn!(%peer_addr, error = %e, "error writing to client");
            break;
        }
    }
    ctx.index.evict(peer_addr);
}

async fn handle_command(cmd: Command, peer_addr: ClientAddr, ctx: &SessionCtx) -> Response {
    match cmd {
        Command::Upload { path } => {
            let name = basename(&path);
            ctx.index.record(&name, peer_addr);
            info!(%peer_addr, file = %name, "upload registered");
            Response::UploadAck
        }
        Command::Download { name } => handle_download(name, peer_addr, ctx).await,
        Command::Search { name } => {
            // A peer SuperNode asking us, not a Client: consult only the local index.
            let holder = ctx.index.pick(&name);
            broker::local_search_response(holder)
        }
        Command::Close => unreachable!("handled by the caller before dispatch"),
    }
}

async fn handle_download(name: String, peer_addr: ClientAddr, ctx: &SessionCtx) -> Response {
    // A local hit is already a parsed `ClientAddr` - it can only have entered the index via a
    // real TCP peer address, so it needs no further validation.
    if let Some(holder) = ctx.index.pick_and_add(&name, peer_addr) {
        return Response::DownloadHit { name, addr: holder };
    }
    // An overlay hit crosses a trust boundary: the holder address came from a peer's `FOUND`
    // line as raw text and must be validated as an IP literal before use.
    match broker::search_overlay(&ctx.fleet, ctx.self_id, ctx.client_port, &name).await {
        Some(holder_str) => match holder_str.parse::<ClientAddr>() {
            Ok(holder) => {
                ctx.index.record(&name, peer_addr);
                Response::DownloadHit { name, addr: holder }
            }
            Err(_) => {
                let err = ProtocolError::InvalidHolderAddr(name.clone());
                warn!(file = %name, holder = %holder_str, error = %err, "peer returned a malformed holder address");
                Response::InvalidHolderAddr
            }
        },
        None => {
            let err = ProtocolError::NotFound(name.clone());
            warn!(file = %name, error = %err, "file not found anywhere in the overlay");
            Response::DownloadMiss { name }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ctx() -> Arc<SessionCtx> {
        Arc::new(SessionCtx {
            index: Arc::new(Index::new()),
            fleet: Arc::new(FleetView::new()),
            self_id: 0,
            client_port: 8082,
        })
    }

    fn ip(n: u8) -> ClientAddr {
        ClientAddr::V4(Ipv4Addr::new(127, 0, 0, n))
    }

    #[tokio::test]
    async fn upload_then_download_returns_uploader() {
        let ctx = ctx();
        let ack = handle_command(
            Command::Upload { path: "/tmp/report.pdf".to_owned() },
            ip(1),
            &ctx,
        )
        .await;
        assert_eq!(ack, Response::UploadAck);

        let resp =
            handle_command(Command::Download { name: "report.pdf".to_owned() }, ip(2), &ctx).await;
        assert_eq!(
            resp,
            Response::DownloadHit { name: "report.pdf".to_owned(), addr: ip(1) }
        );
    }

    #[tokio::test]
    async fn download_of_unknown_file_with_empty_fleet_misses() {
        let ctx = ctx();
        let resp =
            handle_command(Command::Download { name: "missing.bin".to_owned() }, ip(1), &ctx)
                .await;
        assert_eq!(resp, Response::DownloadMiss { name: "missing.bin".to_owned() });
    }

    #[tokio::test]
    async fn search_only_consults_local_index() {
        let ctx = ctx();
        ctx.index.record("a.txt", ip(7));
        let resp =
            handle_command(Command::Search { name: "a.txt".to_owned() }, ip(9), &ctx).await;
        assert_eq!(resp, Response::Found { addr: ip(7) });

        let miss =
            handle_command(Command::Search { name: "nope.bin".to_owned() }, ip(9), &ctx).await;
        assert_eq!(miss, Response::NotFound);
    }

    #[tokio::test]
    async fn upload_strips_path_to_basename() {
        let ctx = ctx();
        handle_command(Command::Upload { path: "../a/b.txt".to_owned() }, ip(1), &ctx).await;
        let resp = handle_command(Command::Download { name: "b.txt".to_owned() }, ip(2), &ctx).await;
        assert_eq!(resp, Response::DownloadHit { name: "b.txt".to_owned(), addr: ip(1) });
    }

    #[tokio::test]
    async fn download_rejects_malformed_holder_from_overlay_peer() {
        use tokio::io::AsyncWriteExt;
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let _ = sock.write_all(b"FOUND not-an-ip\n").await;
        });

        // Self is id 0 (never dialed); the only other member is id 1, bound to the loopback
        // address the fake listener above actually listens on.
        let fleet = FleetView::new();
        fleet.replace_from_addr_list(vec![ip(9), ip(1)]);
        let ctx = Arc::new(SessionCtx {
            index: Arc::new(Index::new()),
            fleet: Arc::new(fleet),
            self_id: 0,
            client_port: port,
        });

        let resp =
            handle_command(Command::Download { name: "x.bin".to_owned() }, ip(9), &ctx).await;
        assert_eq!(resp, Response::InvalidHolderAddr);
    }
}
