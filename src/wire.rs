//! Small I/O helpers shared by every component that dials a peer or reads a framed line.
//! Grounded on the read-one-line-then-act shape of `tailsrv::nursery::Nursery::readln` /
//! `try_read_header`, rewritten against tokio instead of a blocking `BufReader`.

use crate::error::OverlayError;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Bounded connect timeout: a few seconds, no indefinite blocking on a dead peer.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(3);

pub async fn dial(addr: IpAddr, port: u16) -> Result<TcpStream, OverlayError> {
    let sock_addr = SocketAddr::new(addr, port);
    let stream = timeout(DIAL_TIMEOUT, TcpStream::connect(sock_addr)).await??;
    Ok(stream)
}

/// Reads one newline-terminated line, trimming the trailing `\n`. `Ok(None)` means the peer
/// closed the connection before sending a full line (EOF).
pub async fn read_line<R: tokio::io::AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
) -> Result<Option<String>, OverlayError> {
    let mut buf = String::new();
    let n = reader.read_line(&mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(buf.trim_end_matches(['\n', '\r']).to_owned()))
}

pub async fn write_line(stream: &mut TcpStream, line: &str) -> Result<(), OverlayError> {
    stream.write_all(line.as_bytes()).await?;
    Ok(())
}

/// Reads up to `max` bytes without requiring a newline, used for the registration handshake's
/// `ACK` and the fixed-format id grant, which are not newline-terminated.
pub async fn read_upto(stream: &mut TcpStream, max: usize) -> Result<String, OverlayError> {
    use tokio::io::AsyncReadExt;
    let mut buf = vec![0u8; max];
    let n = stream.read(&mut buf).await?;
    buf.truncate(n);
    Ok(String::from_utf8_lossy(&buf).trim().to_owned())
}
