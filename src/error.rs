use thiserror::Error;

/// Faults that arise while parsing or servicing a single wire message. These never tear down a
/// session by themselves; the caller turns them into one of the wire error strings and keeps
/// reading.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("unknown or too-short command")]
    Malformed,
    #[error("file '{0}' not found on any super node")]
    NotFound(String),
    #[error("holder address for '{0}' is not a valid IP literal")]
    InvalidHolderAddr(String),
}

/// Faults talking to peers, the Coordinator, or the network in general. Always logged and
/// swallowed by the component that owns the retry/fallback policy, except the startup port
/// binds, which are fatal.
#[derive(Error, Debug)]
pub enum OverlayError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("dial timed out")]
    Timeout(#[from] tokio::time::error::Elapsed),
    #[error("no peer in the fleet view responded FOUND")]
    NoPeerFound,
    #[error("peer sent a malformed response: {0:?}")]
    BadPeerResponse(String),
}

pub type Result<T, E = OverlayError> = std::result::Result<T, E>;
