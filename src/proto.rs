//! Line-oriented wire codec. Pure parse/format, no I/O, so it's unit-testable without sockets -
//! the shape `tailsrv::proto` uses for its own `FromStr` parser.

use crate::error::ProtocolError;
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;

pub const INVALID_COMMAND: &str = "Comando inválido\n";

/// A client or peer command, already validated for minimum arity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Upload { path: String },
    Download { name: String },
    Search { name: String },
    Close,
}

impl FromStr for Command {
    type Err = ProtocolError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let mut tokens = line.split_whitespace();
        let verb = tokens.next().ok_or(ProtocolError::Malformed)?;
        match verb {
            "UPLOAD" => {
                let path = tokens.next().ok_or(ProtocolError::Malformed)?;
                Ok(Command::Upload { path: path.to_owned() })
            }
            "DOWNLOAD" => {
                let name = tokens.next().ok_or(ProtocolError::Malformed)?;
                Ok(Command::Download { name: name.to_owned() })
            }
            "SEARCH" => {
                let name = tokens.next().ok_or(ProtocolError::Malformed)?;
                Ok(Command::Search { name: name.to_owned() })
            }
            "CLOSE" => Ok(Command::Close),
            _ => Err(ProtocolError::Malformed),
        }
    }
}

/// Reduces a path to its final component: only the basename is ever indexed.
/// `../a/b.txt` becomes `b.txt`.
pub fn basename(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_owned())
}

/// A response a SuperNode sends back to a Client or to a peer SuperNode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    UploadAck,
    DownloadHit { name: String, addr: IpAddr },
    DownloadMiss { name: String },
    InvalidHolderAddr,
    Invalid,
    Found { addr: IpAddr },
    NotFound,
}

impl Response {
    pub fn to_wire(&self) -> String {
        match self {
            Response::UploadAck => "Upload registrado no super nó.\n".to_owned(),
            Response::DownloadHit { name, addr } => format!(
                "O arquivo '{name}' está disponível no cliente com IP: {addr}\n"
            ),
            Response::DownloadMiss { name } => {
                format!("ERROR: Arquivo '{name}' não encontrado em nenhum super nó\n")
            }
            Response::InvalidHolderAddr => {
                "ERROR: IP do cliente com o arquivo é inválido\n".to_owned()
            }
            Response::Invalid => INVALID_COMMAND.to_owned(),
            Response::Found { addr } => format!("FOUND {addr}\n"),
            Response::NotFound => "NOTFOUND\n".to_owned(),
        }
    }
}
