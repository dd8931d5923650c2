//! SuperNode overlay for a peer-to-peer file-locator network: Clients upload/download through a
//! middle tier of SuperNodes, which index file holders and elect a Coordinator among themselves.

pub mod broker;
pub mod config;
pub mod election;
pub mod error;
pub mod fleet;
pub mod health;
pub mod index;
pub mod membership;
pub mod node;
pub mod proto;
pub mod session;
pub mod state;
pub mod types;
pub mod wire;

use tracing::Level;
use tracing_subscriber::{prelude::*, EnvFilter};

/// Initializes the global `tracing` subscriber: an `EnvFilter` defaulting to INFO and respecting
/// `RUST_LOG`, plus a `fmt` layer to stderr. Mirrors the shape of `tailsrv`'s own `log_init`.
pub fn log_init(quiet: bool, #[cfg(feature = "systemd")] journald: bool) {
    let default_level = if quiet { Level::WARN } else { Level::INFO };
    let filter = EnvFilter::builder().with_default_directive(default_level.into()).from_env_lossy();
    let subscriber = tracing_subscriber::registry().with(filter);

    #[cfg(feature = "systemd")]
    if journald {
        if let Ok(layer) = tracing_journald::layer() {
            subscriber.with(layer).init();
            return;
        }
    }

    let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    subscriber.with(layer).init();
}
