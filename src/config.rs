//! CLI / configuration surface. A `bpaf`-derived parser, same dependency `tailsrv` itself
//! carries, used the way a derived struct is meant to be: no hand-rolled `std::env::args`
//! walking.

use bpaf::Bpaf;
use std::net::IpAddr;

pub const DEFAULT_REGISTER_PORT: u16 = 8080;
pub const DEFAULT_RELEASE_PORT: u16 = 8081;
pub const DEFAULT_CLIENT_PORT: u16 = 8082;
pub const DEFAULT_BROADCAST_PORT: u16 = 8084;
pub const DEFAULT_ELECTION_PORT: u16 = 8085;
pub const DEFAULT_BOOTSTRAP_THRESHOLD: usize = 3;

#[derive(Debug, Clone, Copy)]
pub enum Role {
    Leader,
    Follower,
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "leader" => Ok(Role::Leader),
            "follower" => Ok(Role::Follower),
            other => Err(format!("unknown role '{other}', expected 'leader' or 'follower'")),
        }
    }
}

#[derive(Debug, Clone, Bpaf)]
#[bpaf(options, version)]
pub struct Args {
    /// Role to start in; auto-detected by probing the registration port when omitted
    #[bpaf(long, argument("ROLE"))]
    pub role: Option<Role>,

    /// The Coordinator's address, required to start as a follower
    #[bpaf(long, argument("ADDR"))]
    pub coordinator_addr: Option<IpAddr>,

    /// How many initial registrations the Coordinator waits for before the first release
    #[bpaf(long, argument("N"), fallback(DEFAULT_BOOTSTRAP_THRESHOLD))]
    pub bootstrap_threshold: usize,

    /// Coordinator registration port
    #[bpaf(long, argument("PORT"), fallback(DEFAULT_REGISTER_PORT))]
    pub register_port: u16,

    /// Release-barrier port
    #[bpaf(long, argument("PORT"), fallback(DEFAULT_RELEASE_PORT))]
    pub release_port: u16,

    /// Client-service port
    #[bpaf(long, argument("PORT"), fallback(DEFAULT_CLIENT_PORT))]
    pub client_port: u16,

    /// Membership-broadcast port
    #[bpaf(long, argument("PORT"), fallback(DEFAULT_BROADCAST_PORT))]
    pub broadcast_port: u16,

    /// Election port
    #[bpaf(long, argument("PORT"), fallback(DEFAULT_ELECTION_PORT))]
    pub election_port: u16,

    /// Don't produce output unless there's a problem
    #[bpaf(short, long)]
    pub quiet: bool,
}
