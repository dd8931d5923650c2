use std::collections::hash_map::RandomState;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

pub type Map<K, V> = HashMap<K, V, RandomState>;
pub type Set<T> = HashSet<T, RandomState>;

/// A SuperNode's id, assigned by the Coordinator in registration order.
pub type NodeId = u32;

/// The host portion of a connected peer's address. Ports are well-known per role, so only the
/// host is ever stored.
pub type ClientAddr = IpAddr;
