//! The fleet view: the `id -> SuperNodeRecord` map every node holds a copy of. The Coordinator
//! is the sole incremental writer; followers swap in whole replacements received over the
//! broadcast channel. Grounded on `tailsrv::librarian`'s map-of-structs shape and the original
//! prototype's `superNodes map[int]SuperNode`.

use crate::types::{ClientAddr, Map, NodeId};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperNodeRecord {
    pub id: NodeId,
    pub addr: ClientAddr,
}

#[derive(Default)]
pub struct FleetView {
    members: Mutex<Map<NodeId, SuperNodeRecord>>,
}

impl FleetView {
    pub fn new() -> FleetView {
        FleetView::default()
    }

    /// `true` if some existing member already has this address: the Coordinator refuses a
    /// second registration from an address already present.
    pub fn contains_addr(&self, addr: ClientAddr) -> bool {
        self.members.lock().unwrap().values().any(|m| m.addr == addr)
    }

    /// Allocates the next id and commits the record in one critical section, so allocation is
    /// serialized with the membership check.
    pub fn register(&self, addr: ClientAddr) -> Option<NodeId> {
        let mut members = self.members.lock().unwrap();
        if members.values().any(|m| m.addr == addr) {
            return None;
        }
        let id = members.keys().copied().max().map(|n| n + 1).unwrap_or(0);
        members.insert(id, SuperNodeRecord { id, addr });
        Some(id)
    }

    pub fn snapshot(&self) -> Vec<SuperNodeRecord> {
        let mut v: Vec<_> = self.members.lock().unwrap().values().copied().collect();
        v.sort_by_key(|r| r.id);
        v
    }

    /// Followers replace their whole view on a broadcast receive; `addrs` is ordered and ids are
    /// derived from list position.
    pub fn replace_from_addr_list(&self, addrs: Vec<ClientAddr>) {
        let mut members = self.members.lock().unwrap();
        members.clear();
        for (i, addr) in addrs.into_iter().enumerate() {
            let id = i as NodeId;
            members.insert(id, SuperNodeRecord { id, addr });
        }
    }

    pub fn len(&self) -> usize {
        self.members.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn ip(n: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, n))
    }

    #[test]
    fn registration_is_monotonic() {
        let fleet = FleetView::new();
        assert_eq!(fleet.register(ip(1)), Some(0));
        assert_eq!(fleet.register(ip(2)), Some(1));
        assert_eq!(fleet.register(ip(3)), Some(2));
    }

    #[test]
    fn duplicate_address_is_refused() {
        let fleet = FleetView::new();
        fleet.register(ip(1));
        assert_eq!(fleet.register(ip(1)), None);
        assert_eq!(fleet.len(), 1);
    }

    #[test]
    fn replace_from_addr_list_derives_id_from_position() {
        let fleet = FleetView::new();
        fleet.replace_from_addr_list(vec![ip(5), ip(6), ip(7)]);
        let snap = fleet.snapshot();
        assert_eq!(snap[0], SuperNodeRecord { id: 0, addr: ip(5) });
        assert_eq!(snap[2], SuperNodeRecord { id: 2, addr: ip(7) });
    }
}
