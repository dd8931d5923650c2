//! Per-SuperNode metadata index: file basename -> set of client addresses known to hold it.
//! Grounded on `tailsrv::librarian`'s `Librarian` map-of-sets and its register/deregister
//! pairing, adapted from (file -> clients) keyed by inotify watch descriptor to (basename ->
//! clients) keyed by the basename itself.

use crate::types::{ClientAddr, Map, Set};
use std::sync::Mutex;

#[derive(Default)]
pub struct Index {
    files: Mutex<Map<String, Set<ClientAddr>>>,
}

impl Index {
    pub fn new() -> Index {
        Index::default()
    }

    /// Inserts `addr` into the entry for `basename`, creating it if absent. Idempotent.
    pub fn record(&self, basename: &str, addr: ClientAddr) {
        let mut files = self.files.lock().unwrap();
        files.entry(basename.to_owned()).or_default().insert(addr);
    }

    /// A snapshot of the holder set, or empty if the file is unknown.
    pub fn lookup(&self, basename: &str) -> Set<ClientAddr> {
        let files = self.files.lock().unwrap();
        files.get(basename).cloned().unwrap_or_default()
    }

    /// Removes `addr` from every entry, pruning any entry whose set becomes empty. Atomic with
    /// respect to `record`/`lookup` (same lock, one acquisition).
    pub fn evict(&self, addr: ClientAddr) {
        let mut files = self.files.lock().unwrap();
        files.retain(|_, holders| {
            holders.remove(&addr);
            !holders.is_empty()
        });
    }

    /// An arbitrary holder of `basename`, or `None` if it has none. Tie-break is unspecified but
    /// deterministic for a given snapshot (`HashSet` iteration order is stable between calls on
    /// an unmodified set).
    pub fn pick(&self, basename: &str) -> Option<ClientAddr> {
        let files = self.files.lock().unwrap();
        files.get(basename).and_then(|holders| holders.iter().next().copied())
    }

    /// Convenience used by DOWNLOAD: picks a holder and, if one exists, also records the
    /// requester as a new holder - all under a single lock acquisition so no other task can
    /// observe the entry between the pick and the insert.
    pub fn pick_and_add(&self, basename: &str, requester: ClientAddr) -> Option<ClientAddr> {
        let mut files = self.files.lock().unwrap();
        let entry = files.get_mut(basename)?;
        let holder = *entry.iter().next()?;
        entry.insert(requester);
        Some(holder)
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
    fn record_then_lookup() {
        let idx = Index::new();
        idx.record("a.txt", ip(1));
        assert_eq!(idx.lookup("a.txt"), [ip(1)].into_iter().collect());
    }

    #[test]
    fn record_is_idempotent() {
        let idx = Index::new();
        idx.record("a.txt", ip(1));
        idx.record("a.txt", ip(1));
        assert_eq!(idx.lookup("a.txt").len(), 1);
    }

    #[test]
    fn lookup_of_unknown_file_is_empty() {
        let idx = Index::new();
        assert!(idx.lookup("missing.bin").is_empty());
    }

    #[test]
    fn evict_prunes_empty_entries() {
        let idx = Index::new();
        idx.record("a.txt", ip(1));
        idx.evict(ip(1));
        assert!(idx.lookup("a.txt").is_empty());
    }

    #[test]
    fn evict_leaves_other_holders() {
        let idx = Index::new();
        idx.record("a.txt", ip(1));
        idx.record("a.txt", ip(2));
        idx.evict(ip(1));
        assert_eq!(idx.lookup("a.txt"), [ip(2)].into_iter().collect());
    }

    #[test]
    fn pick_returns_none_for_unknown_file() {
        let idx = Index::new();
        assert_eq!(idx.pick("nope.bin"), None);
    }

    #[test]
    fn pick_and_add_augments_holder_set() {
        let idx = Index::new();
        idx.record("doc.txt", ip(1));
        let holder = idx.pick_and_add("doc.txt", ip(2)).unwrap();
        assert_eq!(holder, ip(1));
        let holders = idx.lookup("doc.txt");
        assert!(holders.contains(&ip(1)));
        assert!(holders.contains(&ip(2)));
    }

    #[test]
    fn second_download_after_uploader_leaves_still_succeeds() {
        // Uploader disconnects after a second client has downloaded.
        let idx = Index::new();
        idx.record("doc.txt", ip(1));
        let first_holder = idx.pick_and_add("doc.txt", ip(2)).unwrap();
        assert_eq!(first_holder, ip(1));
        idx.evict(ip(1));
        let second_holder = idx.pick_and_add("doc.txt", ip(3)).unwrap();
        assert_eq!(second_holder, ip(2));
    }
}
