//! Membership set shared by the relay's connection workers and broadcast legs.

use std::{
    collections::HashSet,
    sync::{Mutex, MutexGuard, PoisonError},
};

use crate::peer::PeerAddress;

/// Deduplicated, concurrently mutable set of peer addresses.
///
/// Every operation takes the lock for the duration of a single set operation
/// only, so callers never coordinate locking themselves. Iteration goes
/// through [`PeerRegistry::snapshot`], which copies the members out and
/// releases the lock before the caller starts walking them.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    members: Mutex<HashSet<PeerAddress>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `addr`, returning `true` only when it was not already a member.
    pub fn add(&self, addr: PeerAddress) -> bool {
        self.members().insert(addr)
    }

    /// Removes `addr`, returning `true` when it was a member.
    pub fn remove(&self, addr: &PeerAddress) -> bool {
        self.members().remove(addr)
    }

    pub fn contains(&self, addr: &PeerAddress) -> bool {
        self.members().contains(addr)
    }

    pub fn len(&self) -> usize {
        self.members().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members().is_empty()
    }

    /// Point-in-time copy of the membership, sorted for stable output.
    pub fn snapshot(&self) -> Vec<PeerAddress> {
        let mut members: Vec<PeerAddress> = self.members().iter().cloned().collect();
        members.sort();
        members
    }

    fn members(&self) -> MutexGuard<'_, HashSet<PeerAddress>> {
        // A panicking holder cannot leave a HashSet half-inserted, so the data is still usable.
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    fn addr(port: u16) -> PeerAddress {
        PeerAddress::new("127.0.0.1", port)
    }

    #[test]
    fn add_reports_first_insertion_only() {
        let registry = PeerRegistry::new();
        assert!(registry.add(addr(9000)));
        assert!(!registry.add(addr(9000)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_shrinks_membership() {
        let registry = PeerRegistry::new();
        registry.add(addr(9000));
        registry.add(addr(9001));

        assert!(registry.remove(&addr(9000)));
        assert!(!registry.remove(&addr(9000)));
        assert_eq!(registry.snapshot(), vec![addr(9001)]);
    }

    #[test]
    fn snapshot_is_detached_from_later_mutation() {
        let registry = PeerRegistry::new();
        registry.add(addr(9000));
        registry.add(addr(9001));

        let snapshot = registry.snapshot();
        registry.remove(&addr(9000));
        registry.add(addr(9002));

        assert_eq!(snapshot, vec![addr(9000), addr(9001)]);
        assert_eq!(registry.snapshot(), vec![addr(9001), addr(9002)]);
    }

    #[test]
    fn concurrent_duplicate_adds_leave_one_entry() {
        let registry = Arc::new(PeerRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.add(addr(9000)))
            })
            .collect();

        let inserted = handles
            .into_iter()
            .map(|handle| handle.join().expect("adder thread"))
            .filter(|inserted| *inserted)
            .count();

        assert_eq!(inserted, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn iteration_tolerates_concurrent_mutation() {
        let registry = Arc::new(PeerRegistry::new());
        for port in 0..64 {
            registry.add(addr(10_000 + port));
        }

        let writer = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for port in 0..64 {
                    registry.remove(&addr(10_000 + port));
                    registry.add(addr(20_000 + port));
                }
            })
        };

        for _ in 0..64 {
            let seen = registry.snapshot().into_iter().count();
            assert!(seen <= 128);
        }

        writer.join().expect("writer thread");
        assert_eq!(registry.len(), 64);
        assert!(registry.snapshot().iter().all(|member| member.port() >= 20_000));
    }
}
