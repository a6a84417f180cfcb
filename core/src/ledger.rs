// Dedup & Ack Ledger — the process's memory of packet traffic
//
// Two records, both written from more than one task:
// - seen ids: every packet id this process has handled, so re-deliveries and
//   flood echoes are dropped exactly once
// - pending acks: ids of locally originated packets, flipped when a matching
//   Ack arrives; purely observational, nothing retries on it
//
// Check-and-insert and acknowledge are each a single critical section, so
// two concurrent receive polls can never both claim "first delivery" and an
// acknowledgment update can never be lost.
//
// The seen set is bounded (insertion-order eviction); the ack map evicts
// only already-acked entries, so an answer that never comes stays PENDING
// for the life of the process.

use crate::codec::PacketId;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

/// Default bound for the seen-id set.
pub const DEFAULT_SEEN_CAPACITY: usize = 4096;

/// Acknowledgment state of a locally originated packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum AckStatus {
    Pending,
    Acked,
    Unknown,
}

impl fmt::Display for AckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AckStatus::Pending => write!(f, "PENDING"),
            AckStatus::Acked => write!(f, "ACKED"),
            AckStatus::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

#[derive(Debug, Default)]
struct LedgerInner {
    seen: HashSet<PacketId>,
    seen_order: VecDeque<PacketId>,
    acks: HashMap<PacketId, bool>,
    ack_order: VecDeque<PacketId>,
}

/// The dedup & ack ledger. One per node process, shared across tasks.
#[derive(Debug)]
pub struct Ledger {
    inner: Mutex<LedgerInner>,
    capacity: usize,
}

impl Ledger {
    pub fn new(capacity: usize) -> Self {
        Ledger {
            inner: Mutex::new(LedgerInner::default()),
            capacity: capacity.max(1),
        }
    }

    /// Check whether `id` was already processed, recording it if not.
    ///
    /// Atomic check-and-insert: exactly one caller per id ever sees `false`.
    pub fn is_duplicate(&self, id: PacketId) -> bool {
        let mut inner = self.inner.lock();
        if inner.seen.contains(&id) {
            return true;
        }
        inner.seen.insert(id);
        inner.seen_order.push_back(id);
        while inner.seen_order.len() > self.capacity {
            if let Some(oldest) = inner.seen_order.pop_front() {
                inner.seen.remove(&oldest);
            }
        }
        false
    }

    /// Record a locally originated packet as awaiting acknowledgment.
    pub fn register_pending(&self, id: PacketId) {
        let mut inner = self.inner.lock();
        if inner.acks.insert(id, false).is_none() {
            inner.ack_order.push_back(id);
        }
        // Evict only entries that already completed; un-acked entries are
        // kept indefinitely so their status stays observable.
        while inner.acks.len() > self.capacity {
            let Some(pos) = inner
                .ack_order
                .iter()
                .position(|entry| inner.acks.get(entry) == Some(&true))
            else {
                break;
            };
            if let Some(done) = inner.ack_order.remove(pos) {
                inner.acks.remove(&done);
            }
        }
    }

    /// Flip a pending entry to acked.
    ///
    /// Returns `true` only on the pending→acked transition; unknown ids and
    /// repeat acknowledgments are silently ignored.
    pub fn acknowledge(&self, id: PacketId) -> bool {
        let mut inner = self.inner.lock();
        match inner.acks.get_mut(&id) {
            Some(acked) if !*acked => {
                *acked = true;
                true
            }
            _ => false,
        }
    }

    pub fn status(&self, id: PacketId) -> AckStatus {
        match self.inner.lock().acks.get(&id) {
            Some(false) => AckStatus::Pending,
            Some(true) => AckStatus::Acked,
            None => AckStatus::Unknown,
        }
    }

    /// Snapshot of every tracked send, oldest first (the `?ACK` table).
    pub fn ack_report(&self) -> Vec<(PacketId, AckStatus)> {
        let inner = self.inner.lock();
        inner
            .ack_order
            .iter()
            .filter_map(|id| {
                inner.acks.get(id).map(|acked| {
                    let status = if *acked {
                        AckStatus::Acked
                    } else {
                        AckStatus::Pending
                    };
                    (*id, status)
                })
            })
            .collect()
    }

    pub fn seen_count(&self) -> usize {
        self.inner.lock().seen.len()
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Ledger::new(DEFAULT_SEEN_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> PacketId {
        s.parse().unwrap()
    }

    #[test]
    fn test_duplicate_detection() {
        let ledger = Ledger::default();
        assert!(!ledger.is_duplicate(id("aaaa0001")));
        assert!(ledger.is_duplicate(id("aaaa0001")));
        assert!(!ledger.is_duplicate(id("aaaa0002")));
    }

    #[test]
    fn test_seen_set_is_bounded() {
        let ledger = Ledger::new(2);
        assert!(!ledger.is_duplicate(id("aaaa0001")));
        assert!(!ledger.is_duplicate(id("aaaa0002")));
        assert!(!ledger.is_duplicate(id("aaaa0003")));
        assert_eq!(ledger.seen_count(), 2);
        // The oldest entry aged out and would be processed again
        assert!(!ledger.is_duplicate(id("aaaa0001")));
    }

    #[test]
    fn test_acknowledge_transitions_once() {
        let ledger = Ledger::default();
        let packet = id("beef0001");

        assert_eq!(ledger.status(packet), AckStatus::Unknown);
        ledger.register_pending(packet);
        assert_eq!(ledger.status(packet), AckStatus::Pending);

        assert!(ledger.acknowledge(packet));
        assert_eq!(ledger.status(packet), AckStatus::Acked);

        // Second ack is a no-op
        assert!(!ledger.acknowledge(packet));
        assert_eq!(ledger.status(packet), AckStatus::Acked);
    }

    #[test]
    fn test_acknowledge_unknown_id_ignored() {
        let ledger = Ledger::default();
        assert!(!ledger.acknowledge(id("00000000")));
        assert_eq!(ledger.status(id("00000000")), AckStatus::Unknown);
    }

    #[test]
    fn test_eviction_spares_pending_entries() {
        let ledger = Ledger::new(2);
        ledger.register_pending(id("aaaa0001"));
        ledger.register_pending(id("aaaa0002"));
        ledger.acknowledge(id("aaaa0001"));
        ledger.register_pending(id("aaaa0003"));

        // The acked entry was evicted; both pending entries survive
        assert_eq!(ledger.status(id("aaaa0001")), AckStatus::Unknown);
        assert_eq!(ledger.status(id("aaaa0002")), AckStatus::Pending);
        assert_eq!(ledger.status(id("aaaa0003")), AckStatus::Pending);
    }

    #[test]
    fn test_pending_entries_never_evicted() {
        let ledger = Ledger::new(2);
        for i in 0..10 {
            ledger.register_pending(id(&format!("aaaa{:04}", i)));
        }
        // Nothing acked, so nothing evictable — all ten remain pending
        for i in 0..10 {
            assert_eq!(
                ledger.status(id(&format!("aaaa{:04}", i))),
                AckStatus::Pending
            );
        }
    }

    #[test]
    fn test_ack_report_order() {
        let ledger = Ledger::default();
        ledger.register_pending(id("aaaa0001"));
        ledger.register_pending(id("aaaa0002"));
        ledger.acknowledge(id("aaaa0002"));

        let report = ledger.ack_report();
        assert_eq!(report.len(), 2);
        assert_eq!(report[0], (id("aaaa0001"), AckStatus::Pending));
        assert_eq!(report[1], (id("aaaa0002"), AckStatus::Acked));
    }

    #[test]
    fn test_check_and_insert_is_atomic() {
        use std::sync::Arc;

        let ledger = Arc::new(Ledger::default());
        let packet = id("cafe0001");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || ledger.is_duplicate(packet))
            })
            .collect();

        // Exactly one thread may observe the first delivery
        let first_claims = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|duplicate| !duplicate)
            .count();
        assert_eq!(first_claims, 1);
    }
}
