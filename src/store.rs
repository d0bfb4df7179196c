//! The protected resource: a toy key-value store of per-peer slots.
//!
//! Each peer owns one row `{ peer_id, clock, entries }`, updated only while
//! that peer holds the critical section. Mutual exclusion is guaranteed
//! entirely by the message protocol, not by the store: the interior mutex
//! below only makes concurrent *reads* of the snapshot safe, and the
//! occupancy flag exists to detect protocol failures, never to prevent them.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::info;
use rand::Rng;

use crate::protocol::message::PeerId;
use crate::protocol::peer::CriticalSection;

/// One peer's row in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotEntry {
    /// Owning peer.
    pub peer_id: PeerId,
    /// Peer's logical clock at its most recent entry.
    pub clock: u64,
    /// Completed critical-section turns for this peer.
    pub entries: u32,
}

struct StoreInner {
    slots: Mutex<BTreeMap<PeerId, SlotEntry>>,
    /// Set while any peer is inside the critical section.
    occupied: AtomicBool,
    /// Bounds (milliseconds) of the simulated work duration.
    hold_ms: Range<u64>,
}

/// Shared handle to the store; clones refer to the same slots.
#[derive(Clone)]
pub struct SlotStore {
    inner: Arc<StoreInner>,
}

impl SlotStore {
    /// Create a store with one zeroed row per peer in `1..=num_peers`.
    ///
    /// `hold_ms` bounds the simulated work each entry performs; an empty
    /// range means no hold at all (used by tests).
    pub fn new(num_peers: u32, hold_ms: Range<u64>) -> Self {
        let slots = (1..=num_peers)
            .map(|peer_id| {
                (
                    peer_id,
                    SlotEntry {
                        peer_id,
                        clock: 0,
                        entries: 0,
                    },
                )
            })
            .collect();

        SlotStore {
            inner: Arc::new(StoreInner {
                slots: Mutex::new(slots),
                occupied: AtomicBool::new(false),
                hold_ms,
            }),
        }
    }

    /// Copy of all rows, ordered by peer id.
    pub fn snapshot(&self) -> Vec<SlotEntry> {
        self.inner
            .slots
            .lock()
            .expect("store mutex poisoned")
            .values()
            .copied()
            .collect()
    }
}

impl CriticalSection for SlotStore {
    fn enter(&mut self, peer: PeerId, clock: u64, entry_index: u32) {
        // Single occupancy is the protocol's promise; any overlap here is a
        // mutual-exclusion failure, not a store bug.
        let was_occupied = self.inner.occupied.swap(true, Ordering::SeqCst);
        assert!(
            !was_occupied,
            "peer {} entered the critical section while another peer held it",
            peer
        );

        {
            let mut slots = self.inner.slots.lock().expect("store mutex poisoned");
            slots.insert(
                peer,
                SlotEntry {
                    peer_id: peer,
                    clock,
                    entries: entry_index,
                },
            );
        }
        info!(
            "peer {} updated its slot (clock {}, entry {})",
            peer, clock, entry_index
        );

        if !self.inner.hold_ms.is_empty() {
            let ms = rand::thread_rng().gen_range(self.inner.hold_ms.clone());
            thread::sleep(Duration::from_millis(ms));
        }

        self.inner.occupied.store(false, Ordering::SeqCst);
    }
}
