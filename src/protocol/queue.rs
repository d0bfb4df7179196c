//! Pending-request queue.
//!
//! Each peer keeps a local, totally ordered view of every outstanding
//! REQUEST it knows about: its own and every one it has observed. The queue
//! is what turns "all acks received" into a real admission rule: a peer may
//! enter only when its own request carries the globally lowest known
//! `(timestamp, sender)` stamp. An ack counter alone cannot provide that
//! total order across concurrent requesters.
//!
//! # Invariants
//!
//! 1. Entries are always sorted ascending by `(timestamp, sender)`.
//! 2. At most one entry per `(sender, timestamp)` pair.
//! 3. Every removal matches exactly one prior insertion; a miss is a
//!    protocol-correctness violation surfaced as [`QueueError::NotFound`].

use crate::errors::QueueError;
use crate::protocol::message::{PeerId, RequestStamp};

/// One peer's ordered view of outstanding requests.
#[derive(Debug, Default)]
pub struct RequestQueue {
    /// Sorted ascending by `(timestamp, sender)`.
    entries: Vec<RequestStamp>,
}

impl RequestQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        RequestQueue { entries: Vec::new() }
    }

    /// Insert a request stamp, keeping the queue sorted.
    ///
    /// Reinserting an already-present `(sender, timestamp)` pair is a no-op.
    /// Returns true if the entry was actually added.
    pub fn insert(&mut self, stamp: RequestStamp) -> bool {
        match self.entries.binary_search(&stamp) {
            Ok(_) => false,
            Err(pos) => {
                self.entries.insert(pos, stamp);
                true
            }
        }
    }

    /// The lowest-ranked pending request, if any.
    #[inline]
    pub fn peek_min(&self) -> Option<RequestStamp> {
        self.entries.first().copied()
    }

    /// True iff the queue head exists and belongs to `peer`.
    #[inline]
    pub fn is_head(&self, peer: PeerId) -> bool {
        self.peek_min().map(|s| s.sender == peer).unwrap_or(false)
    }

    /// Remove the unique entry keyed `(sender, timestamp)`.
    ///
    /// In a correct run every RELEASE and every local completion matches an
    /// entry; `NotFound` here means a duplicate RELEASE or a lost insert.
    pub fn remove_matching(&mut self, sender: PeerId, timestamp: u64) -> Result<(), QueueError> {
        let key = RequestStamp::new(sender, timestamp);
        match self.entries.binary_search(&key) {
            Ok(pos) => {
                self.entries.remove(pos);
                Ok(())
            }
            Err(_) => Err(QueueError::NotFound { sender, timestamp }),
        }
    }

    /// Number of pending requests in this view.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no requests are pending.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if the `(sender, timestamp)` key is present.
    pub fn contains(&self, sender: PeerId, timestamp: u64) -> bool {
        self.entries
            .binary_search(&RequestStamp::new(sender, timestamp))
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sorted_by_stamp_then_sender() {
        let mut queue = RequestQueue::new();
        queue.insert(RequestStamp::new(2, 7));
        queue.insert(RequestStamp::new(3, 1));
        queue.insert(RequestStamp::new(1, 7));

        // (1,3) first, then the timestamp-7 pair tie-broken by sender id.
        assert_eq!(queue.peek_min(), Some(RequestStamp::new(3, 1)));
        queue.remove_matching(3, 1).unwrap();
        assert_eq!(queue.peek_min(), Some(RequestStamp::new(1, 7)));
        assert!(queue.is_head(1));
        assert!(!queue.is_head(2));
    }

    #[test]
    fn test_duplicate_insert_is_noop() {
        let mut queue = RequestQueue::new();
        assert!(queue.insert(RequestStamp::new(1, 4)));
        assert!(!queue.insert(RequestStamp::new(1, 4)));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_remove_matching_once_then_not_found() {
        let mut queue = RequestQueue::new();
        queue.insert(RequestStamp::new(1, 3));

        assert!(queue.remove_matching(1, 3).is_ok());
        // A second removal of the same key is a misuse.
        assert_eq!(
            queue.remove_matching(1, 3),
            Err(QueueError::NotFound { sender: 1, timestamp: 3 })
        );
    }

    #[test]
    fn test_remove_is_keyed_not_positional() {
        let mut queue = RequestQueue::new();
        queue.insert(RequestStamp::new(1, 2));
        queue.insert(RequestStamp::new(2, 2));
        queue.insert(RequestStamp::new(3, 5));

        // Removing the middle entry leaves head and tail intact.
        queue.remove_matching(2, 2).unwrap();
        assert_eq!(queue.len(), 2);
        assert!(queue.contains(1, 2));
        assert!(queue.contains(3, 5));
    }

    #[test]
    fn test_empty_queue_has_no_head() {
        let queue = RequestQueue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.peek_min(), None);
        assert!(!queue.is_head(1));
    }
}
