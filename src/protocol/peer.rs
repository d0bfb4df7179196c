//! Peer protocol engine.
//!
//! One engine drives one peer: it crafts and broadcasts requests, processes
//! incoming messages, decides when the peer may enter the critical section,
//! runs the protected work, and announces release.
//!
//! # Invariants
//!
//! 1. **Admission**: a peer enters only when it holds all N−1 acks AND its
//!    own request is the queue head (globally lowest `(timestamp, sender)`).
//! 2. **Clock discipline**: every receipt observes the remote stamp; every
//!    request send ticks the clock.
//! 3. **Release matching**: a RELEASE carries the *original* request stamp,
//!    so every peer removes exactly the entry it inserted.
//! 4. **Continued participation**: a peer that has exhausted its entry
//!    quota keeps answering Requests and applying Releases; other peers'
//!    liveness depends on it.

use std::time::Duration;

use log::{debug, info, warn};

use crate::errors::ProtocolError;
use crate::protocol::clock::LamportClock;
use crate::protocol::message::{PeerId, PeerMessage, RequestStamp};
use crate::protocol::queue::RequestQueue;
use crate::transport::PeerEndpoint;

/// Maximum supported peer count (bitset-backed ack tracking).
pub const MAX_PEERS: u32 = 64;

/// How long a blocking poll waits before rechecking the shutdown flag.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Compact set of peers that have acknowledged the current request.
///
/// Bit `id - 1` is set once peer `id` has acked. A set, not a counter, so a
/// duplicated ack can never be double-counted toward admission.
#[derive(Clone, Copy, Default)]
pub struct AckSet(u64);

impl AckSet {
    /// Empty set.
    #[inline]
    pub fn new() -> Self {
        AckSet(0)
    }

    /// Record an ack from `peer`.
    #[inline]
    pub fn insert(&mut self, peer: PeerId) {
        debug_assert!(peer >= 1 && peer <= MAX_PEERS, "peer id out of range");
        self.0 |= 1u64 << (peer - 1);
    }

    /// True if `peer` has already acked.
    #[inline]
    pub fn contains(&self, peer: PeerId) -> bool {
        (self.0 & (1u64 << (peer - 1))) != 0
    }

    /// Number of distinct ackers.
    #[inline]
    pub fn count(&self) -> u32 {
        self.0.count_ones()
    }

    /// Reset for the next request cycle.
    #[inline]
    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

/// Lifecycle phase of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerPhase {
    /// No outstanding own request; free to issue one.
    Idle,
    /// Own request broadcast; collecting acks and queue priority.
    WaitingAcks,
    /// Entry quota exhausted; servicing others' traffic only.
    Done,
}

/// Protected work executed while inside the critical section.
///
/// The protocol itself serializes invocations: a correct run never calls
/// `enter` from two peers at once, and implementations may rely on that.
pub trait CriticalSection {
    /// Perform one protected-work turn.
    ///
    /// `clock` is the peer's logical clock at entry; `entry_index` counts
    /// this peer's completed entries starting at 1.
    fn enter(&mut self, peer: PeerId, clock: u64, entry_index: u32);
}

/// The per-peer protocol state machine.
pub struct PeerEngine {
    /// This peer's id, in `1..=num_peers`.
    id: PeerId,
    /// Acks needed before entry: always N−1.
    acks_required: u32,
    /// Lamport clock.
    clock: LamportClock,
    /// Local view of all outstanding requests.
    queue: RequestQueue,
    /// Peers that have acked the current own request.
    acks: AckSet,
    /// Stamp of the outstanding own request, if any.
    own_request: Option<u64>,
    /// Completed critical-section turns.
    entries_completed: u32,
    /// Fixed bound on own entries.
    entry_limit: u32,
    /// Current lifecycle phase.
    phase: PeerPhase,
    /// This peer's view of the mesh.
    endpoint: PeerEndpoint,
}

impl PeerEngine {
    /// Create an engine for peer `id` in a cluster of `num_peers`.
    ///
    /// # Panics
    /// Panics if `id` is not in `1..=num_peers`, if the cluster is smaller
    /// than 2 or larger than [`MAX_PEERS`], or if the endpoint belongs to a
    /// different peer.
    pub fn new(id: PeerId, num_peers: u32, entry_limit: u32, endpoint: PeerEndpoint) -> Self {
        assert!(num_peers >= 2, "mutual exclusion needs at least 2 peers");
        assert!(
            num_peers <= MAX_PEERS,
            "num_peers {} exceeds MAX_PEERS {}",
            num_peers,
            MAX_PEERS
        );
        assert!(
            id >= 1 && id <= num_peers,
            "peer id {} must be in 1..={}",
            id,
            num_peers
        );
        assert_eq!(endpoint.peer_id, id, "endpoint belongs to a different peer");
        assert_eq!(
            endpoint.fanout() as u32,
            num_peers - 1,
            "endpoint fanout does not match the cluster size"
        );

        PeerEngine {
            id,
            acks_required: num_peers - 1,
            clock: LamportClock::new(),
            queue: RequestQueue::new(),
            acks: AckSet::new(),
            own_request: None,
            entries_completed: 0,
            entry_limit,
            // A zero quota starts in the service-only phase.
            phase: if entry_limit == 0 {
                PeerPhase::Done
            } else {
                PeerPhase::Idle
            },
            endpoint,
        }
    }

    /// This peer's id.
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> PeerPhase {
        self.phase
    }

    /// Current logical clock value.
    pub fn clock_value(&self) -> u64 {
        self.clock.value()
    }

    /// Completed critical-section turns.
    pub fn entries_completed(&self) -> u32 {
        self.entries_completed
    }

    /// Number of requests in this peer's pending view.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Distinct acks collected for the current own request.
    pub fn acks_received(&self) -> u32 {
        self.acks.count()
    }

    /// True once the entry quota is exhausted.
    pub fn is_done(&self) -> bool {
        self.phase == PeerPhase::Done
    }

    // =========================================================================
    // REQUEST CYCLE
    // =========================================================================

    /// Issue a new entry request: tick, enqueue own stamp, broadcast.
    ///
    /// Returns the request's timestamp. Only valid while `Idle` with quota
    /// remaining.
    pub fn request_entry(&mut self) -> Result<u64, ProtocolError> {
        if self.phase != PeerPhase::Idle {
            return Err(ProtocolError::invariant(
                self.id,
                format!("request_entry in phase {:?}", self.phase),
            ));
        }

        let timestamp = self.clock.tick();
        self.queue.insert(RequestStamp::new(self.id, timestamp));
        self.acks.clear();
        self.own_request = Some(timestamp);
        self.phase = PeerPhase::WaitingAcks;

        debug!("peer {} requesting entry with stamp {}", self.id, timestamp);
        self.endpoint.broadcast(PeerMessage::Request {
            sender: self.id,
            timestamp,
        })?;

        Ok(timestamp)
    }

    /// True when the admission condition holds: all N−1 acks are in AND the
    /// own request is the globally lowest pending stamp this peer knows of.
    ///
    /// Both legs are required. All acks without queue priority means some
    /// lower-stamped peer goes first; queue priority without all acks means
    /// some peer may not have seen the request yet.
    pub fn ready_to_enter(&self) -> bool {
        self.phase == PeerPhase::WaitingAcks
            && self.acks.count() == self.acks_required
            && self.queue.is_head(self.id)
    }

    /// Enter the critical section, run the protected work, broadcast RELEASE.
    ///
    /// Caller must have checked [`ready_to_enter`](Self::ready_to_enter); a
    /// queue head that is not the local request is a fatal invariant
    /// violation, not a wait condition.
    pub fn enter<S: CriticalSection>(&mut self, section: &mut S) -> Result<(), ProtocolError> {
        let own_ts = self.own_request.ok_or_else(|| {
            ProtocolError::invariant(self.id, "enter without an outstanding request")
        })?;

        let head = self.queue.peek_min().ok_or_else(|| {
            ProtocolError::invariant(self.id, "enter with an empty request queue")
        })?;
        if head.sender != self.id || head.timestamp != own_ts {
            return Err(ProtocolError::invariant(
                self.id,
                format!(
                    "queue head ({}, {}) is not own request ({}, {})",
                    head.sender, head.timestamp, self.id, own_ts
                ),
            ));
        }

        self.queue
            .remove_matching(self.id, own_ts)
            .map_err(|e| ProtocolError::from((self.id, e)))?;
        self.acks.clear();
        self.entries_completed += 1;

        info!(
            "peer {} entering critical section (entry {}/{}, clock {})",
            self.id,
            self.entries_completed,
            self.entry_limit,
            self.clock.value()
        );
        section.enter(self.id, self.clock.value(), self.entries_completed);

        // The RELEASE carries the original request stamp so every peer can
        // match and remove the entry it inserted.
        self.endpoint.broadcast(PeerMessage::Release {
            sender: self.id,
            timestamp: own_ts,
        })?;
        self.own_request = None;
        self.phase = if self.entries_completed >= self.entry_limit {
            info!("peer {} reached its entry limit, now servicing only", self.id);
            PeerPhase::Done
        } else {
            PeerPhase::Idle
        };

        Ok(())
    }

    // =========================================================================
    // MESSAGE HANDLING
    // =========================================================================

    /// Apply one incoming message to the local state.
    fn handle_message(&mut self, from: PeerId, msg: PeerMessage) -> Result<(), ProtocolError> {
        if from != msg.sender() {
            return Err(ProtocolError::invariant(
                self.id,
                format!(
                    "message from channel {} claims sender {}",
                    from,
                    msg.sender()
                ),
            ));
        }

        match msg {
            PeerMessage::Request { sender, timestamp } => {
                let now = self.clock.observe(timestamp);
                self.queue.insert(RequestStamp::new(sender, timestamp));
                debug!(
                    "peer {} queued request ({}, {}), clock {}",
                    self.id, sender, timestamp, now
                );
                // The ack carries the clock's current value after the
                // observe, not a fresh tick.
                self.endpoint.send_to(
                    sender,
                    PeerMessage::Ack {
                        sender: self.id,
                        timestamp: now,
                        target: sender,
                    },
                )?;
            }

            PeerMessage::Ack { sender, timestamp, target } => {
                if target != self.id {
                    // The mesh delivers acks point-to-point, so this cannot
                    // fire over the in-process transport.
                    debug!(
                        "peer {} ignoring ack addressed to peer {}",
                        self.id, target
                    );
                    return Ok(());
                }
                self.clock.observe(timestamp);
                if self.phase == PeerPhase::WaitingAcks {
                    if self.acks.contains(sender) {
                        warn!(
                            "peer {} received a duplicate ack from {}",
                            self.id, sender
                        );
                    }
                    self.acks.insert(sender);
                    debug!(
                        "peer {} has {}/{} acks",
                        self.id,
                        self.acks.count(),
                        self.acks_required
                    );
                } else {
                    warn!(
                        "peer {} received ack from {} outside a request cycle",
                        self.id, sender
                    );
                }
            }

            PeerMessage::Release { sender, timestamp } => {
                self.clock.observe(timestamp);
                self.queue
                    .remove_matching(sender, timestamp)
                    .map_err(|e| ProtocolError::from((self.id, e)))?;
                debug!(
                    "peer {} dequeued released request ({}, {})",
                    self.id, sender, timestamp
                );
            }
        }

        Ok(())
    }

    /// Decode an inbound frame; failure is fatal at this peer.
    fn decode_frame(&self, frame: &[u8]) -> Result<PeerMessage, ProtocolError> {
        PeerMessage::decode(frame).map_err(|source| ProtocolError::MalformedMessage {
            peer: self.id,
            source,
        })
    }

    /// Process one pending inbound message, if any.
    ///
    /// Returns true if a message was processed.
    pub fn process_one(&mut self) -> Result<bool, ProtocolError> {
        match self.endpoint.try_recv() {
            Some((from, frame)) => {
                let msg = self.decode_frame(&frame)?;
                self.handle_message(from, msg)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drain all currently pending inbound messages.
    ///
    /// Returns the number of messages processed.
    pub fn process_all(&mut self) -> Result<usize, ProtocolError> {
        let mut processed = 0;
        while self.process_one()? {
            processed += 1;
        }
        Ok(processed)
    }

    /// Block for up to [`POLL_INTERVAL`] for one message, then drain the
    /// rest without blocking.
    ///
    /// This is the engine's only suspension point; the timeout exists so the
    /// hosting thread can recheck its shutdown flag.
    pub fn poll(&mut self) -> Result<usize, ProtocolError> {
        match self.endpoint.recv_timeout(POLL_INTERVAL) {
            Some((from, frame)) => {
                let msg = self.decode_frame(&frame)?;
                self.handle_message(from, msg)?;
                Ok(1 + self.process_all()?)
            }
            None => Ok(0),
        }
    }
}
