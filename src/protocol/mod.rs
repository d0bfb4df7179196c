//! Lamport mutual-exclusion protocol core.
//!
//! This module implements the per-peer protocol engine:
//! - A peer broadcasts a stamped REQUEST and collects one ACK from every
//!   other peer
//! - Every peer keeps a local queue of all outstanding requests, totally
//!   ordered by `(timestamp, sender)`
//! - A peer enters the critical section only when it holds all N−1 acks AND
//!   its own request is the queue head
//! - On exit it broadcasts a RELEASE carrying the original request stamp
//!
//! # Invariants
//!
//! 1. **Mutual exclusion**: no two peers are ever inside the critical
//!    section simultaneously.
//! 2. **Total order**: admissions follow the global `(timestamp, sender)`
//!    order of their requests.
//! 3. **Clock monotonicity**: each peer's Lamport clock never decreases.
//! 4. **Matched releases**: every RELEASE removes exactly the queue entry
//!    its REQUEST inserted; a miss is fatal.

pub mod clock;
pub mod message;
pub mod peer;
pub mod queue;


pub use clock::LamportClock;
pub use message::{PeerId, PeerMessage, RequestStamp};
pub use peer::{AckSet, CriticalSection, PeerEngine, PeerPhase, MAX_PEERS, POLL_INTERVAL};
pub use queue::RequestQueue;
