//! Error taxonomy for the mutual-exclusion protocol.
//!
//! There are no recoverable conditions in the core: the algorithm assumes
//! reliable, per-sender FIFO delivery and an always-responsive peer set.
//! Every error below indicates a broken assumption, and the affected peer
//! must abort rather than retry.

use thiserror::Error;

use crate::protocol::message::PeerId;

/// Queue-level errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// No pending request with this `(sender, timestamp)` key exists.
    ///
    /// Every RELEASE and every local completion must match exactly one
    /// previously inserted REQUEST; a miss means a duplicate RELEASE or a
    /// transport bug.
    #[error("no pending request ({sender}, {timestamp}) in queue")]
    NotFound { sender: PeerId, timestamp: u64 },
}

/// Transport-level errors.
///
/// Delivery failures are never silently dropped: a closed channel is
/// surfaced to the engine as a fatal condition on that peer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The channel to or from `peer` has been torn down mid-run.
    #[error("channel to peer {peer} is closed")]
    ChannelClosed { peer: PeerId },
}

/// Fatal protocol errors. Any of these aborts the affected peer.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A protocol invariant no longer holds: a RELEASE or local completion
    /// failed to match a queue entry, or the queue head at entry time was
    /// not the local peer.
    #[error("protocol invariant violated at peer {peer}: {detail}")]
    InvariantViolation { peer: PeerId, detail: String },

    /// A message failed to decode from its wire form.
    #[error("malformed message at peer {peer}: {source}")]
    MalformedMessage {
        peer: PeerId,
        #[source]
        source: bincode::Error,
    },

    /// The transport lost a channel under the peer.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ProtocolError {
    /// Build an invariant-violation error for `peer`.
    pub fn invariant(peer: PeerId, detail: impl Into<String>) -> Self {
        ProtocolError::InvariantViolation {
            peer,
            detail: detail.into(),
        }
    }
}

impl From<(PeerId, QueueError)> for ProtocolError {
    fn from((peer, err): (PeerId, QueueError)) -> Self {
        ProtocolError::invariant(peer, err.to_string())
    }
}
