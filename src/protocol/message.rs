//! Protocol messages and the request-stamp ordering key.

use serde::{Deserialize, Serialize};

/// Peer identifier, uniquely assigned in `1..=N`.
pub type PeerId = u32;

/// Mutual-exclusion protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerMessage {
    /// Request for critical-section entry, broadcast to every other peer.
    Request {
        /// Originating peer.
        sender: PeerId,
        /// Sender's logical clock at creation time.
        timestamp: u64,
    },

    /// Acknowledgement of a Request, sent point-to-point to the requester.
    ///
    /// `timestamp` is the acknowledging peer's clock value after observing
    /// the request, not a fresh tick.
    Ack {
        /// Acknowledging peer.
        sender: PeerId,
        /// Sender's clock value at creation time.
        timestamp: u64,
        /// The peer whose Request this acknowledges.
        target: PeerId,
    },

    /// Announcement of critical-section exit, broadcast to every other peer.
    ///
    /// `timestamp` is the stamp of the *original* Request, so receivers can
    /// match and remove the corresponding queue entry.
    Release {
        /// Releasing peer.
        sender: PeerId,
        /// Stamp of the Request being released.
        timestamp: u64,
    },
}

impl PeerMessage {
    /// The originating peer of this message.
    pub fn sender(&self) -> PeerId {
        match self {
            PeerMessage::Request { sender, .. }
            | PeerMessage::Ack { sender, .. }
            | PeerMessage::Release { sender, .. } => *sender,
        }
    }

    /// The timestamp carried by this message.
    pub fn timestamp(&self) -> u64 {
        match self {
            PeerMessage::Request { timestamp, .. }
            | PeerMessage::Ack { timestamp, .. }
            | PeerMessage::Release { timestamp, .. } => *timestamp,
        }
    }

    /// Serialize to bytes using bincode.
    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).expect("PeerMessage serialization should not fail")
    }

    /// Deserialize from bytes. A failure here is the malformed-message
    /// condition and is fatal at the receiving peer.
    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

/// The global priority key of a pending request.
///
/// Requests are totally ordered by `(timestamp, sender)`: lower stamp first,
/// sender id breaking ties. Message kind plays no part in ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RequestStamp {
    /// Logical clock of the request at creation.
    pub timestamp: u64,
    /// Requesting peer.
    pub sender: PeerId,
}

impl RequestStamp {
    /// Build a stamp directly from its key.
    pub fn new(sender: PeerId, timestamp: u64) -> Self {
        RequestStamp { timestamp, sender }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stamp_orders_by_timestamp_then_sender() {
        let a = RequestStamp::new(2, 1);
        let b = RequestStamp::new(1, 1);
        let c = RequestStamp::new(3, 2);

        // Equal stamps tie-break on sender id.
        assert!(b < a);
        // Lower timestamp wins regardless of sender.
        assert!(a < c);
        assert!(b < c);
    }

    #[test]
    fn test_accessors_cover_all_kinds() {
        let req = PeerMessage::Request { sender: 1, timestamp: 4 };
        let ack = PeerMessage::Ack { sender: 2, timestamp: 5, target: 1 };
        let rel = PeerMessage::Release { sender: 3, timestamp: 4 };

        assert_eq!((req.sender(), req.timestamp()), (1, 4));
        assert_eq!((ack.sender(), ack.timestamp()), (2, 5));
        assert_eq!((rel.sender(), rel.timestamp()), (3, 4));
    }

    #[test]
    fn test_wire_roundtrip() {
        let msg = PeerMessage::Ack { sender: 3, timestamp: 17, target: 1 };
        let bytes = msg.encode();
        let back = PeerMessage::decode(&bytes).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        // Variant tags beyond the enum arity must not decode.
        let garbage = [0xffu8, 0xff, 0xff, 0xff, 0, 0, 0, 0];
        assert!(PeerMessage::decode(&garbage).is_err());
    }
}
