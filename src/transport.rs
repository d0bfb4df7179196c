//! Full-mesh in-process transport.
//!
//! Every peer gets one inbox channel; every other peer holds a sender clone
//! to it. A single channel per inbox preserves per-sender FIFO order (what
//! the protocol needs) while interleaving different senders arbitrarily
//! (which is fine — priority comes from Lamport stamps, not arrival order).
//!
//! Messages travel as bincode frames tagged with the sending peer's id;
//! decoding is the receiver's job, so a malformed frame is fatal exactly at
//! the peer that received it. Delivery is reliable: a failed send means the
//! receiving side is gone, and that is surfaced as a fatal
//! [`TransportError`], never dropped.

use std::collections::HashMap;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::trace;

use crate::errors::TransportError;
use crate::protocol::message::{PeerId, PeerMessage};

/// One peer's view of the mesh: its inbox plus senders to every other peer.
pub struct PeerEndpoint {
    /// This peer's id.
    pub peer_id: PeerId,
    /// Inbox carrying `(from_peer, frame)` pairs.
    rx: Receiver<(PeerId, Vec<u8>)>,
    /// Senders to every other peer's inbox, keyed by peer id.
    tx_map: HashMap<PeerId, Sender<(PeerId, Vec<u8>)>>,
}

impl PeerEndpoint {
    /// Send a message to exactly one peer.
    pub fn send_to(&self, target: PeerId, msg: PeerMessage) -> Result<(), TransportError> {
        let tx = self
            .tx_map
            .get(&target)
            .ok_or(TransportError::ChannelClosed { peer: target })?;
        trace!("peer {} -> peer {}: {:?}", self.peer_id, target, msg);
        tx.send((self.peer_id, msg.encode()))
            .map_err(|_| TransportError::ChannelClosed { peer: target })
    }

    /// Deliver a message to every other peer, preserving per-sender order.
    pub fn broadcast(&self, msg: PeerMessage) -> Result<(), TransportError> {
        let frame = msg.encode();
        for (&target, tx) in &self.tx_map {
            trace!("peer {} -> peer {}: {:?}", self.peer_id, target, msg);
            tx.send((self.peer_id, frame.clone()))
                .map_err(|_| TransportError::ChannelClosed { peer: target })?;
        }
        Ok(())
    }

    /// Inject a raw frame, bypassing encoding. Test-only.
    #[cfg(test)]
    pub(crate) fn send_raw(&self, target: PeerId, frame: Vec<u8>) -> Result<(), TransportError> {
        let tx = self
            .tx_map
            .get(&target)
            .ok_or(TransportError::ChannelClosed { peer: target })?;
        tx.send((self.peer_id, frame))
            .map_err(|_| TransportError::ChannelClosed { peer: target })
    }

    /// Non-blocking pop of the next available inbound frame.
    pub fn try_recv(&self) -> Option<(PeerId, Vec<u8>)> {
        self.rx.try_recv().ok()
    }

    /// Blocking receive with a timeout, used as the engine's wait point.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<(PeerId, Vec<u8>)> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Number of peers reachable from this endpoint.
    pub fn fanout(&self) -> usize {
        self.tx_map.len()
    }
}

/// Builder for the full mesh over peers `1..=n`.
///
/// Constructed once from the peer count; each peer's endpoint is taken
/// exactly once and moved into that peer's thread.
pub struct MeshNetwork {
    senders: HashMap<PeerId, Sender<(PeerId, Vec<u8>)>>,
    receivers: HashMap<PeerId, Receiver<(PeerId, Vec<u8>)>>,
}

impl MeshNetwork {
    /// Create the mesh for `n` peers with ids `1..=n`.
    pub fn new(n: u32) -> Self {
        let mut senders = HashMap::new();
        let mut receivers = HashMap::new();

        for peer_id in 1..=n {
            let (tx, rx) = unbounded();
            senders.insert(peer_id, tx);
            receivers.insert(peer_id, rx);
        }

        MeshNetwork { senders, receivers }
    }

    /// Take the endpoint for `peer_id`.
    ///
    /// Consumes that peer's receiver, so it can be called once per peer.
    pub fn endpoint(&mut self, peer_id: PeerId) -> Option<PeerEndpoint> {
        let rx = self.receivers.remove(&peer_id)?;

        let tx_map = self
            .senders
            .iter()
            .filter(|(&id, _)| id != peer_id)
            .map(|(&id, tx)| (id, tx.clone()))
            .collect();

        Some(PeerEndpoint {
            peer_id,
            rx,
            tx_map,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recv_msg(ep: &PeerEndpoint) -> Option<(PeerId, PeerMessage)> {
        ep.try_recv()
            .map(|(from, frame)| (from, PeerMessage::decode(&frame).unwrap()))
    }

    #[test]
    fn test_broadcast_reaches_all_others() {
        let mut mesh = MeshNetwork::new(3);
        let ep1 = mesh.endpoint(1).unwrap();
        let ep2 = mesh.endpoint(2).unwrap();
        let ep3 = mesh.endpoint(3).unwrap();

        ep1.broadcast(PeerMessage::Request { sender: 1, timestamp: 1 })
            .unwrap();

        let (from, msg) = recv_msg(&ep2).unwrap();
        assert_eq!(from, 1);
        assert_eq!(msg, PeerMessage::Request { sender: 1, timestamp: 1 });

        let (from, _) = recv_msg(&ep3).unwrap();
        assert_eq!(from, 1);

        // Sender's own inbox stays empty.
        assert!(ep1.try_recv().is_none());
    }

    #[test]
    fn test_send_to_is_point_to_point() {
        let mut mesh = MeshNetwork::new(3);
        let ep1 = mesh.endpoint(1).unwrap();
        let ep2 = mesh.endpoint(2).unwrap();
        let ep3 = mesh.endpoint(3).unwrap();

        ep2.send_to(1, PeerMessage::Ack { sender: 2, timestamp: 4, target: 1 })
            .unwrap();

        assert!(ep3.try_recv().is_none());
        let (from, msg) = recv_msg(&ep1).unwrap();
        assert_eq!(from, 2);
        assert!(matches!(msg, PeerMessage::Ack { target: 1, .. }));
    }

    #[test]
    fn test_per_sender_fifo_order() {
        let mut mesh = MeshNetwork::new(2);
        let ep1 = mesh.endpoint(1).unwrap();
        let ep2 = mesh.endpoint(2).unwrap();

        for t in 1..=5u64 {
            ep1.send_to(2, PeerMessage::Request { sender: 1, timestamp: t })
                .unwrap();
        }

        for t in 1..=5u64 {
            let (_, msg) = recv_msg(&ep2).unwrap();
            assert_eq!(msg.timestamp(), t);
        }
    }

    #[test]
    fn test_endpoint_taken_once() {
        let mut mesh = MeshNetwork::new(2);
        assert!(mesh.endpoint(1).is_some());
        assert!(mesh.endpoint(1).is_none());
    }

    #[test]
    fn test_endpoint_fanout_excludes_self() {
        let mut mesh = MeshNetwork::new(4);
        let ep2 = mesh.endpoint(2).unwrap();
        assert_eq!(ep2.fanout(), 3);
    }

    #[test]
    fn test_send_to_dead_peer_errors() {
        let mut mesh = MeshNetwork::new(2);
        let ep1 = mesh.endpoint(1).unwrap();
        // Peer 2's receiver is taken and dropped: the channel is closed.
        drop(mesh.endpoint(2).unwrap());
        drop(mesh);

        let err = ep1
            .send_to(2, PeerMessage::Request { sender: 1, timestamp: 1 })
            .unwrap_err();
        assert!(matches!(err, TransportError::ChannelClosed { peer: 2 }));
    }
}
