//! Per-connection state: the handshake state machine, the two deadline
//! timers, and the outbound queues the send-cadence logic in
//! `peer_manager` drains.

use crate::wire::{Inventory, Message, TimestampedAddr};
use coin_primitives::types::BlockHeight;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Opaque handle a filter or the peer manager uses to address one
/// connection; stable for the connection's lifetime.
pub type PeerId = u64;

const SUICIDE_BEFORE_HANDSHAKE: Duration = Duration::from_secs(60);
const SUICIDE_AFTER_HANDSHAKE: Duration = Duration::from_secs(90 * 60);
const KEEP_ALIVE: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Connecting,
    Handshaking,
    Ready,
    Disconnecting,
}

/// What the `version` handshake told us about the other side.
#[derive(Debug, Clone, Default)]
pub struct PeerVersion {
    pub protocol_version: u32,
    pub services: u64,
    pub user_agent: String,
    pub start_height: i32,
    pub nonce: u64,
}

/// One connected (or connecting) peer. Owned exclusively by the event-loop
/// task; the socket itself lives in a separate reader/writer task pair
/// that this handle's channels feed.
pub struct Peer {
    pub id: PeerId,
    pub addr: SocketAddr,
    pub outbound: bool,
    pub state: PeerState,
    pub version: Option<PeerVersion>,
    pub last_activity: Instant,
    pub last_ping_sent: Option<Instant>,
    /// Outbound frames queued for this peer's writer task.
    pub to_writer: mpsc::UnboundedSender<Vec<u8>>,
    /// Reply queue: `getdata` requests this peer asked of us, to be
    /// answered on the next "reply" phase of the send cadence.
    pub getdata_queue: VecDeque<Inventory>,
    /// Trickle queue: addresses to relay, flushed at most once per tick
    /// and only for a single randomly-chosen peer.
    pub addr_queue: VecDeque<TimestampedAddr>,
    /// Broadcast queue: inventory to announce, flushed to every peer each
    /// tick (transaction invs are delayed per the `hash ^ salt` rule).
    pub inv_queue: VecDeque<Inventory>,
    /// Per-peer salt for the broadcast-delay rule, fixed at connection time.
    pub broadcast_salt: u64,
}

impl Peer {
    #[must_use]
    pub fn new(id: PeerId, addr: SocketAddr, outbound: bool, to_writer: mpsc::UnboundedSender<Vec<u8>>, salt: u64) -> Self {
        Self {
            id,
            addr,
            outbound,
            state: PeerState::Connecting,
            version: None,
            last_activity: Instant::now(),
            last_ping_sent: None,
            to_writer,
            getdata_queue: VecDeque::new(),
            addr_queue: VecDeque::new(),
            inv_queue: VecDeque::new(),
            broadcast_salt: salt,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    #[must_use]
    pub fn remote_height(&self) -> BlockHeight {
        self.version.as_ref().map(|v| v.start_height.max(0) as BlockHeight).unwrap_or(0)
    }

    /// Deadline before this peer's suicide timer fires, shorter until the
    /// handshake completes.
    #[must_use]
    fn suicide_timeout(&self) -> Duration {
        if self.state == PeerState::Ready {
            SUICIDE_AFTER_HANDSHAKE
        } else {
            SUICIDE_BEFORE_HANDSHAKE
        }
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.last_activity.elapsed() > self.suicide_timeout()
    }

    #[must_use]
    pub fn needs_keep_alive_ping(&self) -> bool {
        self.state == PeerState::Ready
            && self.last_activity.elapsed() > KEEP_ALIVE
            && self.last_ping_sent.map_or(true, |t| t.elapsed() > KEEP_ALIVE)
    }

    /// Whether a transaction inv queued this tick should be delayed to the
    /// next tick: roughly three quarters of the time, deterministically by
    /// `hash ^ salt` rather than a fresh coin flip, so a given peer always
    /// delays the same transaction the same way.
    #[must_use]
    pub fn delays_tx_announcement(&self, inv: &Inventory) -> bool {
        let mixed = u64::from_le_bytes(inv.hash.as_bytes()[..8].try_into().unwrap()) ^ self.broadcast_salt;
        mixed % 4 != 0
    }

    pub fn queue_inv(&mut self, inv: Inventory) {
        if !self.inv_queue.contains(&inv) {
            self.inv_queue.push_back(inv);
        }
    }

    pub fn send_frame(&self, frame: Vec<u8>) {
        let _ = self.to_writer.send(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coin_primitives::hash::Hash256;

    fn test_peer() -> Peer {
        let (tx, _rx) = mpsc::unbounded_channel();
        Peer::new(1, "127.0.0.1:8333".parse().unwrap(), true, tx, 7)
    }

    #[test]
    fn fresh_peer_uses_the_short_handshake_timeout() {
        let peer = test_peer();
        assert_eq!(peer.suicide_timeout(), SUICIDE_BEFORE_HANDSHAKE);
    }

    #[test]
    fn ready_peer_uses_the_long_timeout() {
        let mut peer = test_peer();
        peer.state = PeerState::Ready;
        assert_eq!(peer.suicide_timeout(), SUICIDE_AFTER_HANDSHAKE);
    }

    #[test]
    fn inv_queue_does_not_duplicate_entries() {
        let mut peer = test_peer();
        let inv = Inventory::block(Hash256::double_sha256(b"x"));
        peer.queue_inv(inv);
        peer.queue_inv(inv);
        assert_eq!(peer.inv_queue.len(), 1);
    }

    #[test]
    fn broadcast_delay_is_deterministic_for_a_given_peer_and_hash() {
        let peer = test_peer();
        let inv = Inventory::tx(Hash256::double_sha256(b"a transaction"));
        assert_eq!(peer.delays_tx_announcement(&inv), peer.delays_tx_announcement(&inv));
    }
}
