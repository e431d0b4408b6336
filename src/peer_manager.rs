//! Connection lifecycle: the inbound acceptor, the outbound connector, the
//! per-connection reader/writer tasks, and the "reply, trickle, broadcast"
//! send cadence that decides when queued messages actually go out on the
//! wire.

use crate::node::Node;
use crate::peer::{Peer, PeerId};
use crate::wire::{FrameHeader, Message, TimestampedAddr};
use rand::seq::SliceRandom;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A single connection handed back to the event loop, identified by the id
/// the acceptor or connector assigned it before the handshake even starts.
pub enum ConnectionEvent {
    Accepted { id: PeerId, addr: SocketAddr, outbound: bool, to_writer: mpsc::UnboundedSender<Vec<u8>> },
    Message { id: PeerId, message: Message },
    Closed { id: PeerId },
}

const MAX_INBOUND: usize = 125;
const MAX_OUTBOUND: usize = 8;

/// Accepts inbound connections on `listener`, capping concurrent inbound
/// peers at `MAX_INBOUND`; connections beyond the cap are dropped
/// immediately rather than queued, matching the original node's refusal to
/// let an inbound flood starve outbound slots.
pub async fn spawn_acceptor(
    listener: TcpListener,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    next_id: std::sync::Arc<std::sync::atomic::AtomicU64>,
    inbound_count: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    protocol_version: u32,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                if inbound_count.load(std::sync::atomic::Ordering::SeqCst) >= MAX_INBOUND {
                    debug!(%addr, "refusing inbound connection: at capacity");
                    continue;
                }
                inbound_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                let id = next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                spawn_connection(id, stream, addr, false, events.clone(), protocol_version, Some(inbound_count.clone()));
            }
            Err(err) => {
                warn!(%err, "accept failed");
            }
        }
    }
}

/// Dials every bootstrap address not already connected, up to `MAX_OUTBOUND`
/// total outbound peers, once at startup; `Node::run`'s periodic tick calls
/// back in to top the pool back up as outbound connections drop.
pub async fn dial_bootstrap_peers(
    addrs: &[SocketAddr],
    events: mpsc::UnboundedSender<ConnectionEvent>,
    next_id: std::sync::Arc<std::sync::atomic::AtomicU64>,
    protocol_version: u32,
) {
    for &addr in addrs.iter().take(MAX_OUTBOUND) {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                let id = next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                spawn_connection(id, stream, addr, true, events.clone(), protocol_version, None);
            }
            Err(err) => {
                warn!(%addr, %err, "failed to dial bootstrap peer");
            }
        }
    }
}

fn spawn_connection(
    id: PeerId,
    stream: TcpStream,
    addr: SocketAddr,
    outbound: bool,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    protocol_version: u32,
    inbound_count: Option<std::sync::Arc<std::sync::atomic::AtomicUsize>>,
) {
    let (to_writer, mut from_node) = mpsc::unbounded_channel::<Vec<u8>>();
    let _ = events.send(ConnectionEvent::Accepted { id, addr, outbound, to_writer });

    tokio::spawn(async move {
        let (mut read_half, mut write_half) = stream.into_split();

        let writer = tokio::spawn(async move {
            while let Some(frame) = from_node.recv().await {
                if write_half.write_all(&frame).await.is_err() {
                    break;
                }
            }
        });

        loop {
            let header_len = FrameHeader::wire_len(protocol_version);
            let mut header_buf = vec![0u8; header_len];
            if read_half.read_exact(&mut header_buf).await.is_err() {
                break;
            }
            let Some(header) = FrameHeader::parse(&header_buf, protocol_version) else {
                warn!(peer = id, "malformed frame header");
                break;
            };
            let mut payload = vec![0u8; header.length as usize];
            if !payload.is_empty() && read_half.read_exact(&mut payload).await.is_err() {
                break;
            }
            if !header.checksum_matches(&payload) {
                warn!(peer = id, "frame checksum mismatch");
                break;
            }
            match Message::decode_payload(&header.command, &payload, protocol_version) {
                Some(message) => {
                    if events.send(ConnectionEvent::Message { id, message }).is_err() {
                        break;
                    }
                }
                None => debug!(peer = id, command = %header.command, "unrecognised or malformed payload"),
            }
        }

        writer.abort();
        let _ = events.send(ConnectionEvent::Closed { id });
        if let Some(count) = inbound_count {
            count.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
        }
    });
}

/// Runs once per housekeeping tick: answers queued `getdata` replies,
/// trickles learned addresses to a single random peer, and broadcasts
/// queued inventory to everyone (delaying transaction announcements per
/// peer according to the deterministic `hash ^ salt` rule).
pub fn run_send_cadence(node: &mut Node) {
    reply_phase(node);
    trickle_phase(node);
    broadcast_phase(node);
}

fn reply_phase(node: &mut Node) {
    let protocol_version = node.protocol_version();
    let magic = node.magic();
    for peer in node.peers.values_mut() {
        while let Some(inv) = peer.getdata_queue.pop_front() {
            let frame = crate::wire::encode_frame(magic, &Message::GetData(vec![inv]), protocol_version);
            peer.send_frame(frame);
        }
    }
}

fn trickle_phase(node: &mut Node) {
    if node.relay_addr_pool.is_empty() {
        return;
    }
    let batch: Vec<TimestampedAddr> = node.relay_addr_pool.drain(..).collect();
    let Some(peer_id) = node
        .peers
        .iter()
        .filter(|(_, p)| p.state == crate::peer::PeerState::Ready)
        .collect::<Vec<_>>()
        .choose(&mut rand::thread_rng())
        .map(|(id, _)| **id)
    else {
        return;
    };
    if let Some(peer) = node.peers.get(&peer_id) {
        let frame = node.encode_for(&Message::Addr(batch));
        peer.send_frame(frame);
    }
}

fn broadcast_phase(node: &mut Node) {
    let protocol_version = node.protocol_version();
    let magic = node.magic();
    for peer in node.peers.values_mut() {
        if peer.state != crate::peer::PeerState::Ready {
            continue;
        }
        let mut keep_for_next_tick = std::collections::VecDeque::new();
        let mut ready_to_send = Vec::new();
        while let Some(inv) = peer.inv_queue.pop_front() {
            if inv.kind == crate::wire::InvType::Tx && peer.delays_tx_announcement(&inv) {
                keep_for_next_tick.push_back(inv);
            } else {
                ready_to_send.push(inv);
            }
        }
        peer.inv_queue = keep_for_next_tick;
        if !ready_to_send.is_empty() {
            let frame = crate::wire::encode_frame(magic, &Message::Inv(ready_to_send), protocol_version);
            peer.send_frame(frame);
        }
    }
}

/// Disconnects peers whose suicide timer fired and pings ones due for a
/// keep-alive, per the peer lifecycle timers in `peer.rs`.
pub fn run_lifecycle_tick(node: &mut Node) {
    let protocol_version = node.protocol_version();
    let magic = node.magic();
    let expired: Vec<PeerId> = node.peers.iter().filter(|(_, p)| p.is_expired()).map(|(id, _)| *id).collect();
    for id in expired {
        info!(peer = id, "suicide timer expired, disconnecting");
        node.peers.remove(&id);
    }
    for peer in node.peers.values_mut() {
        if peer.needs_keep_alive_ping() {
            let nonce = rand::random();
            let frame = crate::wire::encode_frame(magic, &Message::Ping(nonce), protocol_version);
            peer.send_frame(frame);
            peer.last_ping_sent = Some(std::time::Instant::now());
        }
    }
}

pub const TICK_INTERVAL: Duration = Duration::from_secs(1);
