//! The node itself: owns the chain, the live peer table, the ordered
//! filter pipeline, and the tokio event loop that drives all three from a
//! single task so no two filters ever observe inconsistent chain state.

use crate::filters::{self, Filter};
use crate::peer::{Peer, PeerId, PeerState};
use crate::peer_manager::{self, ConnectionEvent};
use crate::wire::{encode_frame, Inventory, Message, NetAddr, TimestampedAddr};
use coin_core::{BlockChain, ChainParams};
use coin_primitives::hash::Hash256;
use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, AtomicUsize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub struct NodeConfig {
    pub bind_addr: SocketAddr,
    pub bootstrap_peers: Vec<SocketAddr>,
    pub user_agent: String,
}

pub struct Node {
    pub chain: BlockChain,
    pub peers: HashMap<PeerId, Peer>,
    pub relay_addr_pool: VecDeque<TimestampedAddr>,
    filters: Vec<Box<dyn Filter>>,
    magic: [u8; 4],
    protocol_version: u32,
    own_nonce: u64,
    user_agent: String,
    bind_addr: SocketAddr,
    bootstrap_peers: Vec<SocketAddr>,
    next_peer_id: Arc<AtomicU64>,
    inbound_count: Arc<AtomicUsize>,
}

impl Node {
    #[must_use]
    pub fn new(chain: BlockChain, config: NodeConfig) -> Self {
        let magic = chain.chain().message_start();
        let protocol_version = chain.chain().protocol_version();
        let own_nonce: u64 = rand::random();
        Self {
            chain,
            peers: HashMap::new(),
            relay_addr_pool: VecDeque::new(),
            filters: filters::default_pipeline(own_nonce),
            magic,
            protocol_version,
            own_nonce,
            user_agent: config.user_agent,
            bind_addr: config.bind_addr,
            bootstrap_peers: config.bootstrap_peers,
            next_peer_id: Arc::new(AtomicU64::new(1)),
            inbound_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[must_use]
    pub fn protocol_version(&self) -> u32 {
        self.protocol_version
    }

    #[must_use]
    pub fn magic(&self) -> [u8; 4] {
        self.magic
    }

    #[must_use]
    pub fn encode_for(&self, message: &Message) -> Vec<u8> {
        encode_frame(self.magic, message, self.protocol_version)
    }

    fn version_message(&self, addr: SocketAddr) -> Message {
        Message::Version {
            version: self.protocol_version,
            services: 1,
            timestamp: current_unix_time(),
            addr_recv: to_net_addr(addr),
            addr_from: to_net_addr(self.bind_addr),
            nonce: self.own_nonce,
            user_agent: self.user_agent.clone(),
            start_height: self.chain.best_height() as i32,
        }
    }

    /// Queues inventory for broadcast to every ready peer on the next send
    /// cadence tick; the peer-manager's delay rule thins transaction
    /// announcements but never block or share ones.
    fn broadcast(&mut self, inv: Inventory) {
        for peer in self.peers.values_mut() {
            if peer.state == PeerState::Ready {
                peer.queue_inv(inv);
            }
        }
    }

    pub fn announce_block(&mut self, hash: Hash256) {
        self.broadcast(Inventory::block(hash));
    }

    pub fn announce_share(&mut self, hash: Hash256) {
        self.broadcast(Inventory {
            kind: crate::wire::InvType::Share,
            hash,
        });
    }

    pub fn announce_tx(&mut self, hash: Hash256) {
        self.broadcast(Inventory::tx(hash));
    }

    /// Runs every filter in order against one decoded message, stopping at
    /// the first that consumes it. A filter returning `Err` is logged and
    /// otherwise treated as having consumed the message: dispatch does not
    /// retry it against later filters, since a rejected message is not
    /// expected to be valid input for any of them.
    fn dispatch(&mut self, peer_id: PeerId, message: Message) {
        let mut filters = std::mem::take(&mut self.filters);
        for filter in filters.iter_mut() {
            match filter.handle(self, peer_id, &message) {
                Ok(true) => break,
                Ok(false) => continue,
                Err(coin_core::CoinError::Fatal(reason)) => {
                    // The invalid tree has outrun the active chain by more
                    // than the allowed margin: this node disagrees with the
                    // economic majority and has no safe way to keep
                    // participating. Notify the operator and exit rather
                    // than relay from a chain state nothing else agrees
                    // with.
                    tracing::error!(%reason, "fatal chain divergence detected, shutting down");
                    std::process::exit(1);
                }
                Err(err) => {
                    warn!(peer = peer_id, filter = filter.name(), %err, "rejected message");
                    break;
                }
            }
        }
        self.filters = filters;
    }

    fn tick_filters(&mut self) {
        let mut filters = std::mem::take(&mut self.filters);
        for filter in filters.iter_mut() {
            filter.tick(self);
        }
        self.filters = filters;
    }

    fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Accepted { id, addr, outbound, to_writer } => {
                let salt: u64 = rand::random();
                let peer = Peer::new(id, addr, outbound, to_writer, salt);
                info!(peer = id, %addr, outbound, "peer connected");
                let version = self.version_message(addr);
                let frame = self.encode_for(&version);
                peer.send_frame(frame);
                self.peers.insert(id, peer);
            }
            ConnectionEvent::Message { id, message } => {
                self.dispatch(id, message);
            }
            ConnectionEvent::Closed { id } => {
                info!(peer = id, "peer disconnected");
                self.peers.remove(&id);
            }
        }
    }

    /// Drives the node forever: accepts inbound connections, maintains the
    /// outbound pool, dispatches decoded messages through the filter
    /// pipeline, and runs the send-cadence and lifecycle ticks once a
    /// second, until `ctrl_c` or a fatal filter error.
    pub async fn run(mut self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, "listening for peers");

        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<ConnectionEvent>();

        tokio::spawn(peer_manager::spawn_acceptor(
            listener,
            events_tx.clone(),
            self.next_peer_id.clone(),
            self.inbound_count.clone(),
            self.protocol_version,
        ));

        if !self.bootstrap_peers.is_empty() {
            let bootstrap = self.bootstrap_peers.clone();
            let events_tx = events_tx.clone();
            let next_id = self.next_peer_id.clone();
            let protocol_version = self.protocol_version;
            tokio::spawn(async move {
                peer_manager::dial_bootstrap_peers(&bootstrap, events_tx, next_id, protocol_version).await;
            });
        }

        let mut ticker = tokio::time::interval(peer_manager::TICK_INTERVAL);

        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    match event {
                        Some(event) => self.handle_connection_event(event),
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    peer_manager::run_lifecycle_tick(&mut self);
                    peer_manager::run_send_cadence(&mut self);
                    self.tick_filters();
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown requested");
                    break;
                }
            }
        }
        Ok(())
    }
}

fn to_net_addr(addr: SocketAddr) -> NetAddr {
    match addr.ip() {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            NetAddr::new_v4(1, o[0], o[1], o[2], o[3], addr.port())
        }
        IpAddr::V6(v6) => NetAddr { services: 1, ip: v6.octets(), port: addr.port() },
    }
}

fn current_unix_time() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
