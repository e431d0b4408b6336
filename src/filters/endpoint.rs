//! `EndpointFilter`: maintains the pool of known peer addresses — ingests
//! `addr`, answers `getaddr`, and relays fresh addresses on the trickle
//! cadence.

use super::Filter;
use crate::node::Node;
use crate::peer::PeerId;
use crate::wire::{Message, NetAddr, TimestampedAddr};
use coin_core::CoinResult;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use tracing::debug;

/// Endpoints this node knows about but is not necessarily connected to,
/// keyed by socket address so a repeated announcement just refreshes the
/// timestamp rather than growing the pool.
#[derive(Default)]
pub struct EndpointFilter {
    known: HashMap<SocketAddr, TimestampedAddr>,
}

/// Per `getaddr` reply and per relay, the most addresses handed out at once.
const MAX_ADDR_PER_MESSAGE: usize = 1000;

impl EndpointFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn known_addrs(&self) -> Vec<TimestampedAddr> {
        self.known.values().copied().collect()
    }

    pub fn remember(&mut self, addr: SocketAddr, time: u32) {
        let net = to_net_addr(addr);
        self.known
            .entry(addr)
            .and_modify(|e| {
                if time > e.time {
                    e.time = time;
                }
            })
            .or_insert(TimestampedAddr { time, addr: net });
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

impl Filter for EndpointFilter {
    fn name(&self) -> &'static str {
        "endpoint"
    }

    fn handle(&mut self, node: &mut Node, peer_id: PeerId, message: &Message) -> CoinResult<bool> {
        match message {
            Message::Addr(addrs) => {
                for entry in addrs.iter().take(MAX_ADDR_PER_MESSAGE) {
                    let octets = &entry.addr.ip[12..16];
                    let ip = IpAddr::from([octets[0], octets[1], octets[2], octets[3]]);
                    let socket = SocketAddr::new(ip, entry.addr.port);
                    self.remember(socket, entry.time);
                }
                debug!(peer = peer_id, count = addrs.len(), "learned addresses");
                if let Some(peer) = node.peers.get_mut(&peer_id) {
                    for entry in addrs.iter().take(MAX_ADDR_PER_MESSAGE) {
                        node.relay_addr_pool.push_back(*entry);
                    }
                    let _ = peer;
                }
                Ok(true)
            }
            Message::GetAddr => {
                let addrs: Vec<TimestampedAddr> = self.known_addrs().into_iter().take(MAX_ADDR_PER_MESSAGE).collect();
                if let Some(peer) = node.peers.get(&peer_id) {
                    let frame = node.encode_for(&Message::Addr(addrs));
                    peer.send_frame(frame);
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
