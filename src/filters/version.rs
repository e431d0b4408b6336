//! `VersionFilter`: negotiates the protocol handshake. Must run first —
//! every other filter assumes `peer.state == Ready` before touching chain
//! state for that connection.

use super::Filter;
use crate::node::Node;
use crate::peer::{PeerId, PeerState, PeerVersion};
use crate::wire::Message;
use coin_core::{CoinError, CoinResult};
use tracing::{info, warn};

pub struct VersionFilter {
    own_nonce: u64,
}

impl VersionFilter {
    /// `own_nonce` must be the same nonce `Node` advertises in its own
    /// `version` messages, so a loopback connection recognises itself.
    #[must_use]
    pub fn new(own_nonce: u64) -> Self {
        Self { own_nonce }
    }
}

impl Filter for VersionFilter {
    fn name(&self) -> &'static str {
        "version"
    }

    fn handle(&mut self, node: &mut Node, peer_id: PeerId, message: &Message) -> CoinResult<bool> {
        let Some(peer) = node.peers.get_mut(&peer_id) else {
            return Ok(true);
        };

        match message {
            Message::Version {
                version,
                services,
                nonce,
                user_agent,
                start_height,
                ..
            } => {
                if peer.version.is_some() {
                    return Err(CoinError::ProtocolViolation(format!(
                        "peer {peer_id} sent a second version message"
                    )));
                }
                if *nonce == self.own_nonce {
                    return Err(CoinError::ProtocolViolation(format!(
                        "peer {peer_id} is a connection to ourselves"
                    )));
                }
                peer.version = Some(PeerVersion {
                    protocol_version: *version,
                    services: *services,
                    user_agent: user_agent.clone(),
                    start_height: *start_height,
                    nonce: *nonce,
                });
                peer.state = PeerState::Handshaking;
                peer.touch();
                info!(peer = peer_id, %user_agent, height = start_height, "received version");
                let verack = Message::VerAck;
                let frame = node.encode_for(&verack);
                peer.send_frame(frame);
                Ok(true)
            }
            Message::VerAck => {
                if peer.version.is_none() {
                    return Err(CoinError::ProtocolViolation(format!(
                        "peer {peer_id} sent verack before version"
                    )));
                }
                peer.state = PeerState::Ready;
                peer.touch();
                info!(peer = peer_id, "handshake complete");
                Ok(true)
            }
            _ if peer.state != PeerState::Ready => {
                warn!(peer = peer_id, command = message.command(), "traffic before handshake complete");
                Err(CoinError::ProtocolViolation(format!(
                    "peer {peer_id} sent {} before completing the handshake",
                    message.command()
                )))
            }
            _ => Ok(false),
        }
    }
}
