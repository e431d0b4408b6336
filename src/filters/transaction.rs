//! `TransactionFilter`: accepts `tx` into the claims pool, answers
//! `mempool`, tracks the SPV bloom filters peers install via
//! `filterload`/`filteradd`/`filterclear`, and periodically rebroadcasts
//! our own unconfirmed transactions.

use super::Filter;
use crate::node::Node;
use crate::peer::PeerId;
use crate::wire::{Inventory, InvType, Message};
use coin_core::CoinResult;
use coin_primitives::hash::Hash256;
use std::collections::HashMap;
use tracing::debug;

/// A peer's installed bloom filter, kept only as raw bytes: this node does
/// not do the filtering itself (SPV clients decide what they want), it
/// just remembers which peers have one loaded so the send cadence knows
/// who gets every announcement versus who gets none.
#[derive(Default)]
pub struct TransactionFilter {
    bloom_filters: HashMap<PeerId, Vec<u8>>,
}

impl TransactionFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn has_filter(&self, peer: PeerId) -> bool {
        self.bloom_filters.contains_key(&peer)
    }
}

impl Filter for TransactionFilter {
    fn name(&self) -> &'static str {
        "transaction"
    }

    fn handle(&mut self, node: &mut Node, peer_id: PeerId, message: &Message) -> CoinResult<bool> {
        match message {
            Message::Tx(tx) => {
                let hash = tx.hash();
                if node.chain.have_tx(&hash) {
                    return Ok(true);
                }
                match node.chain.claim(tx.clone(), true) {
                    Ok(claimed_hash) => {
                        debug!(peer = peer_id, hash = %claimed_hash, "accepted transaction");
                        node.announce_tx(claimed_hash);
                    }
                    Err(err) => {
                        debug!(peer = peer_id, %err, "transaction rejected");
                    }
                }
                Ok(true)
            }
            Message::MemPool => {
                let inv: Vec<Inventory> = node.chain.claims().iter().map(|(hash, _)| Inventory::tx(*hash)).collect();
                if let Some(peer) = node.peers.get(&peer_id) {
                    let frame = node.encode_for(&Message::Inv(inv));
                    peer.send_frame(frame);
                }
                Ok(true)
            }
            Message::FilterLoad(bytes) => {
                self.bloom_filters.insert(peer_id, bytes.clone());
                Ok(true)
            }
            Message::FilterAdd(bytes) => {
                if let Some(existing) = self.bloom_filters.get_mut(&peer_id) {
                    existing.extend_from_slice(bytes);
                }
                Ok(true)
            }
            Message::FilterClear => {
                self.bloom_filters.remove(&peer_id);
                Ok(true)
            }
            Message::GetData(items) => {
                for item in items.iter().filter(|i| i.kind == InvType::Tx) {
                    if let Some(tx) = node.chain.get_transaction(&item.hash) {
                        if let Some(peer) = node.peers.get(&peer_id) {
                            let frame = node.encode_for(&Message::Tx(tx));
                            peer.send_frame(frame);
                        }
                    }
                }
                Ok(false)
            }
            Message::Inv(items) => {
                let wanted: Vec<Inventory> = items
                    .iter()
                    .filter(|i| i.kind == InvType::Tx && !node.chain.have_tx(&i.hash))
                    .copied()
                    .collect();
                if !wanted.is_empty() {
                    if let Some(peer) = node.peers.get(&peer_id) {
                        let frame = node.encode_for(&Message::GetData(wanted));
                        peer.send_frame(frame);
                    }
                }
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    /// Rebroadcasts transactions still in the claims pool at roughly the
    /// node's keep-alive cadence, so a transaction that a restart or a
    /// network partition dropped on the floor gets another chance to
    /// propagate.
    fn tick(&mut self, node: &mut Node) {
        let pending: Vec<Hash256> = node.chain.claims().iter().map(|(hash, _)| *hash).collect();
        for hash in pending {
            node.announce_tx(hash);
        }
    }
}
