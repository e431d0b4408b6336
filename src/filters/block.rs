//! `BlockFilter`: the main-chain counterpart of `ShareFilter` — accepts
//! `block`, answers `getblocks`/`getheaders`/`getdata`, and relays `inv`.
//! Holds blocks whose parent hasn't arrived yet in an orphan pool, indexed
//! by the missing parent, and replays them once that parent is accepted.

use super::Filter;
use crate::node::Node;
use crate::peer::PeerId;
use crate::wire::{Inventory, InvType, Message};
use coin_core::{Block, BlockLocator, CoinError, CoinResult};
use coin_primitives::hash::Hash256;
use std::collections::HashMap;
use tracing::{debug, warn};

/// `getheaders`/`getblocks` hand back at most this many hashes per reply.
const MAX_HEADERS_PER_MESSAGE: usize = 2000;
/// Orphans are dropped once the pool holds more than this many, oldest
/// missing-parent bucket first, to bound memory under a flood of junk.
const MAX_ORPHAN_BLOCKS: usize = 750;

#[derive(Default)]
pub struct BlockFilter {
    /// Orphan blocks keyed by their own hash.
    orphans: HashMap<Hash256, Block>,
    /// Index from an orphan's missing parent to the orphans waiting on it.
    orphans_by_prev: HashMap<Hash256, Vec<Hash256>>,
}

impl BlockFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn orphan_count(&self) -> usize {
        self.orphans.len()
    }

    fn add_orphan(&mut self, block: Block) {
        if self.orphan_count() >= MAX_ORPHAN_BLOCKS {
            return;
        }
        let hash = block.header.hash();
        self.orphans_by_prev.entry(block.header.previous_hash).or_default().push(hash);
        self.orphans.insert(hash, block);
    }

    /// Deepest orphan root still waiting on a parent, reachable from `hash`
    /// by walking the orphan chain backwards; used to ask a peer for the
    /// blocks between our best chain and this orphan.
    fn orphan_root(&self, mut hash: Hash256) -> Hash256 {
        while let Some(block) = self.orphans.get(&hash) {
            hash = block.header.previous_hash;
        }
        hash
    }

    /// Accepts every orphan that is now connectable now that `parent` just
    /// landed on the chain, recursively.
    fn reconsider_orphans(&mut self, node: &mut Node, parent: Hash256) {
        let mut queue = vec![parent];
        while let Some(hash) = queue.pop() {
            let Some(children) = self.orphans_by_prev.remove(&hash) else {
                continue;
            };
            for child_hash in children {
                let Some(block) = self.orphans.remove(&child_hash) else {
                    continue;
                };
                match node.chain.append(block) {
                    Ok(outcome) => {
                        debug!(hash = %outcome.hash, height = outcome.height, "orphan block connected");
                        node.announce_block(outcome.hash);
                        queue.push(child_hash);
                    }
                    Err(err) => {
                        warn!(%err, "previously orphaned block rejected on replay");
                    }
                }
            }
        }
    }
}

impl Filter for BlockFilter {
    fn name(&self) -> &'static str {
        "block"
    }

    fn handle(&mut self, node: &mut Node, peer_id: PeerId, message: &Message) -> CoinResult<bool> {
        match message {
            Message::Block(block) => {
                let hash = block.header.hash();
                if node.chain.have_block(&hash) {
                    return Ok(true);
                }
                match node.chain.append(block.clone()) {
                    Ok(outcome) => {
                        debug!(hash = %outcome.hash, height = outcome.height, reorganized = outcome.reorganized, "accepted block");
                        node.announce_block(outcome.hash);
                        self.reconsider_orphans(node, outcome.hash);
                    }
                    Err(CoinError::OrphanBlock(_)) => {
                        let root = self.orphan_root(block.header.previous_hash);
                        self.add_orphan(block.clone());
                        let locator = node.chain.get_best_locator().clone();
                        if let Some(peer) = node.peers.get(&peer_id) {
                            let frame = node.encode_for(&Message::GetBlocks { locator, hash_stop: root });
                            peer.send_frame(frame);
                        }
                    }
                    Err(CoinError::Reject(reason)) => {
                        debug!(%reason, "block rejected");
                    }
                    // Doesn't clear the main-chain target — it may still be a
                    // share; let `ShareFilter` have a look before giving up.
                    Err(CoinError::InvalidProofOfWork(_)) => return Ok(false),
                    Err(err) => return Err(err),
                }
                Ok(true)
            }
            Message::GetBlocks { locator, hash_stop } => {
                let fork = node.chain.locator_fork_point(locator);
                let mut height = fork.height + 1;
                let mut hashes = Vec::new();
                // Walk forward on the active chain until hash_stop or the cap.
                loop {
                    let Some(block_hash) = node.chain.hash_at_height(height) else {
                        break;
                    };
                    hashes.push(block_hash);
                    if block_hash == *hash_stop || hashes.len() >= MAX_HEADERS_PER_MESSAGE {
                        break;
                    }
                    height += 1;
                }
                let inv = hashes.into_iter().map(Inventory::block).collect::<Vec<_>>();
                if let Some(peer) = node.peers.get(&peer_id) {
                    let frame = node.encode_for(&Message::Inv(inv));
                    peer.send_frame(frame);
                }
                Ok(true)
            }
            Message::GetHeaders { locator, hash_stop } => {
                let fork = node.chain.locator_fork_point(locator);
                let mut height = fork.height + 1;
                let mut headers = Vec::new();
                loop {
                    let Some(hash) = node.chain.hash_at_height(height) else {
                        break;
                    };
                    let Ok(Some(header)) = node.chain.get_block_header(&hash) else {
                        break;
                    };
                    let stop = hash == *hash_stop;
                    headers.push(header);
                    if stop || headers.len() >= MAX_HEADERS_PER_MESSAGE {
                        break;
                    }
                    height += 1;
                }
                if let Some(peer) = node.peers.get(&peer_id) {
                    let frame = node.encode_for(&Message::Headers(headers));
                    peer.send_frame(frame);
                }
                Ok(true)
            }
            // `getdata`/`inv` can carry a mix of block and transaction
            // inventory; this filter only acts on the block-kind entries
            // and always falls through so `TransactionFilter` sees the rest.
            Message::GetData(items) => {
                for item in items.iter().filter(|i| i.kind == InvType::Block) {
                    if let Ok(Some(block)) = node.chain.get_block(&item.hash) {
                        if let Some(peer) = node.peers.get(&peer_id) {
                            let frame = node.encode_for(&Message::Block(block));
                            peer.send_frame(frame);
                        }
                    }
                }
                Ok(false)
            }
            Message::Inv(items) => {
                let wanted: Vec<Inventory> = items
                    .iter()
                    .filter(|i| i.kind == InvType::Block && !node.chain.have_block(&i.hash))
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
}
