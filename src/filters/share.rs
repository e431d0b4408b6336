//! `ShareFilter`: the merge-mining side chain's counterpart to
//! `BlockFilter`. Most shares are ordinary blocks that happen to also meet
//! the relaxed share target and so are recorded automatically inside
//! `BlockChain::append`; this filter only has work to do when a block
//! fails full main-chain acceptance (an unrelated policy check, not
//! proof-of-work) but still clears the share bar, or when a peer announces
//! a share we haven't seen the block for yet.

use super::Filter;
use crate::node::Node;
use crate::peer::PeerId;
use crate::wire::{Inventory, InvType, Message};
use coin_core::CoinResult;
use coin_primitives::hash::Hash256;
use tracing::debug;

#[derive(Default)]
pub struct ShareFilter;

impl ShareFilter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Filter for ShareFilter {
    fn name(&self) -> &'static str {
        "share"
    }

    fn handle(&mut self, node: &mut Node, peer_id: PeerId, message: &Message) -> CoinResult<bool> {
        match message {
            // Reached only once `BlockFilter` has given up on this block as
            // a main-chain candidate.
            Message::Block(block) => {
                if !node.chain.share_chain().qualifies(&block.header) {
                    return Ok(false);
                }
                let generator_script = block
                    .transactions
                    .first()
                    .and_then(|tx| tx.outputs.first())
                    .map(|o| o.script_pubkey.clone())
                    .unwrap_or_default();
                let previous_share = node.chain.share_chain().tip().unwrap_or_else(Hash256::zero);
                let dividend = node
                    .chain
                    .share_chain()
                    .expected_dividend(previous_share, generator_script.clone());
                match node.chain.submit_share(block, generator_script, previous_share, &dividend) {
                    Ok(true) => {
                        debug!(peer = peer_id, "accepted share");
                        node.announce_share(block.header.hash());
                    }
                    Ok(false) => debug!(peer = peer_id, "share already known"),
                    Err(err) => debug!(peer = peer_id, %err, "share rejected"),
                }
                Ok(true)
            }
            Message::Inv(items) => {
                let wanted: Vec<Inventory> = items
                    .iter()
                    .filter(|i| i.kind == InvType::Share && node.chain.share_chain().get(&i.hash).is_none())
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
            Message::GetData(items) => {
                // Only the header, generator and dividend table are kept for
                // a share, not its full transaction set, so there is
                // nothing to serve back for a `getdata(share)` today.
                let _ = items.iter().any(|i| i.kind == InvType::Share);
                Ok(false)
            }
            _ => Ok(false),
        }
    }
}
