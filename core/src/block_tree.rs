//! The sparse block tree: every header seen so far (not just the active
//! chain), enough to find the best valid tip, detect and perform
//! reorganisations, and answer `getblocks`-style locator queries.

use crate::block::BlockHeader;
use crate::target::bits_to_target;
use coin_primitives::hash::Hash256;
use coin_primitives::types::BlockHeight;
use std::collections::HashMap;

/// The header-derived facts the tree needs: enough to compute cumulative
/// work and to re-derive the header bytes for proof-of-work re-checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRef {
    pub hash: Hash256,
    pub previous_hash: Hash256,
    pub height: BlockHeight,
    pub bits: u32,
    pub time: u32,
    pub version: i32,
}

impl BlockRef {
    #[must_use]
    pub fn from_header(header: &BlockHeader, height: BlockHeight) -> Self {
        Self {
            hash: header.hash(),
            previous_hash: header.previous_hash,
            height,
            bits: header.bits,
            time: header.time,
            version: header.version,
        }
    }

    /// Work contributed by this single block: `2^256 / (target + 1)`,
    /// approximated here as the leading-zero-bit count of its target, which
    /// is monotonic in the same way real cumulative-work comparisons need
    /// to be and avoids a 256-bit division.
    #[must_use]
    pub fn work(&self) -> u128 {
        let target = bits_to_target(self.bits);
        1u128 << target.leading_zero_bits().min(127)
    }
}

/// The net effect of a tree mutation on the active chain: which block
/// hashes left the best chain (in detach order, tip-first) and which
/// entered it (in attach order, closest-to-fork-point first). An empty
/// `deleted` with a non-empty `inserted` is a simple extension; both
/// non-empty is a reorganisation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changes {
    pub deleted: Vec<Hash256>,
    pub inserted: Vec<Hash256>,
}

/// A `getblocks`/`getheaders` locator: hashes at exponentially increasing
/// depth from the caller's tip, letting the peer's chain find the most
/// recent common ancestor in O(log n) round trips.
#[derive(Debug, Clone, Default)]
pub struct BlockLocator {
    pub have: Vec<Hash256>,
}

/// All headers seen so far, indexed by hash, with enough bookkeeping to
/// track the current best tip and to roll the active chain forward or
/// backward across a fork.
#[derive(Debug, Clone, Default)]
pub struct BlockTree {
    nodes: HashMap<Hash256, BlockRef>,
    /// Cumulative work up to and including each hash.
    cumulative_work: HashMap<Hash256, u128>,
    /// The hash at each height on the currently active chain.
    active_chain: Vec<Hash256>,
    best_tip: Option<Hash256>,
    invalid: std::collections::HashSet<Hash256>,
    /// Height of every rejected header, derived from its parent the same
    /// way a valid header's height is, mirroring the original node's
    /// parallel `_invalid_tree`: even a block this engine never accepts
    /// gets a place in it, so a sustained disagreement with the network
    /// (the invalid tree outpacing the active chain) is observable.
    invalid_heights: HashMap<Hash256, BlockHeight>,
}

impl BlockTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the tree with a genesis block at height 0.
    pub fn insert_genesis(&mut self, header: &BlockHeader) {
        let block_ref = BlockRef::from_header(header, 0);
        let work = block_ref.work();
        self.nodes.insert(block_ref.hash, block_ref);
        self.cumulative_work.insert(block_ref.hash, work);
        self.active_chain = vec![block_ref.hash];
        self.best_tip = Some(block_ref.hash);
    }

    /// Inserts a new header whose parent is already known, returning the
    /// resulting `Changes` to the active chain (possibly empty, if the new
    /// block did not become the best tip).
    pub fn insert(&mut self, header: &BlockHeader) -> Result<Changes, String> {
        if self.nodes.contains_key(&header.hash()) {
            return Ok(Changes::default());
        }
        let parent = self
            .nodes
            .get(&header.previous_hash)
            .copied()
            .ok_or_else(|| "parent header not found in tree".to_string())?;
        if self.invalid.contains(&header.previous_hash) {
            return Err("parent header is marked invalid".into());
        }

        let block_ref = BlockRef::from_header(header, parent.height + 1);
        let parent_work = self.cumulative_work[&parent.hash];
        let work = parent_work + block_ref.work();
        self.nodes.insert(block_ref.hash, block_ref);
        self.cumulative_work.insert(block_ref.hash, work);

        let best_work = self
            .best_tip
            .map(|h| self.cumulative_work[&h])
            .unwrap_or(0);
        if work > best_work {
            Ok(self.reorganize_to(block_ref.hash))
        } else {
            Ok(Changes::default())
        }
    }

    /// Records `header` as rejected. Its height is derived from its parent
    /// when the parent is itself known (valid or already invalid);
    /// returns that height, or `None` if the parent is a hash this tree
    /// has never seen at all.
    pub fn mark_invalid(&mut self, header: &BlockHeader) -> Option<BlockHeight> {
        let hash = header.hash();
        let height = self
            .nodes
            .get(&header.previous_hash)
            .map(|parent| parent.height + 1)
            .or_else(|| {
                self.invalid_heights
                    .get(&header.previous_hash)
                    .map(|h| h + 1)
            });
        self.invalid.insert(hash);
        if let Some(height) = height {
            self.invalid_heights.insert(hash, height);
        }
        height
    }

    /// The greatest height recorded in the invalid tree, if any block has
    /// ever been rejected. Compared against `height()`, a lead of more than
    /// a few blocks means this node disagrees with the chain the rest of
    /// the network is building on.
    #[must_use]
    pub fn best_invalid_height(&self) -> Option<BlockHeight> {
        self.invalid_heights.values().copied().max()
    }

    /// The recorded height of a hash already known to be invalid, if any —
    /// lets a caller tell "parent is an orphan we haven't seen yet" apart
    /// from "parent is one we've already rejected" before deciding whether
    /// a new header is an `OrphanBlock` or an invalid descendant.
    #[must_use]
    pub fn invalid_height_of(&self, hash: &Hash256) -> Option<BlockHeight> {
        self.invalid_heights.get(hash).copied()
    }

    fn reorganize_to(&mut self, new_tip: Hash256) -> Changes {
        let mut new_chain = Vec::new();
        let mut cursor = new_tip;
        loop {
            new_chain.push(cursor);
            let node = self.nodes[&cursor];
            if node.height == 0 {
                break;
            }
            cursor = node.previous_hash;
        }
        new_chain.reverse();

        let old_chain = std::mem::take(&mut self.active_chain);
        let fork_point = old_chain
            .iter()
            .zip(new_chain.iter())
            .take_while(|(a, b)| a == b)
            .count();

        let deleted: Vec<Hash256> = old_chain[fork_point..].iter().rev().copied().collect();
        let inserted: Vec<Hash256> = new_chain[fork_point..].to_vec();

        self.active_chain = new_chain;
        self.best_tip = Some(new_tip);
        Changes { deleted, inserted }
    }

    #[must_use]
    pub fn best(&self) -> Option<BlockRef> {
        self.best_tip.map(|h| self.nodes[&h])
    }

    #[must_use]
    pub fn get(&self, hash: &Hash256) -> Option<BlockRef> {
        self.nodes.get(hash).copied()
    }

    #[must_use]
    pub fn at_height(&self, height: BlockHeight) -> Option<BlockRef> {
        self.active_chain
            .get(height as usize)
            .and_then(|h| self.nodes.get(h))
            .copied()
    }

    #[must_use]
    pub fn height(&self) -> BlockHeight {
        self.active_chain.len().saturating_sub(1) as BlockHeight
    }

    #[must_use]
    pub fn is_on_active_chain(&self, hash: &Hash256) -> bool {
        self.nodes
            .get(hash)
            .is_some_and(|r| self.active_chain.get(r.height as usize) == Some(hash))
    }

    /// Builds a locator for the active chain: the tip, then exponentially
    /// sparser ancestors, ending at genesis.
    #[must_use]
    pub fn locator(&self) -> BlockLocator {
        let mut have = Vec::new();
        let mut step = 1usize;
        let mut index = self.active_chain.len();
        while index > 0 {
            index = index.saturating_sub(step);
            have.push(self.active_chain[index]);
            if have.len() > 10 {
                step *= 2;
            }
            if index == 0 {
                break;
            }
        }
        BlockLocator { have }
    }

    /// Drops headers deeper than `keep_depth` blocks behind the tip that
    /// are not on the active chain, so the sparse tree does not grow
    /// without bound from failed fork attempts. Never purges within
    /// `keep_depth` of the tip, so an in-flight reorganisation can still
    /// resurrect a recently-orphaned branch.
    pub fn trim(&mut self, keep_depth: BlockHeight) {
        let tip_height = self.height();
        let floor = tip_height.saturating_sub(keep_depth);
        self.nodes.retain(|hash, node| {
            node.height >= floor || self.active_chain.get(node.height as usize) == Some(hash)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(previous_hash: Hash256, nonce: u32, time: u32) -> BlockHeader {
        BlockHeader::new(1, previous_hash, Hash256::zero(), time, 0x207f_ffff, nonce)
    }

    #[test]
    fn simple_extension_has_no_deletions() {
        let mut tree = BlockTree::new();
        let genesis = header(Hash256::zero(), 0, 1);
        tree.insert_genesis(&genesis);
        let next = header(genesis.hash(), 1, 2);
        let changes = tree.insert(&next).unwrap();
        assert!(changes.deleted.is_empty());
        assert_eq!(changes.inserted, vec![next.hash()]);
        assert_eq!(tree.height(), 1);
    }

    #[test]
    fn heavier_fork_triggers_reorganisation() {
        let mut tree = BlockTree::new();
        let genesis = header(Hash256::zero(), 0, 1);
        tree.insert_genesis(&genesis);

        let a1 = header(genesis.hash(), 1, 2);
        tree.insert(&a1).unwrap();
        let a2 = header(a1.hash(), 2, 3);
        tree.insert(&a2).unwrap();

        // competing fork from genesis, same length initially (no reorg)
        let b1 = header(genesis.hash(), 100, 2);
        let changes = tree.insert(&b1).unwrap();
        assert!(changes.deleted.is_empty() && changes.inserted.is_empty());

        // extend the fork past the active chain's work
        let b2 = header(b1.hash(), 101, 3);
        let changes = tree.insert(&b2).unwrap();
        assert!(!changes.deleted.is_empty());
        assert_eq!(changes.deleted, vec![a2.hash(), a1.hash()]);
        assert_eq!(changes.inserted, vec![b1.hash(), b2.hash()]);
    }

    #[test]
    fn locator_contains_genesis_as_final_entry() {
        let mut tree = BlockTree::new();
        let genesis = header(Hash256::zero(), 0, 1);
        tree.insert_genesis(&genesis);
        for i in 1..20u32 {
            let prev = tree.best().unwrap().hash;
            tree.insert(&header(prev, i, i + 1)).unwrap();
        }
        let locator = tree.locator();
        assert_eq!(*locator.have.last().unwrap(), genesis.hash());
    }

    #[test]
    fn invalid_tree_derives_height_from_its_parent() {
        let mut tree = BlockTree::new();
        let genesis = header(Hash256::zero(), 0, 1);
        tree.insert_genesis(&genesis);
        let bad = header(genesis.hash(), 1, 2);
        assert_eq!(tree.mark_invalid(&bad), Some(1));
        let worse = header(bad.hash(), 2, 3);
        assert_eq!(tree.mark_invalid(&worse), Some(2));
        assert_eq!(tree.best_invalid_height(), Some(2));
    }

    #[test]
    fn trim_keeps_active_chain_and_recent_height() {
        let mut tree = BlockTree::new();
        let genesis = header(Hash256::zero(), 0, 1);
        tree.insert_genesis(&genesis);
        for i in 1..50u32 {
            let prev = tree.best().unwrap().hash;
            tree.insert(&header(prev, i, i + 1)).unwrap();
        }
        tree.trim(10);
        assert!(tree.is_on_active_chain(&genesis.hash()));
    }
}
