//! The block-chain engine: the component that actually decides what the
//! active chain is. Wires together the sparse block tree (fork tracking),
//! the authenticated Merkle trie and flat UTXO set (coin lifecycle), the
//! claims pool (unconfirmed transactions) and the SQL store (durability)
//! behind the single `append`/`claim` entry points the filter pipeline
//! drives. Named `BlockChain` after the original node's class of the same
//! name; everything else in this module follows its `append` control flow.

use crate::block::{Block, BlockHeader};
use crate::block_tree::{BlockLocator, BlockRef, BlockTree, Changes};
use crate::chain::ChainParams;
use crate::claims::ClaimsPool;
use crate::confirmation::Spending;
use crate::error::{CoinError, CoinResult};
use crate::merkle_trie::{key_for_outpoint, MerkleTrie};
use crate::mining::{build_template, BlockTemplate, PayeeShare};
use crate::script::{verify_script, ScriptContext};
use crate::share::ShareChain;
use crate::storage::Storage;
use crate::target::retarget;
use crate::transaction::Transaction;
use crate::utxo::{Unspent, UtxoSet};
use coin_primitives::hash::Hash256;
use coin_primitives::types::{Amount, BlockHeight, OutPoint};
use std::collections::{BTreeMap, HashMap};

/// Matters a caller may want to know about a finished `append`: whether it
/// extended the tip plainly or triggered a reorganisation.
#[derive(Debug, Clone, Default)]
pub struct AppendOutcome {
    pub hash: Hash256,
    pub height: BlockHeight,
    pub reorganized: bool,
}

/// A running count of how many active-chain blocks (scanning back from the
/// tip, up to `quorum` of them) carry each header version, the input to the
/// version-gating check.
fn version_counts(tree: &BlockTree, quorum: usize) -> BTreeMap<i32, usize> {
    let mut counts = BTreeMap::new();
    let mut height = tree.height();
    let mut seen = 0usize;
    loop {
        let Some(block_ref) = tree.at_height(height) else {
            break;
        };
        *counts.entry(block_ref.version).or_insert(0) += 1;
        seen += 1;
        if seen >= quorum || height == 0 {
            break;
        }
        height -= 1;
    }
    counts
}

/// The smallest version that a supermajority (`majority` out of the last
/// `quorum` blocks) has already adopted, cumulatively from the highest
/// version down, or `1` (don't enforce) if `quorum < majority` or no
/// version yet clears the bar.
fn min_version_from_majority(tree: &BlockTree, quorum: usize, majority: usize) -> i32 {
    if quorum < majority {
        return 1;
    }
    let counts = version_counts(tree, quorum);
    let mut cumulative = 0usize;
    for (version, count) in counts.iter().rev() {
        cumulative += count;
        if cumulative > majority {
            return *version;
        }
    }
    1
}

/// Inserts `unspent` into both the authenticated trie and the durable
/// store, keyed on its outpoint's literal 36-byte encoding.
fn commit_unspent(trie: &mut MerkleTrie, storage: &Storage, unspent: &Unspent) -> CoinResult<()> {
    trie.insert(
        key_for_outpoint(&unspent.outpoint),
        unspent.output.value,
        unspent.output.script_pubkey.clone(),
    );
    storage.put_unspent(unspent)
}

/// `LOCKTIME_THRESHOLD`: below this a transaction's `lock_time` is a block
/// height, at or above it it's a Unix timestamp.
const LOCKTIME_THRESHOLD: u32 = 500_000_000;

fn is_final(tx: &Transaction, block_height: BlockHeight, block_time: i64) -> bool {
    if tx.lock_time == 0 {
        return true;
    }
    let threshold = if tx.lock_time < LOCKTIME_THRESHOLD {
        block_height as i64
    } else {
        block_time
    };
    if (tx.lock_time as i64) < threshold {
        return true;
    }
    tx.inputs.iter().all(|input| input.sequence == 0xFFFF_FFFF)
}

/// The block-chain engine: durable storage plus the in-memory structures
/// that make it fast to answer "what is the active chain" and "is this
/// coin spendable" without a database round trip per query.
pub struct BlockChain {
    chain: Box<dyn ChainParams>,
    tree: BlockTree,
    storage: Storage,
    utxo: UtxoSet,
    trie: MerkleTrie,
    claims: ClaimsPool,
    /// Blocks not yet (or no longer) part of the active chain: reorg
    /// candidates and just-detached blocks. Mirrors the original node's
    /// `_branches`.
    branches: HashMap<Hash256, Block>,
    best_locator: BlockLocator,
    /// Deepest active-chain height below which spent-output history is
    /// dropped. `None` means never purge, the conservative default for a
    /// full archival node.
    purge_depth: Option<BlockHeight>,
    validation_depth: BlockHeight,
    /// Live name→value registry, maintained only for chains where
    /// `ChainParams::adhere_names()` is set; empty and unused otherwise.
    names: crate::names::NameState,
    /// Merge-mining-style share bookkeeping, tracked alongside but
    /// independent of the main chain's block tree.
    share_chain: ShareChain,
}

impl BlockChain {
    /// Opens (or creates) the chain backed by `storage`, replaying whatever
    /// blocks and unspents the store already holds. Inserts the chain's own
    /// genesis block on a freshly created store.
    pub fn open(chain: Box<dyn ChainParams>, storage: Storage) -> CoinResult<Self> {
        let mut tree = BlockTree::new();
        let stored = storage.list_blocks()?;
        let mut branches = HashMap::new();

        if stored.is_empty() {
            let genesis = chain.genesis_block();
            storage.put_block(&genesis, 0, true)?;
            storage.set_tip(&genesis.header.hash())?;
            tree.insert_genesis(&genesis.header);
        } else {
            for (hash, height, _on_active) in &stored {
                let Some(block) = storage.get_block(hash)? else {
                    continue;
                };
                if *height == 0 {
                    tree.insert_genesis(&block.header);
                } else if tree.insert(&block.header).is_err() {
                    branches.insert(*hash, block);
                    continue;
                }
                branches.insert(*hash, block);
            }
        }

        let mut utxo = UtxoSet::new();
        let mut trie = MerkleTrie::new();
        for unspent in storage.load_unspents()? {
            trie.insert(
                key_for_outpoint(&unspent.outpoint),
                unspent.output.value,
                unspent.output.script_pubkey.clone(),
            );
            utxo.insert(unspent);
        }

        // `branches` only needs to carry blocks that are not (or not yet) on
        // the active chain; everything else is already durable in storage
        // and reachable through `tree`.
        branches.retain(|hash, _| !tree.is_on_active_chain(hash));

        let share_target_bits = chain.share_target_bits();
        let mut engine = Self {
            chain,
            tree,
            storage,
            utxo,
            trie,
            claims: ClaimsPool::new(),
            branches,
            best_locator: BlockLocator::default(),
            purge_depth: None,
            validation_depth: 0,
            names: crate::names::NameState::new(),
            share_chain: ShareChain::new(share_target_bits),
        };
        engine.update_best_locator();
        Ok(engine)
    }

    #[must_use]
    pub fn chain(&self) -> &dyn ChainParams {
        self.chain.as_ref()
    }

    pub fn set_purge_depth(&mut self, depth: Option<BlockHeight>) {
        self.purge_depth = depth;
    }

    pub fn set_validation_depth(&mut self, depth: BlockHeight) {
        self.validation_depth = depth;
    }

    #[must_use]
    pub fn best_height(&self) -> BlockHeight {
        self.tree.height()
    }

    #[must_use]
    pub fn best_hash(&self) -> Hash256 {
        self.tree.best().map(|r| r.hash).unwrap_or_else(Hash256::zero)
    }

    #[must_use]
    pub fn have_block(&self, hash: &Hash256) -> bool {
        self.tree.get(hash).is_some() || self.branches.contains_key(hash)
    }

    #[must_use]
    pub fn have_tx(&self, hash: &Hash256) -> bool {
        self.claims.contains(hash) || self.utxo.iter().any(|(outpoint, _)| outpoint.txid == *hash)
    }

    #[must_use]
    pub fn get_height(&self, hash: &Hash256) -> Option<BlockHeight> {
        self.tree.get(hash).map(|r| r.height)
    }

    #[must_use]
    pub fn is_on_active_chain(&self, hash: &Hash256) -> bool {
        self.tree.is_on_active_chain(hash)
    }

    /// The active chain's block hash at `height`, if the chain is that tall.
    #[must_use]
    pub fn hash_at_height(&self, height: BlockHeight) -> Option<Hash256> {
        self.tree.at_height(height).map(|r| r.hash)
    }

    /// Returns the stored block by hash, searching both in-flight branches
    /// (blocks on a losing fork, or just-detached ones) and durable storage.
    pub fn get_block(&self, hash: &Hash256) -> CoinResult<Option<Block>> {
        if let Some(block) = self.branches.get(hash) {
            return Ok(Some(block.clone()));
        }
        self.storage.get_block(hash)
    }

    pub fn get_block_header(&self, hash: &Hash256) -> CoinResult<Option<BlockHeader>> {
        Ok(self.get_block(hash)?.map(|b| b.header))
    }

    /// Looks a transaction up by hash: the claims pool first, then a
    /// backward scan of confirmed blocks.
    pub fn get_transaction(&self, hash: &Hash256) -> Option<Transaction> {
        if let Some(claimed) = self.claims.get(hash) {
            return Some(claimed.tx.clone());
        }
        for height in (0..=self.tree.height()).rev() {
            let block_ref = self.tree.at_height(height)?;
            if let Ok(Some(block)) = self.get_block(&block_ref.hash) {
                if let Some(tx) = block.transactions.iter().find(|tx| tx.hash() == *hash) {
                    return Some(tx.clone());
                }
            }
        }
        None
    }

    #[must_use]
    pub fn get_unspents(&self, script_pubkey: &[u8]) -> Vec<Unspent> {
        self.utxo
            .iter()
            .filter(|(_, u)| u.output.script_pubkey == script_pubkey)
            .map(|(_, u)| u.clone())
            .collect()
    }

    #[must_use]
    pub fn balance(&self, script_pubkey: &[u8]) -> Amount {
        self.utxo.balance_for_script(script_pubkey)
    }

    #[must_use]
    pub fn is_spent(&self, outpoint: &OutPoint) -> bool {
        !self.utxo.contains(outpoint)
    }

    #[must_use]
    pub fn is_final(&self, tx: &Transaction, block_height: BlockHeight, block_time: i64) -> bool {
        let height = if block_height == 0 {
            self.tree.height()
        } else {
            block_height
        };
        is_final(tx, height, block_time)
    }

    #[must_use]
    pub fn get_best_locator(&self) -> &BlockLocator {
        &self.best_locator
    }

    fn update_best_locator(&mut self) {
        self.best_locator = self.tree.locator();
    }

    /// How many blocks back from the active tip `locator`'s most recent
    /// known hash sits, used to size a `getblocks`/`getheaders` reply.
    #[must_use]
    pub fn get_distance_back(&self, locator: &BlockLocator) -> BlockHeight {
        for hash in &locator.have {
            if let Some(block_ref) = self.tree.get(hash) {
                if self.tree.is_on_active_chain(hash) {
                    return self.tree.height().saturating_sub(block_ref.height);
                }
            }
        }
        self.tree.height()
    }

    /// Finds the most recent hash in `locator` that is on the active chain,
    /// or the genesis block if none match (an unknown peer starting fresh).
    #[must_use]
    pub fn locator_fork_point(&self, locator: &BlockLocator) -> BlockRef {
        for hash in &locator.have {
            if self.tree.is_on_active_chain(hash) {
                if let Some(block_ref) = self.tree.get(hash) {
                    return block_ref;
                }
            }
        }
        self.tree
            .at_height(0)
            .expect("genesis always present once opened")
    }

    fn min_accepted_block_version(&self) -> i32 {
        min_version_from_majority(&self.tree, self.chain.accept_quorum(), self.chain.accept_majority())
    }

    fn min_enforced_block_version(&self) -> i32 {
        min_version_from_majority(&self.tree, self.chain.enforce_quorum(), self.chain.enforce_majority())
    }

    fn next_work_required(&self, prev: &BlockRef) -> u32 {
        let interval = self.chain.retarget_interval();
        if prev.height + 1 < interval {
            return self.chain.proof_of_work_limit_bits();
        }
        if (prev.height + 1) % interval != 0 {
            return prev.bits;
        }
        let first_height = prev.height + 1 - interval;
        let Some(first) = self.tree.at_height(first_height) else {
            return prev.bits;
        };
        retarget(
            first.time,
            prev.time,
            prev.bits,
            self.chain.target_timespan(),
            self.chain.proof_of_work_limit_bits(),
        )
    }

    /// Median time of the (up to) eleven blocks ending at `prev`, the floor
    /// a new block's own timestamp must clear.
    fn median_time_past(&self, prev: &BlockRef) -> u32 {
        let mut times = Vec::with_capacity(11);
        let mut height = prev.height;
        for _ in 0..11 {
            let Some(r) = self.tree.at_height(height) else {
                break;
            };
            times.push(r.time);
            if height == 0 {
                break;
            }
            height -= 1;
        }
        times.sort_unstable();
        times[times.len() / 2]
    }

    /// Accepts a new block into the chain. Validates its shape and
    /// proof-of-work, inserts it into the sparse tree, and if that insert
    /// changes the active chain, attaches (and, for a reorganisation, first
    /// detaches) the affected blocks against the UTXO set and Merkle trie
    /// inside a single storage transaction: any failure rolls back both the
    /// SQL rows and the in-memory trie to their pre-append state.
    pub fn append(&mut self, block: Block) -> CoinResult<AppendOutcome> {
        let hash = block.hash();

        if self.have_block(&hash) {
            return Err(CoinError::Reject(format!("block {hash} already accepted")));
        }

        block
            .validate_shape(self.chain.max_block_size())
            .map_err(CoinError::InvalidBlock)?;

        if !block.header.meets_target() {
            return Err(self.record_invalid(&block.header, CoinError::InvalidProofOfWork(format!(
                "block {hash} hash does not meet its own target"
            ))));
        }

        if block.header.version < self.min_accepted_block_version() {
            return Err(self.record_invalid(&block.header, CoinError::VersionPolicyViolation(format!(
                "version {} block rejected: too old",
                block.header.version
            ))));
        }

        let Some(prev) = self.tree.get(&block.header.previous_hash) else {
            if self.tree.invalid_height_of(&block.header.previous_hash).is_some() {
                return Err(self.record_invalid(&block.header, CoinError::InvalidBlock(format!(
                    "block {hash} descends from a block already rejected as invalid"
                ))));
            }
            return Err(CoinError::OrphanBlock(format!(
                "cannot accept orphan block {hash}: parent unknown"
            )));
        };

        let required_bits = self.next_work_required(&prev);
        if block.header.bits != required_bits {
            let slipped_by_time =
                (block.header.time as i64 - prev.time as i64) < self.chain.max_inter_block_time();
            let at_pow_limit = block.header.bits == self.chain.proof_of_work_limit_bits();
            if !(slipped_by_time || at_pow_limit) {
                return Err(self.record_invalid(&block.header, CoinError::InvalidProofOfWork(format!(
                    "incorrect proof of work: {} versus required {required_bits}",
                    block.header.bits
                ))));
            }
        }

        if block.header.time <= self.median_time_past(&prev) {
            return Err(self.record_invalid(&block.header, CoinError::InvalidBlock(
                "block timestamp is not later than the median of its ancestors".into(),
            )));
        }

        let min_enforced = self.min_enforced_block_version();
        if block.header.version >= 2 && min_enforced >= 2 {
            let committed_height = prev.height + 1;
            if let Some(coinbase_height) = coinbase_height_push(&block) {
                if coinbase_height != committed_height {
                    return Err(self.record_invalid(&block.header, CoinError::VersionPolicyViolation(
                        "version 2+ block with wrong height commitment in coinbase".into(),
                    )));
                }
            } else {
                return Err(self.record_invalid(&block.header, CoinError::VersionPolicyViolation(
                    "version 2+ block missing height commitment in coinbase".into(),
                )));
            }
        }

        let changes = self
            .tree
            .insert(&block.header)
            .map_err(CoinError::InvalidBlock)?;

        let prev_height = prev.height;
        self.branches.insert(hash, block.clone());
        self.storage.put_block(&block, prev_height + 1, false)?;

        if changes.inserted.is_empty() {
            // accepted onto a losing branch; not (yet) part of the active chain.
            return Ok(AppendOutcome {
                hash,
                height: prev_height + 1,
                reorganized: false,
            });
        }

        let trie_snapshot = self.trie.snapshot();
        let utxo_snapshot = self.utxo.clone();

        match self.commit_changes(&changes) {
            Ok((unconfirmed, confirmed)) => {
                self.storage.commit()?;
                for h in &changes.inserted {
                    self.branches.remove(h);
                }
                self.update_best_locator();

                for h in &confirmed {
                    self.claims.erase(h);
                }
                self.claims.purge(block.header.time as i64 - 24 * 60 * 60);

                for (_, tx) in unconfirmed {
                    // best effort: a detached transaction that now double-spends
                    // against the new chain simply fails to re-enter the pool.
                    let _ = self.claims.try_claim(
                        tx,
                        &self.utxo,
                        self.chain.as_ref(),
                        self.tree.height(),
                        block.header.time as i64,
                        false,
                    );
                }

                if let Some(purge_depth) = self.purge_depth {
                    self.tree.trim(purge_depth);
                }

                // A main-chain block that also meets the relaxed share
                // target snapshots the live trie as the share-spendables
                // root; best-effort since a share whose
                // previous-share link has since been trimmed simply isn't
                // recorded, it never affects main-chain acceptance.
                if self.share_chain.qualifies(&block.header) {
                    let generator_script = block.transactions[0]
                        .outputs
                        .first()
                        .map(|o| o.script_pubkey.clone())
                        .unwrap_or_default();
                    let previous_share = self.share_chain.tip().unwrap_or_else(Hash256::zero);
                    let dividend = self
                        .share_chain
                        .expected_dividend(previous_share, generator_script.clone());
                    let _ = self.share_chain.insert(
                        &block.header,
                        previous_share,
                        generator_script,
                        &dividend,
                    );
                }

                Ok(AppendOutcome {
                    hash,
                    height: self.tree.height(),
                    reorganized: !changes.deleted.is_empty(),
                })
            }
            Err(e) => {
                self.storage.rollback()?;
                self.trie.restore(&trie_snapshot);
                self.utxo = utxo_snapshot;
                for h in &changes.deleted {
                    self.storage.mark_active(h, true)?;
                }
                for h in &changes.inserted {
                    self.storage.mark_active(h, false)?;
                }
                Err(self.record_invalid(&block.header, e))
            }
        }
    }

    /// Marks `header` invalid in the parallel invalid tree and escalates to
    /// `CoinError::Fatal` in place of `err` if the invalid tree now leads
    /// the active chain by more than three blocks — the threshold past
    /// which this node's view of consensus has diverged from whatever the
    /// rest of the network is building on, per spec: a node that far
    /// behind the economic majority should stop rather than keep relaying.
    fn record_invalid(&mut self, header: &BlockHeader, err: CoinError) -> CoinError {
        self.tree.mark_invalid(header);
        if let Some(invalid_height) = self.tree.best_invalid_height() {
            if invalid_height > self.tree.height() + 3 {
                return CoinError::Fatal(format!(
                    "invalid chain at height {invalid_height} leads the active chain (height {}) \
                     by more than 3 blocks: {err}",
                    self.tree.height()
                ));
            }
        }
        err
    }

    /// Runs the detach/attach sequence for one `Changes` patch inside a
    /// storage transaction, returning the unconfirmed transactions kicked
    /// back out of detached blocks and the hashes newly confirmed by
    /// attached ones. The transaction is left open; the caller commits.
    fn commit_changes(
        &mut self,
        changes: &Changes,
    ) -> CoinResult<(HashMap<Hash256, Transaction>, Vec<Hash256>)> {
        self.storage.begin()?;

        let mut unconfirmed: HashMap<Hash256, Transaction> = HashMap::new();
        let mut confirmed: Vec<Hash256> = Vec::new();

        for detach_hash in &changes.deleted {
            self.detach(detach_hash, &mut unconfirmed)?;
        }
        for attach_hash in &changes.inserted {
            self.attach(attach_hash, &mut unconfirmed, &mut confirmed)?;
        }

        Ok((unconfirmed, confirmed))
    }

    /// Rolls a detached block's effects back out of the live UTXO set and
    /// trie: every output it created is removed and every output it spent
    /// is restored, and its non-coinbase transactions are handed back to
    /// the caller for re-offering to the claims pool.
    fn detach(
        &mut self,
        hash: &Hash256,
        unconfirmed: &mut HashMap<Hash256, Transaction>,
    ) -> CoinResult<()> {
        let block = self
            .branches
            .get(hash)
            .cloned()
            .map(Ok)
            .unwrap_or_else(|| {
                self.storage
                    .get_block(hash)
                    .and_then(|b| b.ok_or_else(|| CoinError::UnknownBlock(format!("detach: {hash} not stored"))))
            })?;
        let height = self
            .tree
            .get(hash)
            .ok_or_else(|| CoinError::UnknownBlock(format!("detach: {hash} not in tree")))?
            .height;

        for (idx, tx) in block.transactions.iter().enumerate() {
            let txid = tx.hash();
            for vout in 0..tx.outputs.len() as u32 {
                let outpoint = OutPoint::new(txid, vout);
                if self.utxo.spend(&outpoint).is_some() {
                    self.trie.remove(&key_for_outpoint(&outpoint));
                    self.storage.delete_unspent(&outpoint)?;
                }
            }

            let cnf = if idx == 0 {
                -(height as i64)
            } else {
                self.storage.confirmation_cnf_at(height, idx as u32)?.ok_or_else(|| {
                    CoinError::StorageError(format!(
                        "no confirmation on record for transaction {idx} of block {hash}"
                    ))
                })?
            };

            for spending in self.storage.spendings_for_icnf(cnf)? {
                let origin_height = self
                    .storage
                    .get_confirmation(spending.ocnf)?
                    .map(|c| c.count)
                    .unwrap_or(0);
                let restored = Unspent::new(
                    OutPoint::new(spending.txid, spending.vout),
                    crate::transaction::TxOutput::new(spending.value, spending.script),
                    origin_height,
                    spending.ocnf < 0,
                    spending.ocnf,
                );
                commit_unspent(&mut self.trie, &self.storage, &restored)?;
                self.utxo.insert(restored);
            }
            self.storage.delete_spendings_for_icnf(cnf)?;
            self.storage.delete_confirmation(cnf)?;

            if idx != 0 {
                unconfirmed.insert(txid, tx.clone());
            }
        }

        self.storage.mark_active(hash, false)?;
        self.branches.insert(*hash, block);
        Ok(())
    }

    /// Applies an attached block's transactions to the live UTXO set and
    /// trie: finality check on every transaction, every non-coinbase
    /// transaction's inputs consumed (subject to maturity and, once past
    /// the configured validation depth, script verification) and outputs
    /// created, then the coinbase's own outputs created.
    fn attach(
        &mut self,
        hash: &Hash256,
        unconfirmed: &mut HashMap<Hash256, Transaction>,
        confirmed: &mut Vec<Hash256>,
    ) -> CoinResult<()> {
        let block = self
            .branches
            .get(hash)
            .cloned()
            .ok_or_else(|| CoinError::UnknownBlock(format!("attach: {hash} not in branches")))?;
        let height = self
            .tree
            .get(hash)
            .ok_or_else(|| CoinError::UnknownBlock(format!("attach: {hash} not in tree")))?
            .height;

        if !self.chain.check_point(height, hash) {
            return Err(CoinError::CheckpointViolation(format!(
                "block {hash} at height {height} disagrees with a hard-coded checkpoint"
            )));
        }

        for tx in &block.transactions {
            if !is_final(tx, height, block.header.time as i64) {
                return Err(CoinError::InvalidBlock(format!(
                    "block {hash} contains a non-final transaction"
                )));
            }
        }

        let verify_scripts = self.validation_depth == 0 || height > self.validation_depth;
        let bip30_active = (block.header.time as i64) >= self.chain.bip30_activation_time();
        let mut fees: i64 = 0;

        for (idx, tx) in block.transactions.iter().enumerate().skip(1) {
            let txid = tx.hash();
            let already_verified = unconfirmed.contains_key(&txid) || self.claims.contains(&txid);

            let mut value_in: i64 = 0;
            let mut spendings: Vec<Spending> = Vec::with_capacity(tx.inputs.len());

            for (i, input) in tx.inputs.iter().enumerate() {
                let outpoint = input.previous_output;
                let spent = self
                    .utxo
                    .get(&outpoint)
                    .cloned()
                    .ok_or_else(|| CoinError::UnknownTx(format!("{} is not spendable", outpoint.txid)))?;
                if !spent.is_mature(height, self.chain.maturity(height)) {
                    return Err(CoinError::ImmatureCoinbase(format!(
                        "{} has not reached coinbase maturity",
                        outpoint.txid
                    )));
                }
                if verify_scripts && !already_verified {
                    let context = ScriptContext {
                        transaction: tx,
                        input_index: i,
                    };
                    let bip16_active = (block.header.time as i64) >= self.chain.bip16_activation_time();
                    let ok = verify_script(
                        &input.script_sig,
                        &spent.output.script_pubkey,
                        &context,
                        bip16_active,
                    )?;
                    if !ok {
                        return Err(CoinError::InvalidScript(format!(
                            "input {i} of {txid} fails script verification"
                        )));
                    }
                }
                if !self.chain.in_money_range(spent.output.value) {
                    return Err(CoinError::ValueOutOfRange(format!(
                        "input {i} of {txid} carries an out-of-range value"
                    )));
                }
                value_in += spent.output.value;

                spendings.push(Spending {
                    ocnf: spent.ocnf,
                    txid: outpoint.txid,
                    vout: outpoint.vout,
                    value: spent.output.value,
                    script: spent.output.script_pubkey.clone(),
                    signature: input.script_sig.clone(),
                    sequence: input.sequence,
                    input_index: i as u32,
                    icnf: 0, // filled in once this transaction's own cnf is known
                });

                self.utxo.spend(&outpoint);
                self.trie.remove(&key_for_outpoint(&outpoint));
                self.storage.delete_unspent(&outpoint)?;
            }

            let value_out: i64 = tx.outputs.iter().map(|o| o.value).sum();
            if !self.chain.in_money_range(value_out) {
                return Err(CoinError::ValueOutOfRange(format!(
                    "{txid} has an out-of-range total output value"
                )));
            }
            let fee = value_in - value_out;
            if fee < 0 {
                return Err(CoinError::ValueOutOfRange(format!(
                    "{txid} spends {value_in} but creates {value_out}"
                )));
            }
            if fee < self.chain.min_fee() {
                return Err(CoinError::FeeBelowMinimum(format!(
                    "{txid} pays a fee of {fee}, below the {} minimum",
                    self.chain.min_fee()
                )));
            }
            fees += fee;

            if bip30_active {
                for vout in 0..tx.outputs.len() as u32 {
                    if self.utxo.contains(&OutPoint::new(txid, vout)) {
                        return Err(CoinError::DuplicateCoin(format!(
                            "{txid}:{vout} duplicates a still-unspent coin"
                        )));
                    }
                }
            }

            if self.chain.adhere_names() {
                for output in &tx.outputs {
                    if let Some((op, _redemption)) = crate::names::parse_name_script(&output.script_pubkey) {
                        self.names.apply(&op, height, self.chain.expiration_depth(height as i64))?;
                    }
                }
            }

            let cnf = self.storage.insert_confirmation(tx.version, tx.lock_time, height, idx as u32)?;
            for mut spending in spendings {
                spending.icnf = cnf;
                self.storage.insert_spending(&spending)?;
            }

            for (vout, output) in tx.outputs.iter().enumerate() {
                let unspent = Unspent::new(OutPoint::new(txid, vout as u32), output.clone(), height, false, cnf);
                commit_unspent(&mut self.trie, &self.storage, &unspent)?;
                self.utxo.insert(unspent);
            }

            unconfirmed.remove(&txid);
            confirmed.push(txid);
        }

        // post the coinbase: its synthetic value-in is the block subsidy
        // plus every fee this block's transactions accumulated, and must
        // cover what it pays out; its outputs are created now, subject to
        // the usual maturity check the next time something tries to spend
        // them.
        let coinbase = &block.transactions[0];
        let coinbase_hash = coinbase.hash();
        let coinbase_value_out: i64 = coinbase.outputs.iter().map(|o| o.value).sum();
        let coinbase_value_in = self.chain.subsidy(height) + fees;
        if coinbase_value_in < coinbase_value_out {
            return Err(CoinError::ValueOutOfRange(format!(
                "coinbase {coinbase_hash} pays out {coinbase_value_out} but subsidy plus fees is only {coinbase_value_in}"
            )));
        }
        if !self.chain.in_money_range(coinbase_value_out) {
            return Err(CoinError::ValueOutOfRange(format!(
                "coinbase {coinbase_hash} has an out-of-range total output value"
            )));
        }
        if bip30_active {
            for vout in 0..coinbase.outputs.len() as u32 {
                if self.utxo.contains(&OutPoint::new(coinbase_hash, vout)) {
                    return Err(CoinError::DuplicateCoin(format!(
                        "{coinbase_hash}:{vout} duplicates a still-unspent coin"
                    )));
                }
            }
        }
        let coinbase_cnf =
            self.storage
                .insert_coinbase_confirmation(coinbase.version, coinbase.lock_time, height)?;
        for (vout, output) in coinbase.outputs.iter().enumerate() {
            let unspent = Unspent::new(
                OutPoint::new(coinbase_hash, vout as u32),
                output.clone(),
                height,
                true,
                coinbase_cnf,
            );
            commit_unspent(&mut self.trie, &self.storage, &unspent)?;
            self.utxo.insert(unspent);
        }

        self.storage.mark_active(hash, true)?;
        self.storage.set_tip(hash)?;
        Ok(())
    }

    /// Validates and admits an unconfirmed transaction to the claims pool,
    /// returning its hash on success.
    pub fn claim(&mut self, tx: Transaction, verify: bool) -> CoinResult<Hash256> {
        self.claims.try_claim(
            tx,
            &self.utxo,
            self.chain.as_ref(),
            self.tree.height(),
            current_time(),
            verify,
        )
    }

    #[must_use]
    pub fn claims(&self) -> &ClaimsPool {
        &self.claims
    }

    #[must_use]
    pub fn share_chain(&self) -> &ShareChain {
        &self.share_chain
    }

    #[must_use]
    pub fn names(&self) -> &crate::names::NameState {
        &self.names
    }

    /// Entry point for a share announced directly over the wire (the
    /// `ShareFilter`'s counterpart to `append`): validated against the
    /// relaxed share target and the dividend-table consistency rule, not
    /// against main-chain consensus.
    pub fn submit_share(
        &mut self,
        block: &Block,
        generator_script: Vec<u8>,
        previous_share: Hash256,
        dividend: &[PayeeShare],
    ) -> CoinResult<bool> {
        self.share_chain
            .insert(&block.header, previous_share, generator_script, dividend)
    }

    /// Assembles an unmined block extending the active tip, paying the
    /// subsidy plus selected claims' fees to `payees`.
    #[must_use]
    pub fn get_block_template(&self, payees: &[PayeeShare]) -> BlockTemplate {
        let tip = self.tree.best().expect("chain always has at least a genesis tip");
        let next_bits = self.next_work_required(&tip);
        build_template(
            self.chain.as_ref(),
            tip.hash,
            tip.height,
            next_bits,
            current_time() as u32,
            self.trie.root_hash(),
            &self.claims,
            payees,
        )
    }
}

/// The current Unix time, used to stamp claims pool admission and block
/// template timestamps. A clock that cannot read the system time (pre-1970
/// or otherwise broken) falls back to zero rather than panicking.
fn current_time() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Version-2+ blocks commit their height as the first push in the coinbase
/// scriptSig (a single length-prefixed little-endian run of bytes), the
/// same convention `mining::build_coinbase` writes and the only one this
/// engine checks when height enforcement is active.
fn coinbase_height_push(block: &Block) -> Option<BlockHeight> {
    let script = &block.transactions.first()?.inputs.first()?.script_sig;
    let len = *script.first()? as usize;
    if len == 0 || len > 4 {
        return None;
    }
    let bytes = script.get(1..1 + len)?;
    let mut buf = [0u8; 4];
    buf[..len].copy_from_slice(bytes);
    Some(u32::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{BitcoinChain, ChainKind, MessageStart};
    use crate::transaction::{TxInput, TxOutput};
    use coin_primitives::hash::Hash160;

    /// `BitcoinChain` with mainnet's real proof-of-work limit, which no test
    /// block can plausibly be mined against. Wraps it and substitutes a
    /// regtest-style trivial target everywhere else unchanged, the same way
    /// the original node's `-regtest` mode overrides only that one field.
    struct EasyChain(BitcoinChain);

    impl ChainParams for EasyChain {
        fn kind(&self) -> ChainKind {
            self.0.kind()
        }
        fn name(&self) -> &'static str {
            self.0.name()
        }
        fn protocol_version(&self) -> u32 {
            self.0.protocol_version()
        }
        fn genesis_block(&self) -> Block {
            self.0.genesis_block()
        }
        fn subsidy(&self, height: u32) -> i64 {
            self.0.subsidy(height)
        }
        fn proof_of_work_limit_bits(&self) -> u32 {
            0x207f_ffff
        }
        fn pubkey_hash_version(&self) -> u8 {
            self.0.pubkey_hash_version()
        }
        fn script_hash_version(&self) -> Option<u8> {
            self.0.script_hash_version()
        }
        fn message_start(&self) -> MessageStart {
            self.0.message_start()
        }
        fn default_port(&self) -> u16 {
            self.0.default_port()
        }
    }

    fn open_test_chain() -> BlockChain {
        let storage = Storage::open(":memory:").unwrap();
        BlockChain::open(Box::new(EasyChain(BitcoinChain::new())), storage).unwrap()
    }

    /// Builds a template extending `engine`'s tip and searches nonces until
    /// it meets its own (regtest-easy) target, which `EasyChain` makes take
    /// only a handful of tries.
    fn next_block(engine: &BlockChain, reward_script: Vec<u8>) -> Block {
        let template = engine.get_block_template(&[PayeeShare {
            script_pubkey: reward_script,
            numerator: 1,
            denominator: 1,
        }]);
        let mut block = template.block;
        block.header.merkle_root = block.calculate_merkle_root();
        for nonce in 0..1_000_000u32 {
            block.header.nonce = nonce;
            if block.header.meets_target() {
                return block;
            }
        }
        panic!("failed to find a nonce meeting the easy test target");
    }

    #[test]
    fn opens_with_genesis_already_on_the_active_chain() {
        let engine = open_test_chain();
        assert_eq!(engine.best_height(), 0);
        assert_eq!(engine.best_hash(), BitcoinChain::new().genesis_hash());
    }

    #[test]
    fn rejects_a_block_already_accepted() {
        let mut engine = open_test_chain();
        let genesis = BitcoinChain::new().genesis_block();
        assert!(engine.append(genesis).is_err());
    }

    #[test]
    fn appending_an_orphan_is_rejected() {
        let mut engine = open_test_chain();
        let header = BlockHeader::new(1, Hash256::double_sha256(b"nowhere"), Hash256::zero(), 1, 0x207f_ffff, 0);
        let coinbase = Transaction::coinbase(vec![1, 2, 3, 4], 50 * crate::chain::COIN, vec![]);
        let mut block = Block::new(header, vec![coinbase]);
        block.header.merkle_root = block.calculate_merkle_root();
        assert!(matches!(engine.append(block), Err(CoinError::OrphanBlock(_))));
    }

    #[test]
    fn invalid_chain_outrunning_the_active_tip_is_fatal() {
        let mut engine = open_test_chain();
        let genesis_time = BitcoinChain::new().genesis_block().header.time;
        let mut prev_hash = engine.best_hash();
        let mut last_result = None;
        // Each block's timestamp equals its (rejected) parent's, so every
        // one fails the median-time-past check; each extends the previous
        // rejection rather than the live tip, building up the invalid
        // tree's own height the way a sustained bad fork would.
        for _ in 0..4 {
            let header = BlockHeader::new(1, prev_hash, Hash256::zero(), genesis_time, 0x207f_ffff, 0);
            let coinbase = Transaction::coinbase(vec![1, 2, 3, 4], 50 * crate::chain::COIN, vec![]);
            let mut block = Block::new(header, vec![coinbase]);
            block.header.merkle_root = block.calculate_merkle_root();
            prev_hash = block.header.hash();
            last_result = Some(engine.append(block));
        }
        assert!(matches!(last_result, Some(Err(CoinError::Fatal(_)))));
    }

    #[test]
    fn appending_a_well_formed_block_advances_the_tip() {
        let mut engine = open_test_chain();
        let script = Transaction::create_p2pkh_script(&Hash160::hash160(b"miner"));
        let block = next_block(&engine, script.clone());
        let height = engine.best_height();
        let outcome = engine.append(block.clone()).unwrap();
        assert_eq!(outcome.height, height + 1);
        assert!(!outcome.reorganized);
        assert_eq!(engine.best_hash(), block.hash());
        // balance_for_script counts every unspent output regardless of
        // coinbase maturity, so the freshly minted subsidy shows up here
        // even though spending it would still be rejected for 100 blocks.
        assert_eq!(engine.balance(&script), 50 * crate::chain::COIN);
    }

    #[test]
    fn spending_an_unknown_output_is_rejected() {
        let engine = open_test_chain();
        let bogus = OutPoint::new(Hash256::double_sha256(b"nowhere"), 0);
        let tx = Transaction::new(
            1,
            vec![TxInput::new(bogus, vec![], 0xFFFF_FFFF)],
            vec![TxOutput::new(1, vec![])],
            0,
        );
        let mut engine = engine;
        assert!(engine.claim(tx, false).is_err());
    }

    #[test]
    fn best_locator_always_ends_at_genesis() {
        let engine = open_test_chain();
        let locator = engine.get_best_locator();
        assert_eq!(*locator.have.last().unwrap(), engine.best_hash());
    }

    #[test]
    fn have_block_is_true_for_the_genesis_hash() {
        let engine = open_test_chain();
        let hash = engine.best_hash();
        assert!(engine.have_block(&hash));
    }
}
