//! Block template construction: selecting claims, building the coinbase,
//! and assembling an unmined block header. Actual proof-of-work search is
//! left to an external miner driving the returned template; this module
//! never searches for a nonce itself.

use crate::block::{merkle_root, Block, BlockHeader};
use crate::chain::ChainParams;
use crate::claims::ClaimsPool;
use crate::transaction::{Transaction, TxInput, TxOutput};
use coin_primitives::hash::Hash256;
use coin_primitives::types::{Amount, BlockHeight};

/// One entry in a block reward's payee list: a script to pay and the
/// fraction (out of `denominator`) of the combined subsidy-plus-fees that
/// script receives. Used for merge-mining-style shares where the reward is
/// split between a solo miner and a pool.
#[derive(Debug, Clone)]
pub struct PayeeShare {
    pub script_pubkey: Vec<u8>,
    pub numerator: u64,
    pub denominator: u64,
}

/// A block ready for proof-of-work search: `header.nonce` is `0` and
/// `header.bits` is the target the eventual solution must meet.
#[derive(Debug, Clone)]
pub struct BlockTemplate {
    pub block: Block,
    pub height: BlockHeight,
    pub fees: Amount,
}

/// Builds the coinbase transaction distributing `subsidy + fees` across
/// `payees` by their fraction. Every payee after the first gets its exact
/// floor-divided share; the first payee absorbs whatever integer-division
/// remainder is left over, the same remainder-to-first-payee rule the
/// original node used for merge-mined share payouts. Commits `height` via
/// a BIP34-style script-prefix push and `trie_root` as a second push, so
/// the trie's state at this height is captured in a byte position nothing
/// else can reach without matching the merkle root.
fn build_coinbase(
    height: BlockHeight,
    subsidy: Amount,
    fees: Amount,
    payees: &[PayeeShare],
    trie_root: Hash256,
) -> Transaction {
    let total = subsidy + fees;
    let mut script_sig = Vec::new();
    script_sig.push(4);
    script_sig.extend_from_slice(&height.to_le_bytes());
    script_sig.push(32);
    script_sig.extend_from_slice(trie_root.as_bytes());

    let outputs = if payees.is_empty() {
        vec![TxOutput::new(total, Vec::new())]
    } else {
        let rest_total: Amount = payees[1..]
            .iter()
            .map(|p| (total * p.numerator as Amount) / p.denominator as Amount)
            .sum();
        let mut outputs = Vec::with_capacity(payees.len());
        outputs.push(TxOutput::new(total - rest_total, payees[0].script_pubkey.clone()));
        for payee in &payees[1..] {
            let amount = (total * payee.numerator as Amount) / payee.denominator as Amount;
            outputs.push(TxOutput::new(amount, payee.script_pubkey.clone()));
        }
        outputs
    };

    Transaction::new(1, vec![TxInput::coinbase(script_sig)], outputs, 0)
}

/// Selects claims from `pool` by descending fee density, skipping any whose
/// inputs are not yet satisfiable from already-selected claims or the
/// confirmed set (a simple dependency check: a claim spending another
/// claim's output is only included once its parent is).
fn select_claims(pool: &ClaimsPool, max_block_size: usize) -> (Vec<Transaction>, Amount) {
    let mut selected: Vec<Transaction> = Vec::new();
    let mut included: std::collections::HashSet<Hash256> = std::collections::HashSet::new();
    let mut total_fees: Amount = 0;
    let mut size = 80; // header

    for claimed in pool.by_fee_density() {
        let depends_on_unselected = claimed.tx.inputs.iter().any(|i| {
            pool.contains(&i.previous_output.txid) && !included.contains(&i.previous_output.txid)
        });
        if depends_on_unselected {
            continue;
        }
        let tx_size = claimed.tx.estimated_size();
        if size + tx_size > max_block_size {
            continue;
        }
        size += tx_size;
        total_fees += claimed.fee;
        included.insert(claimed.tx.hash());
        selected.push(claimed.tx.clone());
    }
    (selected, total_fees)
}

/// Builds a block template extending a tip at `tip_height` with hash
/// `tip_hash`, given the chain's consensus parameters, the candidate
/// transactions in `pool`, and the payout split for the combined subsidy
/// and fees. `next_bits` is the already-computed proof-of-work target for
/// the new height (see `crate::target::retarget`); this module only
/// assembles the block, it does not run the retarget itself since that
/// needs the tip's ancestor history that only the chain engine holds.
pub fn build_template(
    chain: &dyn ChainParams,
    tip_hash: Hash256,
    tip_height: BlockHeight,
    next_bits: u32,
    time: u32,
    trie_root: Hash256,
    pool: &ClaimsPool,
    payees: &[PayeeShare],
) -> BlockTemplate {
    let height = tip_height + 1;
    let (transactions, fees) = select_claims(pool, chain.max_block_size());
    let subsidy = chain.subsidy(height);
    let coinbase = build_coinbase(height, subsidy, fees, payees, trie_root);

    let mut all_txs = Vec::with_capacity(transactions.len() + 1);
    all_txs.push(coinbase);
    all_txs.extend(transactions);

    let hashes: Vec<Hash256> = all_txs.iter().map(Transaction::hash).collect();
    let root = merkle_root(&hashes);
    let header = BlockHeader::new(1, tip_hash, root, time, next_bits, 0);
    let block = Block::new(header, all_txs);

    BlockTemplate {
        block,
        height,
        fees,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::BitcoinChain;
    use crate::utxo::{Unspent, UtxoSet};
    use coin_primitives::hash::Hash160;
    use coin_primitives::types::OutPoint;

    #[test]
    fn template_has_coinbase_first_and_commits_height() {
        let chain = BitcoinChain::new();
        let pool = ClaimsPool::new();
        let template = build_template(
            &chain,
            Hash256::zero(),
            209_999,
            0x1d00_ffff,
            1_700_000_000,
            Hash256::zero(),
            &pool,
            &[],
        );
        assert!(template.block.is_coinbase_first());
        assert_eq!(template.height, 210_000);
        assert_eq!(template.fees, 0);
        let coinbase_script = &template.block.transactions[0].inputs[0].script_sig;
        assert_eq!(&coinbase_script[1..5], &210_000u32.to_le_bytes());
    }

    #[test]
    fn template_includes_claims_and_sums_their_fees() {
        let chain = BitcoinChain::new();
        let script = Transaction::create_p2pkh_script(&Hash160::hash160(b"payee"));
        let mut utxo = UtxoSet::new();
        let outpoint = OutPoint::new(Hash256::double_sha256(b"funding"), 0);
        utxo.insert(Unspent::new(
            outpoint,
            TxOutput::new(100_000, script.clone()),
            0,
            false,
            1,
        ));
        let tx = Transaction::new(
            1,
            vec![TxInput::new(outpoint, vec![], 0xFFFF_FFFF)],
            vec![TxOutput::new(90_000, script)],
            0,
        );
        let mut pool = ClaimsPool::new();
        pool.try_claim(tx, &utxo, &chain, 1, 1_700_000_000, false)
            .unwrap();

        let template = build_template(
            &chain,
            Hash256::zero(),
            0,
            0x1d00_ffff,
            1_700_000_000,
            Hash256::zero(),
            &pool,
            &[],
        );
        assert_eq!(template.block.transactions.len(), 2);
        assert_eq!(template.fees, 10_000);
    }

    #[test]
    fn merkle_root_commits_to_every_included_transaction() {
        let chain = BitcoinChain::new();
        let pool = ClaimsPool::new();
        let template = build_template(
            &chain,
            Hash256::zero(),
            0,
            0x1d00_ffff,
            1_700_000_000,
            Hash256::zero(),
            &pool,
            &[],
        );
        assert_eq!(
            template.block.calculate_merkle_root(),
            template.block.header.merkle_root
        );
    }

    #[test]
    fn payee_shares_split_the_reward_with_remainder_to_first_payee() {
        let payees = vec![
            PayeeShare {
                script_pubkey: vec![1],
                numerator: 1,
                denominator: 2,
            },
            PayeeShare {
                script_pubkey: vec![2],
                numerator: 1,
                denominator: 2,
            },
        ];
        let coinbase = build_coinbase(0, 100, 1, &payees, Hash256::zero());
        assert_eq!(coinbase.outputs[0].value + coinbase.outputs[1].value, 101);
        assert_eq!(coinbase.outputs[1].value, 50);
        assert_eq!(coinbase.outputs[0].value, 51);
    }
}
