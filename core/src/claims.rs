//! The claims pool: the set of transactions that have been relayed and
//! locally validated against the current UTXO set but are not yet
//! confirmed in a block. Mirrors the original node's "transaction memory
//! pool", renamed to match this implementation's "claim" vocabulary for an
//! unconfirmed spend.

use crate::chain::ChainParams;
use crate::error::{CoinError, CoinResult};
use crate::script::{verify_script, ScriptContext};
use crate::transaction::{Transaction, TxOutput};
use crate::utxo::UtxoSet;
use coin_primitives::hash::Hash256;
use coin_primitives::types::{Amount, BlockHeight, OutPoint};
use std::collections::HashMap;

/// A 24-hour window before an unconfirmed claim is eligible for purge, the
/// same horizon the original node used for its mempool expiry sweep.
pub const DEFAULT_EXPIRY_SECONDS: i64 = 24 * 60 * 60;

/// An accepted but unconfirmed transaction, together with the bookkeeping
/// the pool needs to judge fees and expiry without re-deriving them.
#[derive(Debug, Clone)]
pub struct ClaimedTx {
    pub tx: Transaction,
    pub fee: Amount,
    pub received_at: i64,
}

/// The unconfirmed transaction set. Spends within the pool chain against
/// each other (a claim may spend another claim's output) as well as
/// against the confirmed UTXO set, so `try_claim` resolves both.
#[derive(Debug, Default)]
pub struct ClaimsPool {
    claims: HashMap<Hash256, ClaimedTx>,
    /// Which claim currently spends a given outpoint, confirmed or not,
    /// so a second claim attempting to spend the same outpoint is caught
    /// as a double spend before it ever reaches a block.
    spent_by: HashMap<OutPoint, Hash256>,
}

impl ClaimsPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.claims.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    #[must_use]
    pub fn contains(&self, hash: &Hash256) -> bool {
        self.claims.contains_key(hash)
    }

    #[must_use]
    pub fn get(&self, hash: &Hash256) -> Option<&ClaimedTx> {
        self.claims.get(hash)
    }

    #[must_use]
    pub fn iter(&self) -> impl Iterator<Item = (&Hash256, &ClaimedTx)> {
        self.claims.iter()
    }

    /// Looks up an output by outpoint, checking unconfirmed claims before
    /// falling back to the confirmed UTXO set, so a chain of unconfirmed
    /// spends resolves correctly.
    #[must_use]
    pub fn resolve_output<'a>(
        &'a self,
        outpoint: &OutPoint,
        utxo: &'a UtxoSet,
    ) -> Option<&'a TxOutput> {
        if let Some(claimed) = self.claims.get(&outpoint.txid) {
            claimed.tx.outputs.get(outpoint.vout as usize)
        } else {
            utxo.get(outpoint).map(|u| &u.output)
        }
    }

    /// Validates `tx` against the confirmed UTXO set and the rest of the
    /// pool, and if it passes, admits it. Returns the transaction's hash on
    /// success.
    ///
    /// Checks performed, in order: not already claimed, not a coinbase, no
    /// double spend against an existing claim or the confirmed set, every
    /// input resolves and is mature, the fee is non-negative and meets the
    /// chain's minimum, and (when `verify_scripts` is set) every input's
    /// scriptSig satisfies its previous output's scriptPubKey.
    pub fn try_claim(
        &mut self,
        tx: Transaction,
        utxo: &UtxoSet,
        chain: &dyn ChainParams,
        height: BlockHeight,
        now: i64,
        verify_scripts: bool,
    ) -> CoinResult<Hash256> {
        let hash = tx.hash();
        if self.claims.contains_key(&hash) {
            return Err(CoinError::InvalidTransaction(format!(
                "{hash} already claimed"
            )));
        }
        if tx.is_coinbase() {
            return Err(CoinError::InvalidTransaction(
                "coinbase transactions cannot be claimed".into(),
            ));
        }
        tx.validate_basic()
            .map_err(CoinError::InvalidTransaction)?;

        for input in &tx.inputs {
            if let Some(existing) = self.spent_by.get(&input.previous_output) {
                return Err(CoinError::DoubleSpend(format!(
                    "{} already spent by {existing}",
                    input.previous_output.txid
                )));
            }
        }

        let mut total_in: Amount = 0;
        for input in &tx.inputs {
            let outpoint = &input.previous_output;
            if let Some(parent_unspent) = utxo.get(outpoint) {
                if !parent_unspent.is_mature(height, chain.maturity(height)) {
                    return Err(CoinError::ImmatureCoinbase(format!(
                        "{} has not reached coinbase maturity",
                        outpoint.txid
                    )));
                }
                total_in = total_in
                    .checked_add(parent_unspent.output.value)
                    .ok_or_else(|| CoinError::ValueOutOfRange("input sum overflow".into()))?;
            } else if let Some(parent_claim) = self.claims.get(&outpoint.txid) {
                let output = parent_claim
                    .tx
                    .outputs
                    .get(outpoint.vout as usize)
                    .ok_or_else(|| {
                        CoinError::UnknownTx(format!("{} has no output {}", outpoint.txid, outpoint.vout))
                    })?;
                total_in = total_in
                    .checked_add(output.value)
                    .ok_or_else(|| CoinError::ValueOutOfRange("input sum overflow".into()))?;
            } else {
                return Err(CoinError::UnknownTx(format!(
                    "input {} spends an unknown output",
                    outpoint.txid
                )));
            }
        }

        let total_out = tx.total_output_value();
        if !chain.in_money_range(total_out) {
            return Err(CoinError::ValueOutOfRange(
                "total output value out of range".into(),
            ));
        }
        let fee = total_in - total_out;
        if fee < 0 {
            return Err(CoinError::ValueOutOfRange(
                "transaction spends more than its inputs provide".into(),
            ));
        }
        if fee < chain.min_fee() {
            return Err(CoinError::FeeBelowMinimum(format!(
                "fee {fee} below minimum {}",
                chain.min_fee()
            )));
        }

        if verify_scripts {
            for (i, input) in tx.inputs.iter().enumerate() {
                let prev_script = self
                    .resolve_output(&input.previous_output, utxo)
                    .ok_or_else(|| {
                        CoinError::UnknownTx(format!(
                            "input {} spends an unknown output",
                            input.previous_output.txid
                        ))
                    })?
                    .script_pubkey
                    .clone();
                let context = ScriptContext {
                    transaction: &tx,
                    input_index: i,
                };
                let ok = verify_script(&input.script_sig, &prev_script, &context, true)?;
                if !ok {
                    return Err(CoinError::InvalidScript(format!(
                        "input {i} does not satisfy its previous output's script"
                    )));
                }
            }
        }

        for input in &tx.inputs {
            self.spent_by.insert(input.previous_output, hash);
        }
        self.claims.insert(
            hash,
            ClaimedTx {
                tx,
                fee,
                received_at: now,
            },
        );
        Ok(hash)
    }

    /// Removes a claim (e.g. because it was just confirmed in a block), along
    /// with its outpoint reservations.
    pub fn erase(&mut self, hash: &Hash256) -> Option<ClaimedTx> {
        let claimed = self.claims.remove(hash)?;
        for input in &claimed.tx.inputs {
            if self.spent_by.get(&input.previous_output) == Some(hash) {
                self.spent_by.remove(&input.previous_output);
            }
        }
        Some(claimed)
    }

    /// Drops every claim received before `before` (a Unix timestamp),
    /// returning their hashes. Callers typically pass `now - DEFAULT_EXPIRY_SECONDS`.
    pub fn purge(&mut self, before: i64) -> Vec<Hash256> {
        let stale: Vec<Hash256> = self
            .claims
            .iter()
            .filter(|(_, c)| c.received_at < before)
            .map(|(h, _)| *h)
            .collect();
        for hash in &stale {
            self.erase(hash);
        }
        stale
    }

    /// Claims ordered by descending fee-per-byte, the order the block
    /// template builder consumes them in.
    #[must_use]
    pub fn by_fee_density(&self) -> Vec<&ClaimedTx> {
        let mut claims: Vec<&ClaimedTx> = self.claims.values().collect();
        claims.sort_by(|a, b| {
            let density_a = a.fee as f64 / a.tx.estimated_size().max(1) as f64;
            let density_b = b.fee as f64 / b.tx.estimated_size().max(1) as f64;
            density_b
                .partial_cmp(&density_a)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        claims
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::BitcoinChain;
    use crate::transaction::{TxInput, TxOutput};
    use crate::utxo::Unspent;
    use coin_primitives::hash::Hash160;

    fn funded_utxo(value: Amount, script: Vec<u8>) -> (UtxoSet, OutPoint) {
        let mut utxo = UtxoSet::new();
        let outpoint = OutPoint::new(Hash256::double_sha256(b"funding-tx"), 0);
        utxo.insert(Unspent::new(outpoint, TxOutput::new(value, script), 0, false, 0));
        (utxo, outpoint)
    }

    fn spend(outpoint: OutPoint, value: Amount, script: Vec<u8>) -> Transaction {
        Transaction::new(
            1,
            vec![TxInput::new(outpoint, vec![], 0xFFFF_FFFF)],
            vec![TxOutput::new(value, script)],
            0,
        )
    }

    #[test]
    fn accepts_a_well_formed_spend_with_adequate_fee() {
        let script = Transaction::create_p2pkh_script(&Hash160::hash160(b"payee"));
        let (utxo, outpoint) = funded_utxo(100_000, script.clone());
        let tx = spend(outpoint, 90_000, script);
        let mut pool = ClaimsPool::new();
        let chain = BitcoinChain::new();
        let hash = pool
            .try_claim(tx, &utxo, &chain, 200_000, 1_700_000_000, false)
            .unwrap();
        assert!(pool.contains(&hash));
        assert_eq!(pool.get(&hash).unwrap().fee, 10_000);
    }

    #[test]
    fn rejects_fee_below_chain_minimum() {
        let script = Transaction::create_p2pkh_script(&Hash160::hash160(b"payee"));
        let (utxo, outpoint) = funded_utxo(100_000, script.clone());
        let tx = spend(outpoint, 99_999, script);
        let mut pool = ClaimsPool::new();
        let chain = BitcoinChain::new();
        assert!(pool
            .try_claim(tx, &utxo, &chain, 200_000, 1_700_000_000, false)
            .is_err());
    }

    #[test]
    fn rejects_double_spend_of_an_outpoint_already_claimed() {
        let script = Transaction::create_p2pkh_script(&Hash160::hash160(b"payee"));
        let (utxo, outpoint) = funded_utxo(100_000, script.clone());
        let tx_a = spend(outpoint, 50_000, script.clone());
        let tx_b = spend(outpoint, 40_000, script);
        let mut pool = ClaimsPool::new();
        let chain = BitcoinChain::new();
        pool.try_claim(tx_a, &utxo, &chain, 200_000, 1_700_000_000, false)
            .unwrap();
        let result = pool.try_claim(tx_b, &utxo, &chain, 200_000, 1_700_000_000, false);
        assert!(matches!(result, Err(CoinError::DoubleSpend(_))));
    }

    #[test]
    fn rejects_immature_coinbase_input() {
        let script = Transaction::create_p2pkh_script(&Hash160::hash160(b"payee"));
        let mut utxo = UtxoSet::new();
        let outpoint = OutPoint::new(Hash256::double_sha256(b"coinbase-tx"), 0);
        utxo.insert(Unspent::new(
            outpoint,
            TxOutput::new(5_000_000_000, script.clone()),
            199_950,
            true,
            -199_950,
        ));
        let tx = spend(outpoint, 10_000, script);
        let mut pool = ClaimsPool::new();
        let chain = BitcoinChain::new();
        let result = pool.try_claim(tx, &utxo, &chain, 200_000, 1_700_000_000, false);
        assert!(matches!(result, Err(CoinError::ImmatureCoinbase(_))));
    }

    #[test]
    fn rejects_an_unknown_input() {
        let script = Transaction::create_p2pkh_script(&Hash160::hash160(b"payee"));
        let utxo = UtxoSet::new();
        let outpoint = OutPoint::new(Hash256::double_sha256(b"nonexistent"), 0);
        let tx = spend(outpoint, 10_000, script);
        let mut pool = ClaimsPool::new();
        let chain = BitcoinChain::new();
        let result = pool.try_claim(tx, &utxo, &chain, 200_000, 1_700_000_000, false);
        assert!(matches!(result, Err(CoinError::UnknownTx(_))));
    }

    #[test]
    fn purge_drops_claims_older_than_the_cutoff() {
        let script = Transaction::create_p2pkh_script(&Hash160::hash160(b"payee"));
        let (utxo, outpoint) = funded_utxo(100_000, script.clone());
        let tx = spend(outpoint, 90_000, script);
        let mut pool = ClaimsPool::new();
        let chain = BitcoinChain::new();
        let hash = pool
            .try_claim(tx, &utxo, &chain, 200_000, 1_000_000, false)
            .unwrap();
        let purged = pool.purge(1_000_000 + DEFAULT_EXPIRY_SECONDS + 1);
        assert_eq!(purged, vec![hash]);
        assert!(pool.is_empty());
    }

    #[test]
    fn erase_frees_the_outpoint_for_a_future_claim() {
        let script = Transaction::create_p2pkh_script(&Hash160::hash160(b"payee"));
        let (utxo, outpoint) = funded_utxo(100_000, script.clone());
        let tx = spend(outpoint, 90_000, script.clone());
        let mut pool = ClaimsPool::new();
        let chain = BitcoinChain::new();
        let hash = pool
            .try_claim(tx, &utxo, &chain, 200_000, 1_700_000_000, false)
            .unwrap();
        pool.erase(&hash);
        let tx2 = spend(outpoint, 80_000, script);
        assert!(pool
            .try_claim(tx2, &utxo, &chain, 200_000, 1_700_000_000, false)
            .is_ok());
    }
}
