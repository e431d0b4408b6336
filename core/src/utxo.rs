//! The unspent-transaction-output set: the authenticated ledger of spendable
//! coin, keyed by `OutPoint`, that the Merkle trie commits to.

use crate::error::CoinError;
use crate::transaction::TxOutput;
use coin_primitives::types::{Amount, BlockHeight, OutPoint};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An unspent output together with the metadata needed to judge its
/// maturity and authenticate it in the trie: which block created it and
/// whether that block's only transaction was the coinbase. `ocnf` names
/// the confirmation record that introduced this coin (negative for a
/// coinbase, per the `cnf = -block-count` convention), so a later redeem
/// can carry it forward into the coin's `Spending` row without a lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unspent {
    pub outpoint: OutPoint,
    pub output: TxOutput,
    pub height: BlockHeight,
    pub is_coinbase: bool,
    pub ocnf: i64,
}

impl Unspent {
    #[must_use]
    pub const fn new(
        outpoint: OutPoint,
        output: TxOutput,
        height: BlockHeight,
        is_coinbase: bool,
        ocnf: i64,
    ) -> Self {
        Self {
            outpoint,
            output,
            height,
            is_coinbase,
            ocnf,
        }
    }

    /// Whether this output may be spent at `spending_height`, given the
    /// chain's coinbase maturity rule (non-coinbase outputs are always
    /// spendable once confirmed).
    #[must_use]
    pub fn is_mature(&self, spending_height: BlockHeight, maturity: u32) -> bool {
        if self.is_coinbase {
            spending_height >= self.height + maturity
        } else {
            true
        }
    }
}

/// The full set of spendable outputs. Authentication (the Merkle trie root
/// over this set) lives in `merkle_trie`; this type is the flat lookup
/// table the trie indexes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UtxoSet {
    unspents: HashMap<OutPoint, Unspent>,
}

impl UtxoSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, unspent: Unspent) {
        self.unspents.insert(unspent.outpoint, unspent);
    }

    pub fn spend(&mut self, outpoint: &OutPoint) -> Option<Unspent> {
        self.unspents.remove(outpoint)
    }

    #[must_use]
    pub fn get(&self, outpoint: &OutPoint) -> Option<&Unspent> {
        self.unspents.get(outpoint)
    }

    #[must_use]
    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.unspents.contains_key(outpoint)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.unspents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.unspents.is_empty()
    }

    #[must_use]
    pub fn balance_for_script(&self, script_pubkey: &[u8]) -> Amount {
        self.unspents
            .values()
            .filter(|u| u.output.script_pubkey == script_pubkey)
            .map(|u| u.output.value)
            .sum()
    }

    /// Greedily selects unspents locked to `script_pubkey` until their total
    /// value reaches `amount`, or errors if the script's balance falls short.
    pub fn select_for_amount(
        &self,
        script_pubkey: &[u8],
        amount: Amount,
    ) -> Result<Vec<&Unspent>, CoinError> {
        let mut selected = Vec::new();
        let mut total: Amount = 0;
        for unspent in self.unspents.values() {
            if unspent.output.script_pubkey != script_pubkey {
                continue;
            }
            selected.push(unspent);
            total = total
                .checked_add(unspent.output.value)
                .ok_or_else(|| CoinError::InvalidTransaction("UTXO selection overflow".into()))?;
            if total >= amount {
                return Ok(selected);
            }
        }
        Err(CoinError::InvalidTransaction(format!(
            "insufficient funds: found {total}, need {amount}"
        )))
    }

    #[must_use]
    pub fn iter(&self) -> impl Iterator<Item = (&OutPoint, &Unspent)> {
        self.unspents.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coin_primitives::hash::Hash256;

    fn sample_unspent(vout: u32, value: Amount, script: Vec<u8>, height: BlockHeight, coinbase: bool) -> Unspent {
        let outpoint = OutPoint::new(Hash256::double_sha256(b"tx"), vout);
        Unspent::new(outpoint, TxOutput::new(value, script), height, coinbase, 0)
    }

    #[test]
    fn outpoint_is_the_real_identifier_not_a_placeholder() {
        let unspent = sample_unspent(3, 500, vec![9], 10, false);
        assert_eq!(unspent.outpoint.vout, 3);
    }

    #[test]
    fn coinbase_requires_maturity_window() {
        let unspent = sample_unspent(0, 5000, vec![1, 2, 3], 100, true);
        assert!(!unspent.is_mature(150, 100));
        assert!(unspent.is_mature(200, 100));
    }

    #[test]
    fn non_coinbase_is_always_mature() {
        let unspent = sample_unspent(0, 5000, vec![1, 2, 3], 100, false);
        assert!(unspent.is_mature(101, 100));
    }

    #[test]
    fn set_insert_and_spend_round_trip() {
        let mut set = UtxoSet::new();
        let unspent = sample_unspent(0, 5000, vec![1, 2, 3], 100, false);
        let outpoint = unspent.outpoint;
        set.insert(unspent);
        assert!(set.contains(&outpoint));
        assert_eq!(set.len(), 1);
        let spent = set.spend(&outpoint);
        assert!(spent.is_some());
        assert!(!set.contains(&outpoint));
    }

    #[test]
    fn balance_for_script_sums_matching_outputs() {
        let mut set = UtxoSet::new();
        let script = vec![1, 2, 3];
        set.insert(sample_unspent(0, 1000, script.clone(), 100, false));
        set.insert(sample_unspent(1, 2000, script.clone(), 100, false));
        set.insert(sample_unspent(2, 3000, vec![4, 5, 6], 100, false));
        assert_eq!(set.balance_for_script(&script), 3000);
    }

    #[test]
    fn select_for_amount_errors_when_balance_is_short() {
        let mut set = UtxoSet::new();
        let script = vec![1];
        set.insert(sample_unspent(0, 10, script.clone(), 100, false));
        assert!(set.select_for_amount(&script, 100).is_err());
    }
}
