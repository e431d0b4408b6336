//! The share chain: merge-mining-style bookkeeping for block candidates
//! that meet a relaxed proof-of-work target but not necessarily the main
//! chain's. Tracked as its own sparse chain of `ShareEntry` rather than
//! folded into `BlockTree`, since a share's validity never depends on the
//! active chain's target or on transaction-level consensus, only on its
//! own PoW and the 360-entry payout table it carries.
//!
//! Implements only the author's stated intent for share next-work
//! (the original `nextWorkRequired` for
//! shares was partially commented out in the source this was distilled
//! from) — shares here are checked for internal consistency against a
//! fixed relaxed target, not re-derived from an unobserved retarget rule.

use crate::mining::PayeeShare;
use crate::target::bits_to_target;
use coin_primitives::hash::Hash256;

use crate::block::BlockHeader;
use crate::error::{CoinError, CoinResult};
use std::collections::HashMap;

/// How many past rewardees (plus the new share's own generator) a share's
/// dividend table distributes across.
pub const DIVIDEND_WINDOW: usize = 360;

/// A single accepted share: enough to walk the chain backwards and to
/// re-derive the dividend table an extending share must carry.
#[derive(Debug, Clone)]
pub struct ShareEntry {
    pub hash: Hash256,
    pub previous_share: Hash256,
    pub depth: u64,
    pub generator_script: Vec<u8>,
    pub dividend: Vec<PayeeShare>,
    pub time: u32,
    pub bits: u32,
}

/// The share chain itself: every share ever accepted, keyed by hash, plus
/// the current best (deepest) tip. Unlike `BlockTree` there is no notion
/// of cumulative work driving the tip choice — the original node's
/// intent is simply the longest share chain.
#[derive(Debug, Default)]
pub struct ShareChain {
    share_target_bits: u32,
    entries: HashMap<Hash256, ShareEntry>,
    tip: Option<Hash256>,
}

fn dividend_matches(expected: &[PayeeShare], actual: &[PayeeShare]) -> bool {
    expected.len() == actual.len()
        && expected.iter().zip(actual.iter()).all(|(e, a)| {
            e.script_pubkey == a.script_pubkey
                && e.numerator == a.numerator
                && e.denominator == a.denominator
        })
}

impl ShareChain {
    #[must_use]
    pub fn new(share_target_bits: u32) -> Self {
        Self {
            share_target_bits,
            entries: HashMap::new(),
            tip: None,
        }
    }

    #[must_use]
    pub fn tip(&self) -> Option<Hash256> {
        self.tip
    }

    #[must_use]
    pub fn depth(&self, hash: &Hash256) -> Option<u64> {
        self.entries.get(hash).map(|e| e.depth)
    }

    #[must_use]
    pub fn get(&self, hash: &Hash256) -> Option<&ShareEntry> {
        self.entries.get(hash)
    }

    /// Whether `header`'s hash meets the share chain's relaxed target,
    /// independent of whether it meets the main chain's current target.
    #[must_use]
    pub fn qualifies(&self, header: &BlockHeader) -> bool {
        header.hash().meets_target(&bits_to_target(self.share_target_bits))
    }

    /// Walks back from `tip` (exclusive of `tip` already being fully
    /// counted), collecting up to `DIVIDEND_WINDOW - 1` prior generator
    /// scripts, tip-first.
    fn recent_rewardees(&self, tip: Hash256) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        let mut cursor = tip;
        loop {
            if out.len() >= DIVIDEND_WINDOW - 1 {
                break;
            }
            let Some(entry) = self.entries.get(&cursor) else {
                break;
            };
            out.push(entry.generator_script.clone());
            if entry.previous_share == Hash256::zero() {
                break;
            }
            cursor = entry.previous_share;
        }
        out
    }

    /// The dividend table a share extending `previous_share` (the chain
    /// root if `Hash256::zero()`) with `generator_script` must carry: the
    /// new generator plus up to the last 359 rewardees, one equal share
    /// each.
    #[must_use]
    pub fn expected_dividend(
        &self,
        previous_share: Hash256,
        generator_script: Vec<u8>,
    ) -> Vec<PayeeShare> {
        let mut scripts = vec![generator_script];
        if previous_share != Hash256::zero() {
            scripts.extend(self.recent_rewardees(previous_share));
        }
        let denominator = scripts.len() as u64;
        scripts
            .into_iter()
            .map(|script_pubkey| PayeeShare {
                script_pubkey,
                numerator: 1,
                denominator,
            })
            .collect()
    }

    /// Validates and inserts a share, returning whether it became the new
    /// tip. Rejects a share whose PoW misses the relaxed target, whose
    /// previous share is unknown (an orphan share, mirroring `OrphanBlock`
    /// for the main chain), or whose dividend table does not match the
    /// recent-share aggregation.
    pub fn insert(
        &mut self,
        header: &BlockHeader,
        previous_share: Hash256,
        generator_script: Vec<u8>,
        dividend: &[PayeeShare],
    ) -> CoinResult<bool> {
        let hash = header.hash();
        if self.entries.contains_key(&hash) {
            return Ok(self.tip == Some(hash));
        }
        if !self.qualifies(header) {
            return Err(CoinError::InvalidProofOfWork(format!(
                "share {hash} does not meet the share target"
            )));
        }
        let parent_depth = if previous_share == Hash256::zero() {
            0
        } else {
            self.entries
                .get(&previous_share)
                .map(|e| e.depth)
                .ok_or_else(|| {
                    CoinError::OrphanBlock(format!(
                        "share {hash}: previous share {previous_share} unknown"
                    ))
                })?
        };
        let expected = self.expected_dividend(previous_share, generator_script.clone());
        if !dividend_matches(&expected, dividend) {
            return Err(CoinError::InvalidBlock(format!(
                "share {hash}: dividend table does not match the last {} rewardees",
                DIVIDEND_WINDOW
            )));
        }

        let depth = parent_depth + 1;
        self.entries.insert(
            hash,
            ShareEntry {
                hash,
                previous_share,
                depth,
                generator_script,
                dividend: dividend.to_vec(),
                time: header.time,
                bits: header.bits,
            },
        );

        let became_tip = match self.tip {
            None => true,
            Some(current) => depth > self.entries[&current].depth,
        };
        if became_tip {
            self.tip = Some(hash);
        }
        Ok(became_tip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(previous_hash: Hash256, nonce: u32) -> BlockHeader {
        BlockHeader::new(3, previous_hash, Hash256::zero(), 1, 0x207f_ffff, nonce)
    }

    #[test]
    fn first_share_has_only_its_own_generator_in_the_dividend() {
        let chain = ShareChain::new(0x207f_ffff);
        let table = chain.expected_dividend(Hash256::zero(), vec![1, 2, 3]);
        assert_eq!(table.len(), 1);
        assert_eq!(table[0].script_pubkey, vec![1, 2, 3]);
        assert_eq!(table[0].denominator, 1);
    }

    #[test]
    fn chain_extends_and_tracks_tip_depth() {
        let mut chain = ShareChain::new(0x207f_ffff);
        let h1 = header(Hash256::zero(), 1);
        let dividend1 = chain.expected_dividend(Hash256::zero(), vec![0xA]);
        assert!(chain
            .insert(&h1, Hash256::zero(), vec![0xA], &dividend1)
            .unwrap());
        assert_eq!(chain.tip(), Some(h1.hash()));

        let h2 = header(h1.hash(), 2);
        let dividend2 = chain.expected_dividend(h1.hash(), vec![0xB]);
        assert_eq!(dividend2.len(), 2);
        assert!(chain
            .insert(&h2, h1.hash(), vec![0xB], &dividend2)
            .unwrap());
        assert_eq!(chain.tip(), Some(h2.hash()));
        assert_eq!(chain.depth(&h2.hash()), Some(2));
    }

    #[test]
    fn mismatched_dividend_table_is_rejected() {
        let mut chain = ShareChain::new(0x207f_ffff);
        let h1 = header(Hash256::zero(), 1);
        let bogus = vec![PayeeShare {
            script_pubkey: vec![0xFF],
            numerator: 1,
            denominator: 1,
        }];
        assert!(chain.insert(&h1, Hash256::zero(), vec![0xA], &bogus).is_err());
    }

    #[test]
    fn orphan_share_is_rejected() {
        let mut chain = ShareChain::new(0x207f_ffff);
        let parent = Hash256::double_sha256(b"missing");
        let h1 = header(parent, 1);
        let dividend = chain.expected_dividend(parent, vec![0xA]);
        assert!(matches!(
            chain.insert(&h1, parent, vec![0xA], &dividend),
            Err(CoinError::OrphanBlock(_))
        ));
    }

    #[test]
    fn share_missing_its_relaxed_target_is_rejected() {
        let mut chain = ShareChain::new(0x0300_0001);
        let h1 = header(Hash256::zero(), 1);
        let dividend = chain.expected_dividend(Hash256::zero(), vec![0xA]);
        assert!(matches!(
            chain.insert(&h1, Hash256::zero(), vec![0xA], &dividend),
            Err(CoinError::InvalidProofOfWork(_))
        ));
    }
}
