//! Namecoin's name system: a small key/value registry layered on top of
//! otherwise-ordinary transaction outputs. A name operation is encoded as
//! a handful of opcodes prefixed onto the real `scriptPubKey`
//! (`OP_NAME_NEW`/`OP_NAME_FIRSTUPDATE`/`OP_NAME_UPDATE` followed by their
//! pushed operands, then `OP_DROP` back down to the normal redemption
//! script), mirroring the original node's `NameOperation` parsing. Only
//! chains with `ChainParams::adhere_names() == true` ever look at this.

use crate::error::{CoinError, CoinResult};
use coin_primitives::types::BlockHeight;
use std::collections::HashMap;

/// The three name operations Namecoin's consensus rules recognise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameOp {
    /// Commits to `hash160(name || rand)` without revealing `name` yet,
    /// defeating front-running of the following `FirstUpdate`.
    New { commitment: Vec<u8> },
    /// Reveals `name` and `rand` matching an earlier `New`'s commitment and
    /// registers `value` as the name's content.
    FirstUpdate {
        name: Vec<u8>,
        rand: Vec<u8>,
        value: Vec<u8>,
    },
    /// Updates the content of an already-registered, unexpired `name`.
    Update { name: Vec<u8>, value: Vec<u8> },
}

impl NameOp {
    #[must_use]
    pub fn name(&self) -> Option<&[u8]> {
        match self {
            NameOp::New { .. } => None,
            NameOp::FirstUpdate { name, .. } | NameOp::Update { name, .. } => Some(name),
        }
    }
}

const OP_NAME_NEW: u8 = 0xd1;
const OP_NAME_FIRSTUPDATE: u8 = 0xd2;
const OP_NAME_UPDATE: u8 = 0xd3;

/// Reads one length-prefixed push (opcodes `0x01..=0x4b` only — the small
/// pushes a name operation's operands actually use) from `script` at
/// `pos`, returning the pushed bytes and the position just past them.
fn read_push(script: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let len = *script.get(pos)? as usize;
    if len == 0 || len > 0x4b {
        return None;
    }
    let start = pos + 1;
    let end = start + len;
    let bytes = script.get(start..end)?;
    Some((bytes, end))
}

/// Parses a leading name operation off `script_pubkey`, returning the
/// operation and the remainder of the script (the actual redemption
/// template, after the terminating `OP_DROP`/`OP_2DROP`). Returns `None`
/// for a script with no name-operation prefix at all — the common case for
/// every non-Namecoin chain and for ordinary Namecoin payments.
#[must_use]
pub fn parse_name_script(script_pubkey: &[u8]) -> Option<(NameOp, &[u8])> {
    const OP_DROP: u8 = 0x75;
    const OP_2DROP: u8 = 0x6d;

    let opcode = *script_pubkey.first()?;
    match opcode {
        OP_NAME_NEW => {
            let (commitment, pos) = read_push(script_pubkey, 1)?;
            let pos = expect_drop(script_pubkey, pos, OP_DROP)?;
            Some((
                NameOp::New {
                    commitment: commitment.to_vec(),
                },
                &script_pubkey[pos..],
            ))
        }
        OP_NAME_FIRSTUPDATE => {
            let (name, pos) = read_push(script_pubkey, 1)?;
            let (rand, pos) = read_push(script_pubkey, pos)?;
            let (value, pos) = read_push(script_pubkey, pos)?;
            let pos = expect_drop(script_pubkey, pos, OP_2DROP)?;
            Some((
                NameOp::FirstUpdate {
                    name: name.to_vec(),
                    rand: rand.to_vec(),
                    value: value.to_vec(),
                },
                &script_pubkey[pos..],
            ))
        }
        OP_NAME_UPDATE => {
            let (name, pos) = read_push(script_pubkey, 1)?;
            let (value, pos) = read_push(script_pubkey, pos)?;
            let pos = expect_drop(script_pubkey, pos, OP_DROP)?;
            Some((
                NameOp::Update {
                    name: name.to_vec(),
                    value: value.to_vec(),
                },
                &script_pubkey[pos..],
            ))
        }
        _ => None,
    }
}

fn expect_drop(script: &[u8], pos: usize, drop_opcode: u8) -> Option<usize> {
    if *script.get(pos)? == drop_opcode {
        Some(pos + 1)
    } else {
        None
    }
}

#[derive(Debug, Clone)]
struct NameRecord {
    value: Vec<u8>,
    registered_at: BlockHeight,
}

/// The live name→value registry (Namecoin chains only), plus the set of
/// outstanding `name_new` commitments waiting on their `name_firstupdate`.
#[derive(Debug, Clone, Default)]
pub struct NameState {
    names: HashMap<Vec<u8>, NameRecord>,
    /// Every commitment hash ever submitted via `name_new`, with the height
    /// it was submitted at (a `name_firstupdate` must reveal a commitment
    /// already on chain, and the original node never lets a commitment be
    /// reused once revealed).
    commitments: HashMap<Vec<u8>, BlockHeight>,
}

impl NameState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_expired(&self, name: &[u8], height: BlockHeight, expiration_depth: i64) -> bool {
        match self.names.get(name) {
            Some(record) => {
                (height as i64) - (record.registered_at as i64) >= expiration_depth
            }
            None => true,
        }
    }

    /// Validates and (on success) applies `op` at `height`. `expiration_depth`
    /// is the chain's `expiration_depth(height)` evaluated by the caller, so
    /// this module stays ignorant of the height-dependent schedule itself
    /// (spec Open Question (c): the exact coefficients are cross-checked
    /// against chain parameters, not re-derived here).
    pub fn apply(&mut self, op: &NameOp, height: BlockHeight, expiration_depth: i64) -> CoinResult<()> {
        match op {
            NameOp::New { commitment } => {
                if self.commitments.contains_key(commitment) {
                    return Err(CoinError::NameRuleViolation(
                        "name_new commitment already submitted".into(),
                    ));
                }
                self.commitments.insert(commitment.clone(), height);
                Ok(())
            }
            NameOp::FirstUpdate { name, rand, value } => {
                let commitment = commitment_hash(name, rand);
                if !self.commitments.contains_key(&commitment) {
                    return Err(CoinError::NameRuleViolation(
                        "name_firstupdate reveals an unknown commitment".into(),
                    ));
                }
                if !self.is_expired(name, height, expiration_depth) {
                    return Err(CoinError::NameRuleViolation(format!(
                        "name {} is already registered and unexpired",
                        String::from_utf8_lossy(name)
                    )));
                }
                self.commitments.remove(&commitment);
                self.names.insert(
                    name.clone(),
                    NameRecord {
                        value: value.clone(),
                        registered_at: height,
                    },
                );
                Ok(())
            }
            NameOp::Update { name, value } => {
                if self.is_expired(name, height, expiration_depth) {
                    return Err(CoinError::NameRuleViolation(format!(
                        "name {} is unregistered or expired",
                        String::from_utf8_lossy(name)
                    )));
                }
                self.names.insert(
                    name.clone(),
                    NameRecord {
                        value: value.clone(),
                        registered_at: height,
                    },
                );
                Ok(())
            }
        }
    }

    #[must_use]
    pub fn value_of(&self, name: &[u8]) -> Option<&[u8]> {
        self.names.get(name).map(|r| r.value.as_slice())
    }
}

fn commitment_hash(name: &[u8], rand: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(name.len() + rand.len());
    buf.extend_from_slice(rand);
    buf.extend_from_slice(name);
    coin_primitives::hash::Hash160::hash160(&buf).as_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(bytes: &[u8]) -> Vec<u8> {
        let mut out = vec![bytes.len() as u8];
        out.extend_from_slice(bytes);
        out
    }

    #[test]
    fn parses_a_name_new_script() {
        let mut script = vec![OP_NAME_NEW];
        script.extend(push(b"commitment-bytes"));
        script.push(0x75); // OP_DROP
        script.extend_from_slice(&[0x76, 0xa9]); // fake redemption template tail
        let (op, rest) = parse_name_script(&script).unwrap();
        assert_eq!(op, NameOp::New { commitment: b"commitment-bytes".to_vec() });
        assert_eq!(rest, &[0x76, 0xa9]);
    }

    #[test]
    fn non_name_script_parses_to_none() {
        assert!(parse_name_script(&[0x76, 0xa9, 0x14]).is_none());
    }

    #[test]
    fn first_update_requires_a_prior_commitment() {
        let mut state = NameState::new();
        let op = NameOp::FirstUpdate {
            name: b"d/example".to_vec(),
            rand: b"salt".to_vec(),
            value: b"1.2.3.4".to_vec(),
        };
        assert!(state.apply(&op, 1000, 12_000).is_err());

        let commitment = commitment_hash(b"d/example", b"salt");
        state.apply(&NameOp::New { commitment }, 900, 12_000).unwrap();
        state.apply(&op, 1000, 12_000).unwrap();
        assert_eq!(state.value_of(b"d/example"), Some(b"1.2.3.4".as_slice()));
    }

    #[test]
    fn update_rejects_an_expired_name() {
        let mut state = NameState::new();
        let commitment = commitment_hash(b"d/example", b"salt");
        state.apply(&NameOp::New { commitment }, 0, 12_000).unwrap();
        state
            .apply(
                &NameOp::FirstUpdate {
                    name: b"d/example".to_vec(),
                    rand: b"salt".to_vec(),
                    value: b"v1".to_vec(),
                },
                0,
                12_000,
            )
            .unwrap();

        let update = NameOp::Update {
            name: b"d/example".to_vec(),
            value: b"v2".to_vec(),
        };
        assert!(state.apply(&update, 5_000, 12_000).is_ok());
        assert!(state.apply(&update, 20_000, 12_000).is_err());
    }

    #[test]
    fn resubmitting_an_outstanding_unrevealed_commitment_is_rejected() {
        let mut state = NameState::new();
        let commitment = commitment_hash(b"d/example", b"salt");
        state.apply(&NameOp::New { commitment: commitment.clone() }, 0, 12_000).unwrap();
        assert!(state.apply(&NameOp::New { commitment }, 1, 12_000).is_err());
    }
}
