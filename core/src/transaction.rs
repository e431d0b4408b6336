//! Transaction model: inputs, outputs, legacy wire serialization, and the
//! SIGHASH digest construction consumed by the script evaluator.

use crate::encoding::{read_var_bytes, read_varint, write_var_bytes, write_varint};
use coin_primitives::hash::Hash256;
use coin_primitives::types::{Amount, OutPoint, OutputIndex};
use serde::{Deserialize, Serialize};

pub const SIGHASH_ALL: u8 = 1;
pub const SIGHASH_NONE: u8 = 2;
pub const SIGHASH_SINGLE: u8 = 3;
pub const SIGHASH_ANYONECANPAY: u8 = 0x80;

/// An input spending a previous transaction's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub previous_output: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

impl TxInput {
    #[must_use]
    pub const fn new(previous_output: OutPoint, script_sig: Vec<u8>, sequence: u32) -> Self {
        Self {
            previous_output,
            script_sig,
            sequence,
        }
    }

    #[must_use]
    pub const fn coinbase(script_sig: Vec<u8>) -> Self {
        Self {
            previous_output: OutPoint::coinbase(),
            script_sig,
            sequence: 0xFFFF_FFFF,
        }
    }

    #[must_use]
    pub fn is_coinbase(&self) -> bool {
        self.previous_output.is_coinbase()
    }

    fn serialize(&self, out: &mut Vec<u8>, script_override: Option<&[u8]>) {
        out.extend_from_slice(self.previous_output.txid.as_bytes());
        out.extend_from_slice(&self.previous_output.vout.to_le_bytes());
        write_var_bytes(out, script_override.unwrap_or(&self.script_sig));
        out.extend_from_slice(&self.sequence.to_le_bytes());
    }

    fn deserialize(data: &[u8], pos: &mut usize) -> Option<Self> {
        let txid_bytes: [u8; 32] = data.get(*pos..*pos + 32)?.try_into().ok()?;
        *pos += 32;
        let vout = u32::from_le_bytes(data.get(*pos..*pos + 4)?.try_into().ok()?);
        *pos += 4;
        let script_sig = read_var_bytes(data, pos)?;
        let sequence = u32::from_le_bytes(data.get(*pos..*pos + 4)?.try_into().ok()?);
        *pos += 4;
        Some(Self {
            previous_output: OutPoint::new(Hash256::from_bytes(txid_bytes), vout),
            script_sig,
            sequence,
        })
    }
}

/// An output: a value and the script that must be satisfied to spend it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: Amount,
    pub script_pubkey: Vec<u8>,
}

impl TxOutput {
    #[must_use]
    pub const fn new(value: Amount, script_pubkey: Vec<u8>) -> Self {
        Self {
            value,
            script_pubkey,
        }
    }

    fn serialize(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.value.to_le_bytes());
        write_var_bytes(out, &self.script_pubkey);
    }

    fn deserialize(data: &[u8], pos: &mut usize) -> Option<Self> {
        let value = Amount::from_le_bytes(data.get(*pos..*pos + 8)?.try_into().ok()?);
        *pos += 8;
        let script_pubkey = read_var_bytes(data, pos)?;
        Some(Self {
            value,
            script_pubkey,
        })
    }
}

/// A legacy (pre-segwit) Bitcoin-family transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u32,
}

impl Transaction {
    #[must_use]
    pub const fn new(
        version: i32,
        inputs: Vec<TxInput>,
        outputs: Vec<TxOutput>,
        lock_time: u32,
    ) -> Self {
        Self {
            version,
            inputs,
            outputs,
            lock_time,
        }
    }

    #[must_use]
    pub fn coinbase(script_sig: Vec<u8>, reward: Amount, reward_script: Vec<u8>) -> Self {
        Self {
            version: 1,
            inputs: vec![TxInput::coinbase(script_sig)],
            outputs: vec![TxOutput::new(reward, reward_script)],
            lock_time: 0,
        }
    }

    #[must_use]
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase()
    }

    /// Canonical legacy wire encoding.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.version.to_le_bytes());
        write_varint(&mut out, self.inputs.len() as u64);
        for input in &self.inputs {
            input.serialize(&mut out, None);
        }
        write_varint(&mut out, self.outputs.len() as u64);
        for output in &self.outputs {
            output.serialize(&mut out);
        }
        out.extend_from_slice(&self.lock_time.to_le_bytes());
        out
    }

    #[must_use]
    pub fn deserialize(data: &[u8]) -> Option<Self> {
        let mut pos = 0;
        let version = i32::from_le_bytes(data.get(pos..pos + 4)?.try_into().ok()?);
        pos += 4;
        let input_count = read_varint(data, &mut pos)?;
        let mut inputs = Vec::with_capacity(input_count as usize);
        for _ in 0..input_count {
            inputs.push(TxInput::deserialize(data, &mut pos)?);
        }
        let output_count = read_varint(data, &mut pos)?;
        let mut outputs = Vec::with_capacity(output_count as usize);
        for _ in 0..output_count {
            outputs.push(TxOutput::deserialize(data, &mut pos)?);
        }
        let lock_time = u32::from_le_bytes(data.get(pos..pos + 4)?.try_into().ok()?);
        Some(Self {
            version,
            inputs,
            outputs,
            lock_time,
        })
    }

    #[must_use]
    pub fn hash(&self) -> Hash256 {
        Hash256::double_sha256(&self.serialize())
    }

    #[must_use]
    pub fn estimated_size(&self) -> usize {
        self.serialize().len()
    }

    #[must_use]
    pub fn total_output_value(&self) -> Amount {
        self.outputs.iter().map(|o| o.value).sum()
    }

    /// Builds the legacy SIGHASH digest for `input_index`, substituting
    /// `sub_script` (the previous output's script, with `OP_CODESEPARATOR`
    /// segments before the last one removed by the caller) as that input's
    /// scriptSig and blanking all others, per the SIGHASH flags in
    /// `hash_type`.
    #[must_use]
    pub fn signature_hash(
        &self,
        input_index: usize,
        sub_script: &[u8],
        hash_type: u8,
    ) -> Hash256 {
        let anyone_can_pay = hash_type & SIGHASH_ANYONECANPAY != 0;
        let base_type = hash_type & 0x1f;

        let mut inputs: Vec<TxInput> = if anyone_can_pay {
            vec![TxInput {
                previous_output: self.inputs[input_index].previous_output,
                script_sig: sub_script.to_vec(),
                sequence: self.inputs[input_index].sequence,
            }]
        } else {
            self.inputs
                .iter()
                .enumerate()
                .map(|(i, inp)| TxInput {
                    previous_output: inp.previous_output,
                    script_sig: if i == input_index {
                        sub_script.to_vec()
                    } else {
                        Vec::new()
                    },
                    sequence: if i != input_index
                        && (base_type == SIGHASH_NONE || base_type == SIGHASH_SINGLE)
                    {
                        0
                    } else {
                        inp.sequence
                    },
                })
                .collect()
        };

        let outputs = match base_type {
            SIGHASH_NONE => Vec::new(),
            SIGHASH_SINGLE => {
                if input_index >= self.outputs.len() {
                    // matches the historic "one" sentinel digest for the
                    // out-of-range SIGHASH_SINGLE case
                    return Hash256::from_bytes({
                        let mut b = [0u8; 32];
                        b[0] = 1;
                        b
                    });
                }
                let mut padded: Vec<TxOutput> = (0..=input_index)
                    .map(|i| {
                        if i == input_index {
                            self.outputs[i].clone()
                        } else {
                            TxOutput {
                                value: -1,
                                script_pubkey: Vec::new(),
                            }
                        }
                    })
                    .collect();
                padded.truncate(input_index + 1);
                padded
            }
            _ => self.outputs.clone(),
        };

        if anyone_can_pay {
            // inputs already reduced to the single signed input above
        } else if base_type == SIGHASH_NONE || base_type == SIGHASH_SINGLE {
            // sequence numbers of other inputs already zeroed above
        }
        let _ = &mut inputs;

        let stripped = Transaction {
            version: self.version,
            inputs,
            outputs,
            lock_time: self.lock_time,
        };
        let mut bytes = stripped.serialize();
        bytes.extend_from_slice(&(hash_type as u32).to_le_bytes());
        Hash256::double_sha256(&bytes)
    }

    /// Basic shape validation: at least one input and output (coinbase input
    /// excepted), value sanity, and consensus transaction/script size caps.
    pub fn validate_basic(&self) -> Result<(), String> {
        if self.inputs.is_empty() {
            return Err("transaction has no inputs".into());
        }
        if self.outputs.is_empty() {
            return Err("transaction has no outputs".into());
        }
        if !self.is_coinbase() {
            for input in &self.inputs {
                if input.is_coinbase() {
                    return Err("non-coinbase transaction has a coinbase-shaped input".into());
                }
            }
        }
        for output in &self.outputs {
            if output.value < 0 {
                return Err("negative output value".into());
            }
        }
        if self.is_coinbase() {
            let script_len = self.inputs[0].script_sig.len();
            if !(2..=100).contains(&script_len) {
                return Err(format!(
                    "coinbase scriptSig length {script_len} out of [2,100]"
                ));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn create_p2pkh_script(pubkey_hash: &coin_primitives::hash::Hash160) -> Vec<u8> {
        crate::script::ScriptBuilder::new()
            .push_opcode(crate::script::OpCode::OpDup)
            .push_opcode(crate::script::OpCode::OpHash160)
            .push_data(pubkey_hash.as_bytes())
            .push_opcode(crate::script::OpCode::OpEqualVerify)
            .push_opcode(crate::script::OpCode::OpCheckSig)
            .build()
    }

    #[must_use]
    pub fn create_p2pkh_unlock_script(signature: &[u8], public_key: &[u8]) -> Vec<u8> {
        crate::script::ScriptBuilder::new()
            .push_data(signature)
            .push_data(public_key)
            .build()
    }
}

#[must_use]
pub fn outpoint_vout(index: usize) -> OutputIndex {
    index as OutputIndex
}

#[cfg(test)]
mod tests {
    use super::*;
    use coin_primitives::hash::Hash160;

    fn sample_tx() -> Transaction {
        let prev = OutPoint::new(Hash256::double_sha256(b"prev-tx"), 0);
        let input = TxInput::new(prev, vec![], 0xFFFF_FFFF);
        let output = TxOutput::new(5_000_000_000, Transaction::create_p2pkh_script(&Hash160::hash160(b"pk")));
        Transaction::new(1, vec![input], vec![output], 0)
    }

    #[test]
    fn coinbase_transaction_is_recognised() {
        let tx = Transaction::coinbase(vec![0u8; 4], 5_000_000_000, vec![]);
        assert!(tx.is_coinbase());
    }

    #[test]
    fn hash_is_deterministic() {
        let tx = sample_tx();
        assert_eq!(tx.hash(), tx.hash());
    }

    #[test]
    fn serialize_deserialize_round_trips() {
        let tx = sample_tx();
        let bytes = tx.serialize();
        let back = Transaction::deserialize(&bytes).unwrap();
        assert_eq!(tx, back);
    }

    #[test]
    fn sighash_all_changes_when_output_mutated() {
        let tx = sample_tx();
        let sub_script = Transaction::create_p2pkh_script(&Hash160::hash160(b"pk"));
        let digest = tx.signature_hash(0, &sub_script, SIGHASH_ALL);

        let mut mutated = tx.clone();
        mutated.outputs[0].value += 1;
        let mutated_digest = mutated.signature_hash(0, &sub_script, SIGHASH_ALL);
        assert_ne!(digest, mutated_digest);
    }

    #[test]
    fn sighash_single_ignores_other_outputs() {
        let prev = OutPoint::new(Hash256::double_sha256(b"prev-tx"), 0);
        let input = TxInput::new(prev, vec![], 0xFFFF_FFFF);
        let out0 = TxOutput::new(1, vec![1]);
        let out1 = TxOutput::new(2, vec![2]);
        let tx_a = Transaction::new(1, vec![input.clone()], vec![out0.clone(), out1.clone()], 0);
        let tx_b = Transaction::new(1, vec![input], vec![out0, TxOutput::new(999, vec![9])], 0);

        let sub_script = vec![];
        let digest_a = tx_a.signature_hash(0, &sub_script, SIGHASH_SINGLE);
        let digest_b = tx_b.signature_hash(0, &sub_script, SIGHASH_SINGLE);
        assert_eq!(digest_a, digest_b);
    }

    #[test]
    fn validate_basic_rejects_empty_inputs() {
        let tx = Transaction::new(1, vec![], vec![TxOutput::new(1, vec![])], 0);
        assert!(tx.validate_basic().is_err());
    }

    #[test]
    fn validate_basic_rejects_negative_output() {
        let prev = OutPoint::new(Hash256::double_sha256(b"x"), 0);
        let tx = Transaction::new(
            1,
            vec![TxInput::new(prev, vec![], 0)],
            vec![TxOutput::new(-1, vec![])],
            0,
        );
        assert!(tx.validate_basic().is_err());
    }
}
