use ripemd::Ripemd160;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A 256-bit double-SHA256 digest, used for block, transaction, and merkle hashes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash256([u8; 32]);

impl Hash256 {
    #[must_use]
    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// SHA256(SHA256(data)) — the hash used for block headers, transactions and merkle nodes.
    #[must_use]
    pub fn double_sha256(data: &[u8]) -> Self {
        let first = Sha256::digest(data);
        let second = Sha256::digest(first);
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&second);
        Self(hash)
    }

    /// Interprets both hashes as little-endian 256-bit integers and reports
    /// whether `self` is at or below `target` — the proof-of-work check.
    #[must_use]
    pub fn meets_target(&self, target: &Hash256) -> bool {
        for i in (0..32).rev() {
            if self.0[i] < target.0[i] {
                return true;
            }
            if self.0[i] > target.0[i] {
                return false;
            }
        }
        true
    }

    #[must_use]
    pub fn leading_zero_bits(&self) -> u32 {
        let mut zeros = 0;
        for &byte in self.0.iter().rev() {
            if byte == 0 {
                zeros += 8;
            } else {
                zeros += byte.leading_zeros();
                break;
            }
        }
        zeros
    }

    /// Reversed-byte hex string, matching the conventional block-explorer display order.
    #[must_use]
    pub fn to_hex_rpc(&self) -> String {
        let mut rev = self.0;
        rev.reverse();
        hex::encode(rev)
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex_rpc())
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self.to_hex_rpc())
    }
}

impl TryFrom<&str> for Hash256 {
    type Error = hex::FromHexError;

    fn try_from(hex_str: &str) -> Result<Self, Self::Error> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(hex_str, &mut bytes)?;
        bytes.reverse();
        Ok(Self(bytes))
    }
}

/// A 160-bit RIPEMD160(SHA256(pubkey)) digest — a `PubKeyHash` or `ScriptHash`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash160([u8; 20]);

impl Hash160 {
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    #[must_use]
    pub fn hash160(data: &[u8]) -> Self {
        let sha = Sha256::digest(data);
        let ripemd = Ripemd160::digest(sha);
        let mut out = [0u8; 20];
        out.copy_from_slice(&ripemd);
        Self(out)
    }
}

impl fmt::Display for Hash160 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash160 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash160({})", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_displays_as_64_zero_chars() {
        assert_eq!(Hash256::zero().to_string(), "0".repeat(64));
    }

    #[test]
    fn double_sha256_is_not_single_sha256() {
        let data = b"libcoin";
        let dsha = Hash256::double_sha256(data);
        let single = Sha256::digest(data);
        assert_ne!(dsha.as_bytes().as_slice(), single.as_slice());
    }

    #[test]
    fn meets_target_compares_as_big_integer() {
        let mut low = [0u8; 32];
        low[31] = 0x01;
        let mut high = [0u8; 32];
        high[31] = 0xff;
        let low_hash = Hash256::from_bytes(low);
        let high_hash = Hash256::from_bytes(high);
        assert!(low_hash.meets_target(&high_hash));
        assert!(!high_hash.meets_target(&low_hash));
    }

    #[test]
    fn hash160_matches_known_length() {
        let h = Hash160::hash160(b"some pubkey bytes");
        assert_eq!(h.as_bytes().len(), 20);
    }

    #[test]
    fn hex_roundtrip_preserves_value() {
        let h = Hash256::double_sha256(b"roundtrip");
        let s = h.to_hex_rpc();
        let back = Hash256::try_from(s.as_str()).unwrap();
        assert_eq!(h, back);
    }
}
