//! Base58Check-encoded chain addresses (`ChainAddress`), version-byte keyed
//! so each currency in the family can reuse the same encode/decode logic.

use crate::error::PrimitivesError;
use crate::hash::Hash160;
use std::fmt;

/// What a `ChainAddress`'s payload hash identifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    PubKeyHash,
    ScriptHash,
}

/// A Base58Check-encoded address: one version byte followed by a 20-byte hash
/// and a 4-byte checksum, as used across the whole Bitcoin chain family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainAddress {
    version: u8,
    hash: Hash160,
    kind: AddressKind,
}

impl ChainAddress {
    #[must_use]
    pub const fn new(version: u8, hash: Hash160, kind: AddressKind) -> Self {
        Self { version, hash, kind }
    }

    #[must_use]
    pub const fn version(&self) -> u8 {
        self.version
    }

    #[must_use]
    pub const fn hash(&self) -> Hash160 {
        self.hash
    }

    #[must_use]
    pub const fn kind(&self) -> AddressKind {
        self.kind
    }

    /// Decodes a Base58Check string against the caller-supplied version bytes
    /// for pubkey-hash and script-hash addresses respectively.
    ///
    /// # Errors
    /// Returns an error if the string is not valid Base58Check, has the wrong
    /// payload length, or uses a version byte belonging to neither kind.
    pub fn decode(
        s: &str,
        pubkey_hash_version: u8,
        script_hash_version: u8,
    ) -> Result<Self, PrimitivesError> {
        let payload =
            bs58::decode(s).with_check(None).into_vec().map_err(|e| {
                PrimitivesError::InvalidAddress(format!("base58check decode failed: {e}"))
            })?;
        if payload.is_empty() {
            return Err(PrimitivesError::InvalidAddress("empty payload".into()));
        }
        let version = payload[0];
        let body = &payload[1..];
        if body.len() != 20 {
            return Err(PrimitivesError::InvalidAddress(format!(
                "expected 20-byte hash, got {}",
                body.len()
            )));
        }
        let kind = if version == pubkey_hash_version {
            AddressKind::PubKeyHash
        } else if version == script_hash_version {
            AddressKind::ScriptHash
        } else {
            return Err(PrimitivesError::InvalidAddress(format!(
                "unrecognised version byte 0x{version:02x}"
            )));
        };
        let mut hash = [0u8; 20];
        hash.copy_from_slice(body);
        Ok(Self::new(version, Hash160::from_bytes(hash), kind))
    }

    #[must_use]
    pub fn encode(&self) -> String {
        let mut payload = Vec::with_capacity(21);
        payload.push(self.version);
        payload.extend_from_slice(self.hash.as_bytes());
        bs58::encode(payload).with_check().into_string()
    }
}

impl fmt::Display for ChainAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrips() {
        let hash = Hash160::hash160(b"some pubkey");
        let addr = ChainAddress::new(0x00, hash, AddressKind::PubKeyHash);
        let encoded = addr.encode();
        let decoded = ChainAddress::decode(&encoded, 0x00, 0x05).unwrap();
        assert_eq!(decoded, addr);
    }

    #[test]
    fn wrong_version_byte_is_rejected() {
        let hash = Hash160::hash160(b"some pubkey");
        let addr = ChainAddress::new(0x6f, hash, AddressKind::PubKeyHash);
        let encoded = addr.encode();
        assert!(ChainAddress::decode(&encoded, 0x00, 0x05).is_err());
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let hash = Hash160::hash160(b"some pubkey");
        let addr = ChainAddress::new(0x00, hash, AddressKind::PubKeyHash);
        let mut encoded = addr.encode();
        encoded.push('x');
        assert!(ChainAddress::decode(&encoded, 0x00, 0x05).is_err());
    }
}
