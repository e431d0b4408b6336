//! ECDSA over secp256k1 — transaction signing and verification.

use crate::error::PrimitivesError;
use crate::hash::Hash256;
use secp256k1::ecdsa::Signature as Secp256k1Signature;
use secp256k1::{Message, PublicKey as Secp256k1PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};

/// A secp256k1 public key, SEC1-compressed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "pubkey_bytes")] Secp256k1PublicKey);

mod pubkey_bytes {
    use secp256k1::PublicKey;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(key: &PublicKey, s: S) -> Result<S::Ok, S::Error> {
        key.serialize().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<PublicKey, D::Error> {
        let bytes = <[u8; 33]>::deserialize(d)?;
        PublicKey::from_slice(&bytes).map_err(serde::de::Error::custom)
    }
}

impl PublicKey {
    /// # Errors
    /// Returns an error if `bytes` is not a valid compressed or uncompressed
    /// secp256k1 point encoding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PrimitivesError> {
        Secp256k1PublicKey::from_slice(bytes)
            .map(Self)
            .map_err(|e| PrimitivesError::InvalidKey(e.to_string()))
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; 33] {
        self.0.serialize()
    }

    #[must_use]
    pub fn hash160(&self) -> crate::hash::Hash160 {
        crate::hash::Hash160::hash160(&self.to_bytes())
    }
}

/// A secp256k1 private key.
#[derive(Clone)]
pub struct PrivateKey(SecretKey);

impl PrivateKey {
    /// # Errors
    /// Returns an error if `bytes` is not a valid 32-byte scalar in range.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PrimitivesError> {
        SecretKey::from_slice(bytes)
            .map(Self)
            .map_err(|e| PrimitivesError::InvalidKey(e.to_string()))
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.secret_bytes()
    }

    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        let secp = Secp256k1::new();
        PublicKey(Secp256k1PublicKey::from_secret_key(&secp, &self.0))
    }

    /// Signs a 32-byte transaction-sighash digest.
    ///
    /// # Errors
    /// Kept fallible because `Message::from_digest_slice` is, though it never
    /// fails for a well-formed 32-byte digest.
    pub fn sign(&self, digest: &Hash256) -> Result<Signature, PrimitivesError> {
        let secp = Secp256k1::new();
        let message = Message::from_digest_slice(digest.as_bytes())
            .map_err(|e| PrimitivesError::InvalidKey(e.to_string()))?;
        Ok(Signature(secp.sign_ecdsa(&message, &self.0)))
    }
}

/// A keypair bundling an ECDSA private/public key for transaction signing.
#[derive(Clone)]
pub struct KeyPair {
    pub private_key: PrivateKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    #[must_use]
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let mut rng = rand::thread_rng();
        let (secret_key, public_key) = secp.generate_keypair(&mut rng);
        Self {
            private_key: PrivateKey(secret_key),
            public_key: PublicKey(public_key),
        }
    }

    /// # Errors
    /// Propagates [`PrivateKey::sign`] failures.
    pub fn sign(&self, digest: &Hash256) -> Result<Signature, PrimitivesError> {
        self.private_key.sign(digest)
    }
}

/// A DER-encoded ECDSA signature (the consensus-canonical encoding used in
/// `scriptSig`, with the SIGHASH type byte appended separately by callers).
#[derive(Debug, Clone)]
pub struct Signature(Secp256k1Signature);

impl Signature {
    /// # Errors
    /// Returns an error if `bytes` is not a valid DER ECDSA signature.
    pub fn from_der(bytes: &[u8]) -> Result<Self, PrimitivesError> {
        Secp256k1Signature::from_der(bytes)
            .map(Self)
            .map_err(|e| PrimitivesError::InvalidSignature(e.to_string()))
    }

    #[must_use]
    pub fn to_der(&self) -> Vec<u8> {
        self.0.serialize_der().to_vec()
    }

    /// True if this signature is already in BIP-66 low-S canonical form.
    #[must_use]
    pub fn is_low_s(&self) -> bool {
        let mut normalized = self.0;
        !normalized.normalize_s()
    }

    #[must_use]
    pub fn verify(&self, digest: &Hash256, public_key: &PublicKey) -> bool {
        let secp = Secp256k1::new();
        let Ok(message) = Message::from_digest_slice(digest.as_bytes()) else {
            return false;
        };
        secp.verify_ecdsa(&message, &self.0, &public_key.0).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_succeeds() {
        let keypair = KeyPair::generate();
        let digest = Hash256::double_sha256(b"a transaction to sign");
        let sig = keypair.sign(&digest).unwrap();
        assert!(sig.verify(&digest, &keypair.public_key));
    }

    #[test]
    fn verify_fails_for_wrong_key() {
        let keypair = KeyPair::generate();
        let other = KeyPair::generate();
        let digest = Hash256::double_sha256(b"a transaction to sign");
        let sig = keypair.sign(&digest).unwrap();
        assert!(!sig.verify(&digest, &other.public_key));
    }

    #[test]
    fn verify_fails_for_tampered_digest() {
        let keypair = KeyPair::generate();
        let digest = Hash256::double_sha256(b"original");
        let tampered = Hash256::double_sha256(b"tampered");
        let sig = keypair.sign(&digest).unwrap();
        assert!(!sig.verify(&tampered, &keypair.public_key));
    }

    #[test]
    fn der_roundtrip_preserves_signature() {
        let keypair = KeyPair::generate();
        let digest = Hash256::double_sha256(b"roundtrip");
        let sig = keypair.sign(&digest).unwrap();
        let der = sig.to_der();
        let back = Signature::from_der(&der).unwrap();
        assert!(back.verify(&digest, &keypair.public_key));
    }

    #[test]
    fn public_key_hash160_has_expected_length() {
        let keypair = KeyPair::generate();
        assert_eq!(keypair.public_key.hash160().as_bytes().len(), 20);
    }
}
