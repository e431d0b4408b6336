use thiserror::Error;

/// Errors surfaced by the hashing, key, and address primitives.
#[derive(Error, Debug)]
pub enum PrimitivesError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),
}
