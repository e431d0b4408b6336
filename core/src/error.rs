use thiserror::Error;

/// Errors produced by the consensus kernel: wire decoding, script
/// evaluation, transaction and block validation, persistence, and
/// chain-state lookups. Variants roughly mirror the original node's reject
/// codes so a caller at the network edge can map one onto a wire `reject`
/// message without re-deriving the reason from a string.
#[derive(Debug, Clone, Error)]
pub enum CoinError {
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("unknown block: {0}")]
    UnknownBlock(String),

    #[error("unknown transaction: {0}")]
    UnknownTx(String),

    #[error("orphan block: {0}")]
    OrphanBlock(String),

    #[error("invalid proof of work: {0}")]
    InvalidProofOfWork(String),

    #[error("script error: {0}")]
    Script(String),

    #[error("invalid script: {0}")]
    InvalidScript(String),

    #[error("double spend: {0}")]
    DoubleSpend(String),

    #[error("duplicate coin: {0}")]
    DuplicateCoin(String),

    #[error("immature coinbase: {0}")]
    ImmatureCoinbase(String),

    #[error("value out of range: {0}")]
    ValueOutOfRange(String),

    #[error("fee below minimum: {0}")]
    FeeBelowMinimum(String),

    #[error("checkpoint violation: {0}")]
    CheckpointViolation(String),

    #[error("version policy violation: {0}")]
    VersionPolicyViolation(String),

    #[error("name rule violation: {0}")]
    NameRuleViolation(String),

    #[error("transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("invalid block: {0}")]
    InvalidBlock(String),

    #[error("cryptographic error: {0}")]
    Crypto(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    StorageError(String),

    /// Rejected but otherwise harmless: the message or block is invalid and
    /// should be dropped, but nothing else need happen.
    #[error("rejected: {0}")]
    Reject(String),

    /// A condition the node cannot safely continue past (e.g. more than
    /// three candidate blocks rejected in a row against the active tip).
    /// Callers at the node layer should treat this as cause to halt.
    #[error("fatal: {0}")]
    Fatal(String),

    #[error("{0}")]
    Other(String),
}

impl From<coin_primitives::PrimitivesError> for CoinError {
    fn from(err: coin_primitives::PrimitivesError) -> Self {
        CoinError::Crypto(err.to_string())
    }
}

pub type CoinResult<T> = std::result::Result<T, CoinError>;
