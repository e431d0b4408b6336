//! Shared scalar types reused across the consensus kernel and node binary.

use serde::{Deserialize, Serialize};

/// Transaction identifier (double-SHA256 of the canonical transaction encoding).
pub type TxId = crate::Hash256;

/// Block identifier (double-SHA256 of the 80-byte block header).
pub type BlockId = crate::Hash256;

/// A monetary value in the smallest chain unit (satoshis or equivalent).
/// Signed, matching the chains' own `int64_t` amount type, so that
/// intermediate fee/balance arithmetic can go negative before validation
/// rejects it rather than silently wrapping.
pub type Amount = i64;

/// Seconds since the Unix epoch.
pub type Timestamp = i64;

/// Height of a block within its chain, genesis = 0.
pub type BlockHeight = u32;

/// Index of an output within a transaction.
pub type OutputIndex = u32;

/// Index of an input within a transaction.
pub type InputIndex = u32;

/// Reference to a transaction output: `(txid, vout)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: TxId,
    pub vout: OutputIndex,
}

impl OutPoint {
    #[must_use]
    pub const fn new(txid: TxId, vout: OutputIndex) -> Self {
        Self { txid, vout }
    }

    /// The all-zero, max-index outpoint used by coinbase inputs.
    #[must_use]
    pub const fn coinbase() -> Self {
        Self {
            txid: crate::Hash256::zero(),
            vout: u32::MAX,
        }
    }

    #[must_use]
    pub fn is_coinbase(&self) -> bool {
        *self == Self::coinbase()
    }
}

/// Which member of the chain family a node is configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkId {
    Bitcoin,
    Testnet3,
    Namecoin,
    Litecoin,
    Dogecoin,
    Terracoin,
}

impl Default for NetworkId {
    fn default() -> Self {
        Self::Bitcoin
    }
}

/// Node-level configuration: which chain, where to bind, and who to dial first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub network: NetworkId,
    pub p2p_port: u16,
    pub bind_address: String,
    pub bootstrap_peers: Vec<String>,
    pub data_dir: String,
    pub max_peers: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: NetworkId::Bitcoin,
            p2p_port: 8333,
            bind_address: "0.0.0.0".to_string(),
            bootstrap_peers: vec![],
            data_dir: "./data".to_string(),
            max_peers: 125,
        }
    }
}

/// A snapshot of the chain tip and pool state, used for status reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockchainStats {
    pub height: BlockHeight,
    pub tip_hash: BlockId,
    pub total_transactions: u64,
    pub total_unspents: u64,
    pub current_target_bits: u32,
    pub last_block_time: Timestamp,
}

impl Default for BlockchainStats {
    fn default() -> Self {
        Self {
            height: 0,
            tip_hash: crate::Hash256::zero(),
            total_transactions: 0,
            total_unspents: 0,
            current_target_bits: 0x1d00ffff,
            last_block_time: 0,
        }
    }
}

/// Connected-peer bookkeeping surfaced by the node for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerInfo {
    pub peer_id: String,
    pub address: String,
    pub height: BlockHeight,
    pub protocol_version: u32,
    pub last_seen: Timestamp,
    pub connected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outpoint_coinbase_is_recognised() {
        let op = OutPoint::coinbase();
        assert!(op.is_coinbase());
        assert!(!OutPoint::new(crate::Hash256::double_sha256(b"x"), 0).is_coinbase());
    }

    #[test]
    fn node_config_defaults_to_bitcoin_mainnet_port() {
        let config = NodeConfig::default();
        assert_eq!(config.network, NetworkId::Bitcoin);
        assert_eq!(config.p2p_port, 8333);
    }

    #[test]
    fn blockchain_stats_default_is_genesis_height() {
        let stats = BlockchainStats::default();
        assert_eq!(stats.height, 0);
        assert_eq!(stats.total_transactions, 0);
    }
}
