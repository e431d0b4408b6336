//! The consensus kernel: block and transaction model, script evaluation,
//! the sparse block tree, the authenticated UTXO trie, the claims pool, and
//! the `BlockChain` engine that ties them together over a SQLite-backed
//! store. Everything a node's network and RPC layers need to validate and
//! serve chain state lives here, independent of how bytes reach the wire.

pub mod block;
pub mod block_tree;
pub mod blockchain;
pub mod chain;
pub mod claims;
pub mod confirmation;
pub mod encoding;
pub mod error;
pub mod merkle_trie;
pub mod mining;
pub mod names;
pub mod script;
pub mod share;
pub mod storage;
pub mod target;
pub mod transaction;
pub mod utxo;

pub use block::{merkle_root, Block, BlockHeader};
pub use block_tree::{BlockLocator, BlockRef, BlockTree, Changes};
pub use blockchain::{AppendOutcome, BlockChain};
pub use chain::{params_for, ChainKind, ChainParams};
pub use claims::{ClaimedTx, ClaimsPool};
pub use confirmation::{Confirmation, Spending};
pub use error::{CoinError, CoinResult};
pub use merkle_trie::{key_for_outpoint, MerkleBranch, MerkleTrie, Key as TrieKey};
pub use mining::{build_template, BlockTemplate, PayeeShare};
pub use names::{parse_name_script, NameOp, NameState};
pub use script::{verify_script, OpCode, ScriptBuilder, ScriptContext, ScriptVm};
pub use share::{ShareChain, ShareEntry};
pub use storage::Storage;
pub use transaction::{Transaction, TxInput, TxOutput};
pub use utxo::{Unspent, UtxoSet};
