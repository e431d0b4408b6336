//! The `Confirmation`/`Spending` records that give a coin's lifecycle a
//! durable identity beyond the flat UTXO set: every transaction that lands
//! in a block gets a `Confirmation` (a coinbase's is tagged `cnf =
//! -block-count`, so the sign alone says what created it), and every input
//! it redeems moves the coin it consumed into a `Spending` row carrying
//! enough of the original output to restore it verbatim if the block is
//! ever detached. Mirrors the original node's `BlockChain::postTransaction`
//! bookkeeping (`src/coinChain/BlockChain.cpp`), rather than `blockchain`'s
//! own in-memory `UtxoSet`/`MerkleTrie`.

use coin_primitives::hash::Hash256;
use coin_primitives::types::{Amount, BlockHeight};

/// One transaction's confirmation: which block it landed in, at what index,
/// and the handful of header fields (`version`, `lock_time`) that travel
/// with it. A coinbase's `cnf` is always `-block_count` (`count` is then
/// recoverable from the confirmation id alone without a lookup); every
/// other transaction gets a store-assigned, auto-incremented `cnf`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub cnf: i64,
    pub version: i32,
    pub lock_time: u32,
    pub count: BlockHeight,
    pub index_in_block: u32,
}

impl Confirmation {
    #[must_use]
    pub fn is_coinbase(&self) -> bool {
        self.cnf < 0
    }
}

/// A coin that has been redeemed: what it was worth before it was spent,
/// plus the witness (`signature`, `sequence`, `input_index`) the spending
/// transaction produced. `ocnf` names the confirmation that introduced the
/// coin, `icnf` the confirmation that consumed it — together they let a
/// detach restore the coin without re-deriving it from the parent
/// transaction on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spending {
    pub ocnf: i64,
    pub txid: Hash256,
    pub vout: u32,
    pub value: Amount,
    pub script: Vec<u8>,
    pub signature: Vec<u8>,
    pub sequence: u32,
    pub input_index: u32,
    pub icnf: i64,
}
