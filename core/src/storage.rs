//! SQL-backed persistence for blocks, transactions, and the UTXO set,
//! mirroring the original node's `Database` abstraction: blocks keyed by
//! hash, unspents keyed by outpoint, and the `Confirmations`/`Spendings`
//! tables that carry a coin's lifecycle (`src/coinChain/BlockChain.cpp`'s
//! schema) rather than a hand-rolled table format. Built on `rusqlite`
//! rather than the original's direct SQLite calls.

use crate::block::Block;
use crate::confirmation::{Confirmation, Spending};
use crate::error::{CoinError, CoinResult};
use crate::utxo::Unspent;
use coin_primitives::hash::Hash256;
use coin_primitives::types::{BlockHeight, OutPoint};
use rusqlite::{params, Connection, OptionalExtension};

/// A handle to the node's on-disk store. One connection per `BlockChain`
/// instance; SQLite serializes writers internally so callers don't need
/// their own locking beyond what `&mut self` already provides.
pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Opens (creating if necessary) a SQLite database at `path`, or an
    /// in-memory database for `":memory:"`, and ensures the schema exists.
    pub fn open(path: &str) -> CoinResult<Self> {
        let conn = Connection::open(path).map_err(|e| CoinError::StorageError(e.to_string()))?;
        let storage = Self { conn };
        storage.init_schema()?;
        Ok(storage)
    }

    fn init_schema(&self) -> CoinResult<()> {
        // best-effort: WAL doesn't apply to an in-memory connection, and a
        // read-only filesystem would make this call fail for no good reason.
        let _ = self.conn.pragma_update(None, "journal_mode", "WAL");
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS blocks (
                    hash        BLOB PRIMARY KEY,
                    height      INTEGER NOT NULL,
                    data        BLOB NOT NULL,
                    on_active   INTEGER NOT NULL DEFAULT 0
                );
                CREATE INDEX IF NOT EXISTS idx_blocks_height ON blocks(height);

                CREATE TABLE IF NOT EXISTS unspents (
                    txid        BLOB NOT NULL,
                    vout        INTEGER NOT NULL,
                    value       INTEGER NOT NULL,
                    script      BLOB NOT NULL,
                    height      INTEGER NOT NULL,
                    is_coinbase INTEGER NOT NULL,
                    ocnf        INTEGER NOT NULL DEFAULT 0,
                    PRIMARY KEY (txid, vout)
                );
                CREATE INDEX IF NOT EXISTS idx_unspents_count_ocnf ON unspents(height, ocnf);

                CREATE TABLE IF NOT EXISTS confirmations (
                    cnf         INTEGER PRIMARY KEY,
                    version     INTEGER NOT NULL,
                    locktime    INTEGER NOT NULL,
                    count       INTEGER NOT NULL,
                    idx         INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_confirmations_count ON confirmations(count);

                CREATE TABLE IF NOT EXISTS spendings (
                    coin        INTEGER PRIMARY KEY AUTOINCREMENT,
                    ocnf        INTEGER NOT NULL,
                    hash        BLOB NOT NULL,
                    idx         INTEGER NOT NULL,
                    value       INTEGER NOT NULL,
                    script      BLOB NOT NULL,
                    signature   BLOB NOT NULL,
                    sequence    INTEGER NOT NULL,
                    iidx        INTEGER NOT NULL,
                    icnf        INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_spendings_icnf ON spendings(icnf);
                CREATE INDEX IF NOT EXISTS idx_spendings_ocnf ON spendings(ocnf);

                CREATE TABLE IF NOT EXISTS auxproofofworks (
                    count       INTEGER NOT NULL,
                    hash        BLOB NOT NULL,
                    data        BLOB NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_aux_count ON auxproofofworks(count);
                CREATE INDEX IF NOT EXISTS idx_aux_hash ON auxproofofworks(hash);

                CREATE TABLE IF NOT EXISTS names (
                    name        BLOB NOT NULL,
                    value       BLOB NOT NULL,
                    count       INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_names_name ON names(name);
                CREATE INDEX IF NOT EXISTS idx_names_count ON names(count);

                CREATE TABLE IF NOT EXISTS chain_tip (
                    id          INTEGER PRIMARY KEY CHECK (id = 0),
                    hash        BLOB NOT NULL
                );
                ",
            )
            .map_err(|e| CoinError::StorageError(e.to_string()))
    }

    pub fn put_block(&self, block: &Block, height: BlockHeight, on_active: bool) -> CoinResult<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO blocks (hash, height, data, on_active) VALUES (?1, ?2, ?3, ?4)",
                params![
                    block.hash().as_bytes().to_vec(),
                    height,
                    block.serialize(),
                    on_active as i64,
                ],
            )
            .map_err(|e| CoinError::StorageError(e.to_string()))?;
        Ok(())
    }

    pub fn get_block(&self, hash: &Hash256) -> CoinResult<Option<Block>> {
        let bytes: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT data FROM blocks WHERE hash = ?1",
                params![hash.as_bytes().to_vec()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| CoinError::StorageError(e.to_string()))?;
        Ok(bytes.and_then(|b| Block::deserialize(&b)))
    }

    pub fn mark_active(&self, hash: &Hash256, active: bool) -> CoinResult<()> {
        self.conn
            .execute(
                "UPDATE blocks SET on_active = ?1 WHERE hash = ?2",
                params![active as i64, hash.as_bytes().to_vec()],
            )
            .map_err(|e| CoinError::StorageError(e.to_string()))?;
        Ok(())
    }

    pub fn set_tip(&self, hash: &Hash256) -> CoinResult<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO chain_tip (id, hash) VALUES (0, ?1)",
                params![hash.as_bytes().to_vec()],
            )
            .map_err(|e| CoinError::StorageError(e.to_string()))?;
        Ok(())
    }

    pub fn get_tip(&self) -> CoinResult<Option<Hash256>> {
        let bytes: Option<Vec<u8>> = self
            .conn
            .query_row("SELECT hash FROM chain_tip WHERE id = 0", [], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|e| CoinError::StorageError(e.to_string()))?;
        Ok(bytes.map(|b| Hash256::from_bytes(b.try_into().unwrap_or([0u8; 32]))))
    }

    pub fn put_unspent(&self, unspent: &Unspent) -> CoinResult<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO unspents (txid, vout, value, script, height, is_coinbase, ocnf)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    unspent.outpoint.txid.as_bytes().to_vec(),
                    unspent.outpoint.vout,
                    unspent.output.value,
                    unspent.output.script_pubkey,
                    unspent.height,
                    unspent.is_coinbase as i64,
                    unspent.ocnf,
                ],
            )
            .map_err(|e| CoinError::StorageError(e.to_string()))?;
        Ok(())
    }

    pub fn delete_unspent(&self, outpoint: &OutPoint) -> CoinResult<()> {
        self.conn
            .execute(
                "DELETE FROM unspents WHERE txid = ?1 AND vout = ?2",
                params![outpoint.txid.as_bytes().to_vec(), outpoint.vout],
            )
            .map_err(|e| CoinError::StorageError(e.to_string()))?;
        Ok(())
    }

    /// Every stored block header's identity, height, and active-chain flag,
    /// ordered by height, for rebuilding the in-memory `BlockTree` on
    /// startup without re-walking `previous_hash` links one block at a time.
    pub fn list_blocks(&self) -> CoinResult<Vec<(Hash256, BlockHeight, bool)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT hash, height, on_active FROM blocks ORDER BY height ASC")
            .map_err(|e| CoinError::StorageError(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                let hash_bytes: Vec<u8> = row.get(0)?;
                let height: u32 = row.get(1)?;
                let on_active: i64 = row.get(2)?;
                Ok((hash_bytes, height, on_active))
            })
            .map_err(|e| CoinError::StorageError(e.to_string()))?;
        let mut out = Vec::new();
        for row in rows {
            let (hash_bytes, height, on_active) =
                row.map_err(|e| CoinError::StorageError(e.to_string()))?;
            let hash = Hash256::from_bytes(hash_bytes.try_into().unwrap_or([0u8; 32]));
            out.push((hash, height, on_active != 0));
        }
        Ok(out)
    }

    /// Opens a storage-level transaction around a block attach/detach
    /// sequence, mirroring the original node's `query("BEGIN --BLOCK")` /
    /// `query("COMMIT --BLOCK")` bracketing so a failed append rolls back
    /// every row it touched along with the in-memory trie snapshot.
    pub fn begin(&self) -> CoinResult<()> {
        self.conn
            .execute_batch("BEGIN")
            .map_err(|e| CoinError::StorageError(e.to_string()))
    }

    pub fn commit(&self) -> CoinResult<()> {
        self.conn
            .execute_batch("COMMIT")
            .map_err(|e| CoinError::StorageError(e.to_string()))
    }

    pub fn rollback(&self) -> CoinResult<()> {
        self.conn
            .execute_batch("ROLLBACK")
            .map_err(|e| CoinError::StorageError(e.to_string()))
    }

    pub fn delete_block(&self, hash: &Hash256) -> CoinResult<()> {
        self.conn
            .execute(
                "DELETE FROM blocks WHERE hash = ?1",
                params![hash.as_bytes().to_vec()],
            )
            .map_err(|e| CoinError::StorageError(e.to_string()))?;
        Ok(())
    }

    pub fn load_unspents(&self) -> CoinResult<Vec<Unspent>> {
        let mut stmt = self
            .conn
            .prepare("SELECT txid, vout, value, script, height, is_coinbase, ocnf FROM unspents")
            .map_err(|e| CoinError::StorageError(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                let txid_bytes: Vec<u8> = row.get(0)?;
                let vout: u32 = row.get(1)?;
                let value: i64 = row.get(2)?;
                let script: Vec<u8> = row.get(3)?;
                let height: u32 = row.get(4)?;
                let is_coinbase: i64 = row.get(5)?;
                let ocnf: i64 = row.get(6)?;
                Ok((txid_bytes, vout, value, script, height, is_coinbase, ocnf))
            })
            .map_err(|e| CoinError::StorageError(e.to_string()))?;

        let mut out = Vec::new();
        for row in rows {
            let (txid_bytes, vout, value, script, height, is_coinbase, ocnf) =
                row.map_err(|e| CoinError::StorageError(e.to_string()))?;
            let txid = Hash256::from_bytes(txid_bytes.try_into().unwrap_or([0u8; 32]));
            out.push(Unspent::new(
                OutPoint::new(txid, vout),
                crate::transaction::TxOutput::new(value, script),
                height,
                is_coinbase != 0,
                ocnf,
            ));
        }
        Ok(out)
    }

    /// Inserts a non-coinbase transaction's confirmation, returning the
    /// store-assigned `cnf`. `count`/`idx` are the block height and the
    /// transaction's position within it, the pair a later detach uses to
    /// recover this same `cnf` without keeping a separate side table.
    pub fn insert_confirmation(
        &self,
        version: i32,
        lock_time: u32,
        count: BlockHeight,
        idx: u32,
    ) -> CoinResult<i64> {
        self.conn
            .execute(
                "INSERT INTO confirmations (version, locktime, count, idx) VALUES (?1, ?2, ?3, ?4)",
                params![version, lock_time, count, idx],
            )
            .map_err(|e| CoinError::StorageError(e.to_string()))?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Inserts (or re-inserts, on re-attach) a coinbase's confirmation under
    /// the `cnf = -count` convention.
    pub fn insert_coinbase_confirmation(
        &self,
        version: i32,
        lock_time: u32,
        count: BlockHeight,
    ) -> CoinResult<i64> {
        let cnf = -(count as i64);
        self.conn
            .execute(
                "INSERT OR REPLACE INTO confirmations (cnf, version, locktime, count, idx) VALUES (?1, ?2, ?3, ?4, 0)",
                params![cnf, version, lock_time, count],
            )
            .map_err(|e| CoinError::StorageError(e.to_string()))?;
        Ok(cnf)
    }

    pub fn delete_confirmation(&self, cnf: i64) -> CoinResult<()> {
        self.conn
            .execute("DELETE FROM confirmations WHERE cnf = ?1", params![cnf])
            .map_err(|e| CoinError::StorageError(e.to_string()))?;
        Ok(())
    }

    pub fn get_confirmation(&self, cnf: i64) -> CoinResult<Option<Confirmation>> {
        self.conn
            .query_row(
                "SELECT cnf, version, locktime, count, idx FROM confirmations WHERE cnf = ?1",
                params![cnf],
                |row| {
                    Ok(Confirmation {
                        cnf: row.get(0)?,
                        version: row.get(1)?,
                        lock_time: row.get(2)?,
                        count: row.get(3)?,
                        index_in_block: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(|e| CoinError::StorageError(e.to_string()))
    }

    /// Recovers a transaction's own `cnf` from the `(count, idx)` pair
    /// assigned when it was confirmed, the lookup a detach performs to find
    /// which `Spendings` rows belong to the transaction it is unwinding.
    pub fn confirmation_cnf_at(&self, count: BlockHeight, idx: u32) -> CoinResult<Option<i64>> {
        self.conn
            .query_row(
                "SELECT cnf FROM confirmations WHERE count = ?1 AND idx = ?2",
                params![count, idx],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| CoinError::StorageError(e.to_string()))
    }

    pub fn insert_spending(&self, spending: &Spending) -> CoinResult<()> {
        self.conn
            .execute(
                "INSERT INTO spendings (ocnf, hash, idx, value, script, signature, sequence, iidx, icnf)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    spending.ocnf,
                    spending.txid.as_bytes().to_vec(),
                    spending.vout,
                    spending.value,
                    spending.script,
                    spending.signature,
                    spending.sequence,
                    spending.input_index,
                    spending.icnf,
                ],
            )
            .map_err(|e| CoinError::StorageError(e.to_string()))?;
        Ok(())
    }

    pub fn spendings_for_icnf(&self, icnf: i64) -> CoinResult<Vec<Spending>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT ocnf, hash, idx, value, script, signature, sequence, iidx, icnf
                 FROM spendings WHERE icnf = ?1",
            )
            .map_err(|e| CoinError::StorageError(e.to_string()))?;
        let rows = stmt
            .query_map(params![icnf], |row| {
                let hash_bytes: Vec<u8> = row.get(1)?;
                Ok(Spending {
                    ocnf: row.get(0)?,
                    txid: Hash256::from_bytes(hash_bytes.try_into().unwrap_or([0u8; 32])),
                    vout: row.get(2)?,
                    value: row.get(3)?,
                    script: row.get(4)?,
                    signature: row.get(5)?,
                    sequence: row.get(6)?,
                    input_index: row.get(7)?,
                    icnf: row.get(8)?,
                })
            })
            .map_err(|e| CoinError::StorageError(e.to_string()))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| CoinError::StorageError(e.to_string()))?);
        }
        Ok(out)
    }

    pub fn delete_spendings_for_icnf(&self, icnf: i64) -> CoinResult<()> {
        self.conn
            .execute("DELETE FROM spendings WHERE icnf = ?1", params![icnf])
            .map_err(|e| CoinError::StorageError(e.to_string()))?;
        Ok(())
    }

    /// Drops every `Spending` whose consuming confirmation is at or below
    /// `depth`, then the `Confirmation`s themselves — the original node's
    /// `setPurgeDepth` two-step delete, run whenever the active chain grows
    /// past an archival node's configured retention window.
    pub fn purge_below(&self, depth: BlockHeight) -> CoinResult<()> {
        self.conn
            .execute(
                "DELETE FROM spendings WHERE icnf IN (SELECT cnf FROM confirmations WHERE count <= ?1)",
                params![depth],
            )
            .map_err(|e| CoinError::StorageError(e.to_string()))?;
        self.conn
            .execute("DELETE FROM confirmations WHERE count <= ?1", params![depth])
            .map_err(|e| CoinError::StorageError(e.to_string()))?;
        Ok(())
    }

    /// Toggles the secondary `(hash, idx)` lookup index over `unspents`.
    /// The table's primary key already enforces this uniqueness regardless;
    /// this only trades the index's maintenance cost for faster point
    /// lookups, the same knob the original node exposes as
    /// `validation_depth == 0`.
    pub fn set_validation_depth_index(&self, enabled: bool) -> CoinResult<()> {
        let sql = if enabled {
            "CREATE INDEX IF NOT EXISTS idx_unspents_hash_idx ON unspents(txid, vout)"
        } else {
            "DROP INDEX IF EXISTS idx_unspents_hash_idx"
        };
        self.conn
            .execute(sql, [])
            .map_err(|e| CoinError::StorageError(e.to_string()))?;
        Ok(())
    }

    /// Toggles the address-balance index over `unspents`/`spendings`
    /// (`script_to_unspents`): off by default, since maintaining it costs a
    /// write per coin for a query pattern most validating nodes never run.
    pub fn set_script_index(&self, enabled: bool) -> CoinResult<()> {
        let sql: &[&str] = if enabled {
            &[
                "CREATE INDEX IF NOT EXISTS idx_unspents_script ON unspents(script)",
                "CREATE INDEX IF NOT EXISTS idx_spendings_script ON spendings(script)",
            ]
        } else {
            &[
                "DROP INDEX IF EXISTS idx_unspents_script",
                "DROP INDEX IF EXISTS idx_spendings_script",
            ]
        };
        for stmt in sql {
            self.conn
                .execute(stmt, [])
                .map_err(|e| CoinError::StorageError(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TxOutput;

    #[test]
    fn block_round_trips_through_storage() {
        let storage = Storage::open(":memory:").unwrap();
        let block = crate::block::genesis::bitcoin_genesis();
        storage.put_block(&block, 0, true).unwrap();
        let loaded = storage.get_block(&block.hash()).unwrap().unwrap();
        assert_eq!(loaded, block);
    }

    #[test]
    fn missing_block_returns_none() {
        let storage = Storage::open(":memory:").unwrap();
        assert!(storage.get_block(&Hash256::zero()).unwrap().is_none());
    }

    #[test]
    fn unspent_round_trips_and_deletes() {
        let storage = Storage::open(":memory:").unwrap();
        let outpoint = OutPoint::new(Hash256::double_sha256(b"tx"), 0);
        let unspent = Unspent::new(outpoint, TxOutput::new(5000, vec![1, 2, 3]), 10, false, 7);
        storage.put_unspent(&unspent).unwrap();
        let loaded = storage.load_unspents().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].ocnf, 7);
        storage.delete_unspent(&outpoint).unwrap();
        assert!(storage.load_unspents().unwrap().is_empty());
    }

    #[test]
    fn list_blocks_reports_height_and_active_flag_in_order() {
        let storage = Storage::open(":memory:").unwrap();
        let genesis = crate::block::genesis::bitcoin_genesis();
        storage.put_block(&genesis, 0, true).unwrap();
        let listed = storage.list_blocks().unwrap();
        assert_eq!(listed, vec![(genesis.hash(), 0, true)]);
    }

    #[test]
    fn chain_tip_round_trips() {
        let storage = Storage::open(":memory:").unwrap();
        let hash = Hash256::double_sha256(b"tip");
        storage.set_tip(&hash).unwrap();
        assert_eq!(storage.get_tip().unwrap(), Some(hash));
    }

    #[test]
    fn confirmation_cnf_is_recoverable_from_count_and_index() {
        let storage = Storage::open(":memory:").unwrap();
        let cnf = storage.insert_confirmation(1, 0, 100, 2).unwrap();
        assert_eq!(storage.confirmation_cnf_at(100, 2).unwrap(), Some(cnf));
        let confirmation = storage.get_confirmation(cnf).unwrap().unwrap();
        assert_eq!(confirmation.count, 100);
        assert!(!confirmation.is_coinbase());
    }

    #[test]
    fn coinbase_confirmation_uses_negative_block_count_as_its_cnf() {
        let storage = Storage::open(":memory:").unwrap();
        let cnf = storage.insert_coinbase_confirmation(1, 0, 250).unwrap();
        assert_eq!(cnf, -250);
        assert!(storage.get_confirmation(cnf).unwrap().unwrap().is_coinbase());
    }

    #[test]
    fn spending_rows_round_trip_by_icnf_and_purge_with_their_confirmation() {
        let storage = Storage::open(":memory:").unwrap();
        let ocnf = storage.insert_coinbase_confirmation(1, 0, 1).unwrap();
        let icnf = storage.insert_confirmation(1, 0, 200, 1).unwrap();
        let spending = Spending {
            ocnf,
            txid: Hash256::double_sha256(b"coinbase-tx"),
            vout: 0,
            value: 5000,
            script: vec![1, 2, 3],
            signature: vec![4, 5],
            sequence: 0xFFFF_FFFF,
            input_index: 0,
            icnf,
        };
        storage.insert_spending(&spending).unwrap();
        assert_eq!(storage.spendings_for_icnf(icnf).unwrap(), vec![spending]);

        storage.purge_below(200).unwrap();
        assert!(storage.spendings_for_icnf(icnf).unwrap().is_empty());
        assert!(storage.get_confirmation(icnf).unwrap().is_none());
    }
}
