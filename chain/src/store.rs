//! The append-only chain store: block lookup by hash, the `"lh"` tip
//! pointer, forging new blocks, and accepting blocks received from peers.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use sole_consensus::{self as consensus, ConsensusError, ConsensusParams};
use sole_core::{Block, BlockError, Hash, Transaction, TxError};

/// Key under which the tip block hash is stored.
pub const TIP_KEY: &[u8] = b"lh";

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("a chain store already exists at this path")]
    AlreadyExists,

    #[error("no chain store found at this path")]
    NotFound,

    #[error("block {0} not found")]
    BlockNotFound(String),

    #[error("transaction {0} not found")]
    TransactionNotFound(String),

    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    #[error(transparent)]
    Tx(#[from] TxError),

    #[error(transparent)]
    Block(#[from] BlockError),

    #[error("key-value store error: {0}")]
    Store(#[from] sled::Error),

    #[error("store corruption: {0}")]
    Corruption(String),
}

impl ChainError {
    /// True only for the class of error the store cannot recover from by
    /// itself. Every other variant is expected to be caught, logged, and
    /// retried by its caller; this one is not.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ChainError::Corruption(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub data_dir: PathBuf,
}

impl Default for ChainConfig {
    fn default() -> Self {
        ChainConfig {
            data_dir: PathBuf::from("sole-data/chaindata"),
        }
    }
}

/// What happened when a block arriving from a peer was offered to the
/// chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptOutcome {
    Added,
    Duplicate,
    Rejected,
}

/// The ledger's append-only block store, backed by a single `sled::Db`.
/// `forge` is serialized by `forge_lock` so two callers in the same
/// process never race to extend the tip; `sled`'s own file lock keeps two
/// processes from opening the same path read-write at once.
pub struct Chain {
    db: sled::Db,
    params: ConsensusParams,
    forge_lock: Mutex<()>,
}

impl Chain {
    /// Creates a fresh store at `path`, appends the genesis block, and
    /// points `"lh"` at it. Fails if a store already exists there.
    pub fn init(path: impl AsRef<Path>, params: ConsensusParams) -> Result<Self, ChainError> {
        let path = path.as_ref();
        if path.exists() && path.read_dir().map(|mut d| d.next().is_some()).unwrap_or(false) {
            return Err(ChainError::AlreadyExists);
        }
        let db = sled::open(path)?;
        if db.get(TIP_KEY)?.is_some() {
            return Err(ChainError::AlreadyExists);
        }
        let genesis = consensus::build_genesis(&params)?;
        let bytes = genesis.serialize()?;
        db.transaction(|tx| {
            tx.insert(genesis.hash.as_slice(), bytes.clone())?;
            tx.insert(TIP_KEY, genesis.hash.as_slice())?;
            Ok::<_, sled::transaction::ConflictableTransactionError<std::convert::Infallible>>(())
        })
        .map_err(|e| ChainError::Corruption(e.to_string()))?;
        db.flush()?;
        Ok(Chain {
            db,
            params,
            forge_lock: Mutex::new(()),
        })
    }

    /// Opens an existing store. Fails with `NotFound` if `"lh"` is absent.
    pub fn open(path: impl AsRef<Path>, params: ConsensusParams) -> Result<Self, ChainError> {
        let db = sled::open(path)?;
        if db.get(TIP_KEY)?.is_none() {
            return Err(ChainError::NotFound);
        }
        Ok(Chain {
            db,
            params,
            forge_lock: Mutex::new(()),
        })
    }

    pub fn params(&self) -> &ConsensusParams {
        &self.params
    }

    /// Direct access to the underlying store, for the UTXO index (which
    /// shares the same `sled::Db` and key namespace).
    pub fn db(&self) -> &sled::Db {
        &self.db
    }

    fn tip_hash(&self) -> Result<Hash, ChainError> {
        let raw = self
            .db
            .get(TIP_KEY)?
            .ok_or_else(|| ChainError::Corruption("\"lh\" key is missing".to_string()))?;
        let mut hash = [0u8; 32];
        if raw.len() != 32 {
            return Err(ChainError::Corruption("\"lh\" value is not 32 bytes".to_string()));
        }
        hash.copy_from_slice(&raw);
        Ok(hash)
    }

    pub fn tip_height(&self) -> Result<i64, ChainError> {
        Ok(self.get_block(&self.tip_hash()?)?.height)
    }

    pub fn get_block(&self, hash: &Hash) -> Result<Block, ChainError> {
        let raw = self
            .db
            .get(hash)?
            .ok_or_else(|| ChainError::BlockNotFound(hex::encode(hash)))?;
        Ok(Block::deserialize(&raw)?)
    }

    pub fn has_block(&self, hash: &Hash) -> Result<bool, ChainError> {
        Ok(self.db.contains_key(hash)?)
    }

    /// All block hashes from the current tip back to genesis.
    pub fn block_hashes(&self) -> Result<Vec<Hash>, ChainError> {
        self.iter_blocks()?.map(|r| r.map(|b| b.hash)).collect()
    }

    /// A lazy, restartable iterator over blocks from the current tip back
    /// to genesis, following each block's `prev_hash`.
    pub fn iter_blocks(&self) -> Result<BlockIter<'_>, ChainError> {
        Ok(BlockIter {
            chain: self,
            next_hash: Some(self.tip_hash()?),
        })
    }

    pub fn find_transaction(&self, id: &Hash) -> Result<Transaction, ChainError> {
        for block in self.iter_blocks()? {
            let block = block?;
            if let Some(tx) = block.transactions.iter().find(|tx| &tx.id == id) {
                return Ok(tx.clone());
            }
        }
        Err(ChainError::TransactionNotFound(hex::encode(id)))
    }

    /// Builds a new block atop the current tip, mines it to the symbolic
    /// proof-of-work target, signs it with `signing_key`, and appends it
    /// in one atomic write. Serialized against other forges in the same
    /// process by `forge_lock`.
    pub fn forge(
        &self,
        transactions: Vec<Transaction>,
        signing_key: &p256::ecdsa::SigningKey,
    ) -> Result<Block, ChainError> {
        let _guard = self.forge_lock.lock().unwrap();
        let tip_hash = self.tip_hash()?;
        let tip = self.get_block(&tip_hash)?;

        let mut block = Block::new(transactions, tip_hash, tip.height + 1, Vec::new());
        consensus::mine_block(&mut block, self.params.target_zeros);
        consensus::sign_block(&mut block, signing_key)?;

        self.write_block_and_advance_tip(&block, tip.height)?;
        Ok(block)
    }

    /// Offers a block received from a peer. Duplicate detection
    /// short-circuits before any validation runs. On success, the tip only
    /// moves if the new block is strictly taller (no fork choice among
    /// equal-height siblings).
    pub fn accept_block(&self, block: &Block) -> Result<AcceptOutcome, ChainError> {
        let _guard = self.forge_lock.lock().unwrap();
        if self.has_block(&block.hash)? {
            return Ok(AcceptOutcome::Duplicate);
        }

        let tip_hash = self.tip_hash()?;
        let tip = self.get_block(&tip_hash)?;

        if block.is_genesis() {
            return Ok(AcceptOutcome::Rejected);
        }
        if consensus::verify_block_signature(block, &self.params).is_err() {
            return Ok(AcceptOutcome::Rejected);
        }
        if consensus::validate_block_header(block, &tip, &self.params).is_err() {
            return Ok(AcceptOutcome::Rejected);
        }

        self.write_block_and_advance_tip(block, tip.height)?;
        Ok(AcceptOutcome::Added)
    }

    fn write_block_and_advance_tip(&self, block: &Block, tip_height: i64) -> Result<(), ChainError> {
        let bytes = block.serialize()?;
        let advance_tip = block.height > tip_height;
        self.db
            .transaction(|tx| {
                tx.insert(block.hash.as_slice(), bytes.clone())?;
                if advance_tip {
                    tx.insert(TIP_KEY, block.hash.as_slice())?;
                }
                Ok::<_, sled::transaction::ConflictableTransactionError<std::convert::Infallible>>(())
            })
            .map_err(|e| ChainError::Corruption(e.to_string()))?;
        self.db.flush()?;
        Ok(())
    }
}

/// Lazy tip-to-genesis block iterator. Each step reads the next block via
/// the previous one's `prev_hash`; it does not observe mutations made
/// through a different handle mid-iteration.
pub struct BlockIter<'a> {
    chain: &'a Chain,
    next_hash: Option<Hash>,
}

impl<'a> Iterator for BlockIter<'a> {
    type Item = Result<Block, ChainError>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.next_hash?;
        match self.chain.get_block(&hash) {
            Ok(block) => {
                self.next_hash = if block.is_genesis() {
                    None
                } else {
                    Some(block.prev_hash)
                };
                Some(Ok(block))
            }
            Err(e) => {
                self.next_hash = None;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sole_consensus::GenesisParams;
    use sole_crypto::{generate_keypair, public_key_uncompressed, Address};

    fn params_with(admin_hash: [u8; 20], authorized_hex: Vec<String>) -> ConsensusParams {
        ConsensusParams {
            target_zeros: 1,
            drift_tolerance_secs: 60,
            authorized_validators: authorized_hex,
            genesis: GenesisParams {
                timestamp: 1768947120,
                reward: 5_000_000 * 100_000_000,
                admin_address: Address::from_pubkey_hash(admin_hash).encode(),
                memo: "Lu sule, lu mare, lu ientu. Unisalento 2026.".to_string(),
            },
        }
    }

    #[test]
    fn init_creates_genesis_and_rejects_reinit() {
        let dir = tempfile::tempdir().unwrap();
        let params = params_with([1u8; 20], vec![]);
        let chain = Chain::init(dir.path(), params.clone()).unwrap();
        assert_eq!(chain.tip_height().unwrap(), 0);

        let reopened_params = params.clone();
        assert!(matches!(
            Chain::init(dir.path(), reopened_params),
            Err(ChainError::AlreadyExists)
        ));
    }

    #[test]
    fn open_missing_store_fails() {
        let dir = tempfile::tempdir().unwrap();
        let params = params_with([1u8; 20], vec![]);
        assert!(matches!(Chain::open(dir.path(), params), Err(ChainError::NotFound)));
    }

    #[test]
    fn forge_extends_tip_and_chains_correctly() {
        let dir = tempfile::tempdir().unwrap();
        let (signing_key, verifying_key) = generate_keypair();
        let validator_hex = hex::encode(public_key_uncompressed(&verifying_key));
        let params = params_with([1u8; 20], vec![validator_hex]);
        let chain = Chain::init(dir.path(), params).unwrap();

        let genesis = chain.get_block(&chain.tip_hash().unwrap()).unwrap();
        let coinbase = sole_core::Transaction::new_coinbase([2u8; 20], b"reward", 1000);
        let block = chain.forge(vec![coinbase], &signing_key).unwrap();

        assert_eq!(block.height, 1);
        assert_eq!(block.prev_hash, genesis.hash);
        assert_eq!(chain.tip_height().unwrap(), 1);
    }

    #[test]
    fn accept_block_deduplicates() {
        let dir = tempfile::tempdir().unwrap();
        let (signing_key, verifying_key) = generate_keypair();
        let validator_hex = hex::encode(public_key_uncompressed(&verifying_key));
        let params = params_with([1u8; 20], vec![validator_hex]);
        let chain = Chain::init(dir.path(), params).unwrap();

        let coinbase = sole_core::Transaction::new_coinbase([2u8; 20], b"reward", 1000);
        let block = chain.forge(vec![coinbase], &signing_key).unwrap();

        assert_eq!(chain.accept_block(&block).unwrap(), AcceptOutcome::Duplicate);
    }

    #[test]
    fn iter_blocks_walks_tip_to_genesis() {
        let dir = tempfile::tempdir().unwrap();
        let (signing_key, verifying_key) = generate_keypair();
        let validator_hex = hex::encode(public_key_uncompressed(&verifying_key));
        let params = params_with([1u8; 20], vec![validator_hex]);
        let chain = Chain::init(dir.path(), params).unwrap();

        for i in 0..3 {
            let coinbase = sole_core::Transaction::new_coinbase([2u8; 20], format!("r{i}").as_bytes(), 10);
            chain.forge(vec![coinbase], &signing_key).unwrap();
        }

        let heights: Vec<i64> = chain.iter_blocks().unwrap().map(|b| b.unwrap().height).collect();
        assert_eq!(heights, vec![3, 2, 1, 0]);
    }
}
