//! The pending-transaction pool: an in-memory `txId -> Tx` map guarded by
//! a single mutex, never held across chain I/O. Admission verifies the
//! candidate against the chain; confirmation removes mined transactions.

use std::collections::HashMap;

use thiserror::Error;
use tokio::sync::Mutex;

use sole_chain::{Chain, ChainError};
use sole_core::{Block, Hash, Transaction};

#[derive(Debug, Error)]
pub enum MempoolError {
    #[error("transaction is not valid: {0}")]
    Invalid(String),

    #[error(transparent)]
    Chain(#[from] ChainError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Accepted,
    AlreadyKnown,
}

#[derive(Default)]
pub struct Mempool {
    pending: Mutex<HashMap<Hash, Transaction>>,
}

impl Mempool {
    pub fn new() -> Self {
        Mempool {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Verifies `tx` against `chain` (signatures and value conservation)
    /// and, if new and valid, inserts it. The mutex is held only for the
    /// map mutation, not for the chain lookups that precede it.
    pub async fn try_insert(&self, tx: Transaction, chain: &Chain) -> Result<InsertOutcome, MempoolError> {
        {
            let pending = self.pending.lock().await;
            if pending.contains_key(&tx.id) {
                return Ok(InsertOutcome::AlreadyKnown);
            }
        }

        self.verify_against_chain(&tx, chain)?;

        let mut pending = self.pending.lock().await;
        if pending.contains_key(&tx.id) {
            return Ok(InsertOutcome::AlreadyKnown);
        }
        pending.insert(tx.id, tx);
        Ok(InsertOutcome::Accepted)
    }

    fn verify_against_chain(&self, tx: &Transaction, chain: &Chain) -> Result<(), MempoolError> {
        if tx.is_coinbase() {
            return Err(MempoolError::Invalid("coinbase transactions do not enter the mempool".to_string()));
        }

        let mut prev_txs = HashMap::new();
        for input in &tx.vin {
            if !prev_txs.contains_key(&input.prev_tx_id) {
                let prev_tx = chain.find_transaction(&input.prev_tx_id)?;
                prev_txs.insert(input.prev_tx_id, prev_tx);
            }
        }

        if !tx.verify(&prev_txs) {
            return Err(MempoolError::Invalid("signature verification failed".to_string()));
        }

        let inputs = tx.total_input_value(&prev_txs)?;
        let outputs = tx.total_output_value();
        if inputs < outputs {
            return Err(MempoolError::Invalid(format!(
                "inputs {inputs} are less than outputs {outputs}"
            )));
        }

        Ok(())
    }

    pub async fn contains(&self, id: &Hash) -> bool {
        self.pending.lock().await.contains_key(id)
    }

    /// A point-in-time copy of every pending transaction, for the mining
    /// loop to draw a block from.
    pub async fn snapshot(&self) -> Vec<Transaction> {
        self.pending.lock().await.values().cloned().collect()
    }

    /// Drops every transaction id inside `block` from the pool, run after
    /// that block has been appended.
    pub async fn remove_confirmed(&self, block: &Block) {
        let mut pending = self.pending.lock().await;
        for tx in &block.transactions {
            pending.remove(&tx.id);
        }
    }

    /// Evicts a single transaction that failed re-verification (e.g. lost
    /// a race for the same UTXO since admission), so it is not retried on
    /// every future mining tick.
    pub async fn drop_invalid(&self, id: &Hash) {
        self.pending.lock().await.remove(id);
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sole_consensus::{ConsensusParams, GenesisParams};
    use sole_crypto::{generate_keypair, hash_pub_key, public_key_raw, public_key_uncompressed, Address};

    fn test_params(authorized_hex: Vec<String>, admin_hash: [u8; 20]) -> ConsensusParams {
        ConsensusParams {
            target_zeros: 1,
            drift_tolerance_secs: 60,
            authorized_validators: authorized_hex,
            genesis: GenesisParams {
                timestamp: 1768947120,
                reward: 1000,
                admin_address: Address::from_pubkey_hash(admin_hash).encode(),
                memo: "test genesis".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn accepts_valid_spend_of_genesis_coinbase() {
        let dir = tempfile::tempdir().unwrap();
        let (signing_key, verifying_key) = generate_keypair();
        let pubkey = public_key_raw(&verifying_key);
        let pubkey_hash = hash_pub_key(&pubkey);
        let validator_hex = hex::encode(public_key_uncompressed(&verifying_key));

        let params = test_params(vec![validator_hex], pubkey_hash);
        let chain = Chain::init(dir.path(), params).unwrap();

        let genesis_block = chain.iter_blocks().unwrap().next().unwrap().unwrap();
        let coinbase = genesis_block.transactions[0].clone();

        let spendable = vec![(coinbase.id, 0, coinbase.vout[0].value)];
        let mut transfer =
            Transaction::new_transfer(&pubkey, pubkey_hash, [7u8; 20], 100, &spendable).unwrap();
        let mut prev_txs = HashMap::new();
        prev_txs.insert(coinbase.id, coinbase);
        transfer.sign(&signing_key, &prev_txs).unwrap();

        let mempool = Mempool::new();
        let outcome = mempool.try_insert(transfer.clone(), &chain).await.unwrap();
        assert_eq!(outcome, InsertOutcome::Accepted);
        assert_eq!(mempool.len().await, 1);

        let again = mempool.try_insert(transfer, &chain).await.unwrap();
        assert_eq!(again, InsertOutcome::AlreadyKnown);
    }

    #[tokio::test]
    async fn rejects_coinbase_transactions() {
        let dir = tempfile::tempdir().unwrap();
        let params = test_params(vec![], [1u8; 20]);
        let chain = Chain::init(dir.path(), params).unwrap();

        let coinbase = Transaction::new_coinbase([2u8; 20], b"memo", 10);
        let mempool = Mempool::new();
        let err = mempool.try_insert(coinbase, &chain).await.unwrap_err();
        assert!(matches!(err, MempoolError::Invalid(_)));
    }

    #[tokio::test]
    async fn remove_confirmed_drops_mined_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let (signing_key, verifying_key) = generate_keypair();
        let pubkey = public_key_raw(&verifying_key);
        let pubkey_hash = hash_pub_key(&pubkey);
        let validator_hex = hex::encode(public_key_uncompressed(&verifying_key));

        let params = test_params(vec![validator_hex], pubkey_hash);
        let chain = Chain::init(dir.path(), params).unwrap();
        let genesis_block = chain.iter_blocks().unwrap().next().unwrap().unwrap();
        let coinbase = genesis_block.transactions[0].clone();

        let spendable = vec![(coinbase.id, 0, coinbase.vout[0].value)];
        let mut transfer =
            Transaction::new_transfer(&pubkey, pubkey_hash, [7u8; 20], 100, &spendable).unwrap();
        let mut prev_txs = HashMap::new();
        prev_txs.insert(coinbase.id, coinbase);
        transfer.sign(&signing_key, &prev_txs).unwrap();

        let mempool = Mempool::new();
        mempool.try_insert(transfer.clone(), &chain).await.unwrap();

        let block = chain.forge(vec![transfer.clone()], &signing_key).unwrap();
        mempool.remove_confirmed(&block).await;
        assert!(mempool.is_empty().await);
    }
}
