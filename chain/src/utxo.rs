//! The spendable-output index: a `"utxo-<hex txid>-<vout>"` keyspace held
//! in the same `sled::Db` as the block store, kept in sync with it block
//! by block rather than recomputed on every read.

use sole_core::{Block, Hash, Utxo};

use crate::store::{Chain, ChainError};

const UTXO_PREFIX: &[u8] = b"utxo-";

fn utxo_key(tx_id: &Hash, vout: i32) -> Vec<u8> {
    let mut key = Vec::with_capacity(UTXO_PREFIX.len() + 64 + 1 + 10);
    key.extend_from_slice(UTXO_PREFIX);
    key.extend_from_slice(hex::encode(tx_id).as_bytes());
    key.push(b'-');
    key.extend_from_slice(vout.to_string().as_bytes());
    key
}

/// Wraps the block store's `sled::Db` to maintain and query the unspent
/// output set.
pub struct UtxoIndex<'a> {
    chain: &'a Chain,
}

impl<'a> UtxoIndex<'a> {
    pub fn new(chain: &'a Chain) -> Self {
        UtxoIndex { chain }
    }

    /// Drops every `utxo-` key and rebuilds the set from genesis to tip.
    pub fn reindex(&self) -> Result<(), ChainError> {
        let db = self.chain.db();
        let stale: Vec<_> = db
            .scan_prefix(UTXO_PREFIX)
            .keys()
            .collect::<Result<Vec<_>, _>>()?;
        for key in stale {
            db.remove(key)?;
        }

        let mut blocks: Vec<Block> = self.chain.iter_blocks()?.collect::<Result<Vec<_>, _>>()?;
        blocks.reverse();
        for block in &blocks {
            self.update(block)?;
        }
        db.flush()?;
        Ok(())
    }

    /// Applies one block's spends and creations to the index in a single
    /// write transaction, mirroring `Chain::write_block_and_advance_tip`.
    /// Spends of an already-missing entry are tolerated (idempotent
    /// re-application).
    pub fn update(&self, block: &Block) -> Result<(), ChainError> {
        let db = self.chain.db();

        let mut removals = Vec::new();
        let mut insertions = Vec::new();
        for tx in &block.transactions {
            if !tx.is_coinbase() {
                for input in &tx.vin {
                    removals.push(utxo_key(&input.prev_tx_id, input.prev_vout));
                }
            }
            for (vout, output) in tx.vout.iter().enumerate() {
                let utxo = Utxo {
                    tx_id: tx.id,
                    vout: vout as i32,
                    output: output.clone(),
                };
                let encoded = bincode::serialize(&utxo)
                    .map_err(|e| ChainError::Corruption(e.to_string()))?;
                insertions.push((utxo_key(&tx.id, vout as i32), encoded));
            }
        }

        db.transaction(|tx| {
            for key in &removals {
                tx.remove(key.as_slice())?;
            }
            for (key, value) in &insertions {
                tx.insert(key.as_slice(), value.clone())?;
            }
            Ok::<_, sled::transaction::ConflictableTransactionError<std::convert::Infallible>>(())
        })
        .map_err(|e| ChainError::Corruption(e.to_string()))?;
        db.flush()?;
        Ok(())
    }

    fn scan(&self) -> Result<Vec<Utxo>, ChainError> {
        let mut out = Vec::new();
        for entry in self.chain.db().scan_prefix(UTXO_PREFIX) {
            let (_, value) = entry?;
            let utxo: Utxo =
                bincode::deserialize(&value).map_err(|e| ChainError::Corruption(e.to_string()))?;
            out.push(utxo);
        }
        Ok(out)
    }

    /// Scans unspent outputs locked to `pubkey_hash` in key order,
    /// accumulating `(tx_id, vout, value)` until their sum reaches `amount`
    /// (or the set is exhausted). Returns the accumulated total alongside
    /// the chosen outputs.
    pub fn find_spendable_outputs(
        &self,
        pubkey_hash: &[u8; 20],
        amount: i64,
    ) -> Result<(i64, Vec<(Hash, i32, i64)>), ChainError> {
        let mut total = 0i64;
        let mut chosen = Vec::new();
        for utxo in self.scan()? {
            if total >= amount {
                break;
            }
            if utxo.output.locked_to(pubkey_hash) {
                total += utxo.output.value;
                chosen.push((utxo.tx_id, utxo.vout, utxo.output.value));
            }
        }
        Ok((total, chosen))
    }

    /// Every unspent output locked to `pubkey_hash`.
    pub fn find_unspent_outputs(&self, pubkey_hash: &[u8; 20]) -> Result<Vec<Utxo>, ChainError> {
        Ok(self
            .scan()?
            .into_iter()
            .filter(|utxo| utxo.output.locked_to(pubkey_hash))
            .collect())
    }

    pub fn count_utxos(&self) -> Result<usize, ChainError> {
        Ok(self.chain.db().scan_prefix(UTXO_PREFIX).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sole_consensus::{ConsensusParams, GenesisParams};
    use sole_core::Transaction;
    use sole_crypto::{generate_keypair, public_key_uncompressed, Address};

    fn test_params(authorized_hex: Vec<String>) -> ConsensusParams {
        ConsensusParams {
            target_zeros: 1,
            drift_tolerance_secs: 60,
            authorized_validators: authorized_hex,
            genesis: GenesisParams {
                timestamp: 1768947120,
                reward: 1000,
                admin_address: Address::from_pubkey_hash([1u8; 20]).encode(),
                memo: "test genesis".to_string(),
            },
        }
    }

    #[test]
    fn reindex_credits_genesis_coinbase() {
        let dir = tempfile::tempdir().unwrap();
        let params = test_params(vec![]);
        let chain = Chain::init(dir.path(), params).unwrap();
        let index = UtxoIndex::new(&chain);
        index.reindex().unwrap();

        let (total, outputs) = index.find_spendable_outputs(&[1u8; 20], 1000).unwrap();
        assert_eq!(total, 1000);
        assert_eq!(outputs.len(), 1);
    }

    #[test]
    fn update_spends_input_and_credits_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let (signing_key, verifying_key) = generate_keypair();
        let validator_hex = hex::encode(public_key_uncompressed(&verifying_key));
        let params = test_params(vec![validator_hex]);
        let chain = Chain::init(dir.path(), params).unwrap();
        let index = UtxoIndex::new(&chain);
        index.reindex().unwrap();

        let coinbase = Transaction::new_coinbase([9u8; 20], b"reward", 500);
        let block = chain.forge(vec![coinbase.clone()], &signing_key).unwrap();
        index.update(&block).unwrap();

        let (total, _) = index.find_spendable_outputs(&[9u8; 20], 500).unwrap();
        assert_eq!(total, 500);
        assert_eq!(index.count_utxos().unwrap(), 2);
    }
}
