//! External surface contracts: the handful of read/write operations the
//! HTTP gateway exposes. Every function here is a thin call into the chain
//! store, UTXO index, mempool, or network host — none of them carry core
//! logic of their own.

use serde::Serialize;
use thiserror::Error;

use sole_chain::{Chain, ChainError, UtxoIndex};
use sole_core::{Block, Hash, Transaction};
use sole_crypto::{hash_pub_key, Address, CryptoError};
use sole_mempool::{InsertOutcome, Mempool, MempoolError};
use sole_network::Host;
use std::sync::Arc;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("address is malformed or has an invalid checksum")]
    InvalidAddress,

    #[error("hash is not valid hex, or is the wrong length")]
    InvalidHash,

    #[error("transaction bytes do not decode")]
    InvalidTransaction,

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Mempool(#[from] MempoolError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

#[derive(Debug, Clone, Serialize)]
pub struct UtxoView {
    pub tx_id: String,
    pub vout: i32,
    pub value: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TipSnapshot {
    pub height: i64,
    pub tip_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitOutcome {
    Accepted,
    AlreadyKnown,
}

fn decode_hash(hex_str: &str) -> Result<Hash, ApiError> {
    let bytes = hex::decode(hex_str).map_err(|_| ApiError::InvalidHash)?;
    if bytes.len() != 32 {
        return Err(ApiError::InvalidHash);
    }
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&bytes);
    Ok(hash)
}

fn decode_address(address: &str) -> Result<[u8; 20], ApiError> {
    Address::decode(address).map(|a| a.0).map_err(|_| ApiError::InvalidAddress)
}

/// Σ of every unspent output locked to `address`.
pub fn get_balance(chain: &Chain, address: &str) -> Result<i64, ApiError> {
    let pubkey_hash = decode_address(address)?;
    let index = UtxoIndex::new(chain);
    let outputs = index.find_unspent_outputs(&pubkey_hash)?;
    Ok(outputs.iter().map(|u| u.output.value).sum())
}

pub fn list_utxos(chain: &Chain, address: &str) -> Result<Vec<UtxoView>, ApiError> {
    let pubkey_hash = decode_address(address)?;
    let index = UtxoIndex::new(chain);
    Ok(index
        .find_unspent_outputs(&pubkey_hash)?
        .into_iter()
        .map(|u| UtxoView {
            tx_id: hex::encode(u.tx_id),
            vout: u.vout,
            value: u.output.value,
        })
        .collect())
}

pub fn get_tip(chain: &Chain) -> Result<TipSnapshot, ApiError> {
    let height = chain.tip_height()?;
    let tip = chain.iter_blocks()?.next().ok_or_else(|| ApiError::NotFound("tip".to_string()))??;
    Ok(TipSnapshot {
        height,
        tip_hash: hex::encode(tip.hash),
    })
}

pub fn get_block(chain: &Chain, hash_hex: &str) -> Result<Block, ApiError> {
    let hash = decode_hash(hash_hex)?;
    chain.get_block(&hash).map_err(|e| match e {
        ChainError::BlockNotFound(id) => ApiError::NotFound(format!("block {id}")),
        other => ApiError::Chain(other),
    })
}

/// Every transaction in which `address` appears as a sender (any input's
/// declared public key hashes to it) or a receiver (any output locks to
/// it). Each transaction appears at most once.
pub fn find_transactions(chain: &Chain, address: &str) -> Result<Vec<Transaction>, ApiError> {
    let pubkey_hash = decode_address(address)?;
    let mut found = Vec::new();
    for block in chain.iter_blocks()? {
        let block = block?;
        for tx in block.transactions {
            let is_sender = tx
                .vin
                .iter()
                .any(|input| !input.pub_key.is_empty() && hash_pub_key(&input.pub_key) == pubkey_hash);
            let is_receiver = tx.vout.iter().any(|output| output.pubkey_hash == pubkey_hash);
            if is_sender || is_receiver {
                found.push(tx);
            }
        }
    }
    Ok(found)
}

pub fn find_transaction(chain: &Chain, txid_hex: &str) -> Result<Transaction, ApiError> {
    let id = decode_hash(txid_hex)?;
    chain.find_transaction(&id).map_err(|e| match e {
        ChainError::TransactionNotFound(id) => ApiError::NotFound(format!("transaction {id}")),
        other => ApiError::Chain(other),
    })
}

pub async fn list_peers(host: &Arc<Host>) -> Vec<String> {
    host.listed_peers().await
}

pub fn list_validators(chain: &Chain) -> Vec<String> {
    chain.params().authorized_validators.clone()
}

/// Deserializes, verifies against the chain, and on success inserts into
/// the mempool under lock and broadcasts `inv(tx)` to every connected peer.
pub async fn submit_transaction(
    chain: &Chain,
    mempool: &Mempool,
    host: &Arc<Host>,
    tx_bytes: &[u8],
) -> Result<SubmitOutcome, ApiError> {
    let tx = Transaction::deserialize(tx_bytes).map_err(|_| ApiError::InvalidTransaction)?;
    let tx_id = tx.id;
    match mempool.try_insert(tx, chain).await? {
        InsertOutcome::Accepted => {
            host.broadcast_tx_inv(tx_id, "").await;
            Ok(SubmitOutcome::Accepted)
        }
        InsertOutcome::AlreadyKnown => Ok(SubmitOutcome::AlreadyKnown),
    }
}
