//! Block model: header fields, the deterministic header hash, and the
//! Merkle root over transaction ids. Validator-set and timestamp rules live
//! in `sole-consensus`, not here — this module only knows how to build and
//! hash a block, not whether it is allowed onto the chain.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use sole_crypto::sha256;

use crate::{Hash, Transaction, TxError};

#[derive(Debug, Error)]
pub enum BlockError {
    #[error("block has no transactions")]
    Empty,

    #[error("encoding error: {0}")]
    Encoding(#[from] Box<bincode::ErrorKind>),

    #[error(transparent)]
    Tx(#[from] TxError),
}

/// 32 zero bytes: the Merkle root of an empty transaction list.
pub const EMPTY_MERKLE_ROOT: Hash = [0u8; 32];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub timestamp: i64,
    pub prev_hash: Hash,
    pub height: i64,
    pub nonce: i64,
    /// 65-byte uncompressed `0x04||X||Y`, 64-byte legacy raw `X||Y`, or a
    /// placeholder tag for genesis.
    pub validator: Vec<u8>,
    pub merkle_root: Hash,
    pub hash: Hash,
    /// 64 bytes once signed, empty on an un-signed (e.g. freshly mined, not
    /// yet signed) block.
    pub signature: Vec<u8>,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Builds a new block with `nonce = 0` and header hash/merkle root
    /// already computed; `validator` may be empty (filled in by the signer
    /// later) and the block is unsigned until `sign_block` runs.
    pub fn new(transactions: Vec<Transaction>, prev_hash: Hash, height: i64, validator: Vec<u8>) -> Self {
        Self::new_at(transactions, prev_hash, height, validator, sole_util::now())
    }

    /// Same as [`Block::new`] but with an explicit timestamp, for building
    /// the deterministic genesis block.
    pub fn new_at(
        transactions: Vec<Transaction>,
        prev_hash: Hash,
        height: i64,
        validator: Vec<u8>,
        timestamp: i64,
    ) -> Self {
        let merkle_root = merkle_root(&transactions.iter().map(|tx| tx.id).collect::<Vec<_>>());
        let mut block = Block {
            timestamp,
            prev_hash,
            height,
            nonce: 0,
            validator,
            merkle_root,
            hash: [0u8; 32],
            signature: Vec::new(),
            transactions,
        };
        block.hash = block.header_hash();
        block
    }

    /// Deterministic header hash; excludes `signature` and `hash` itself.
    pub fn header_hash(&self) -> Hash {
        sha256(&self.header_preimage())
    }

    fn header_preimage(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32 + 32 + 8 + 8 + 8 + self.validator.len());
        buf.extend_from_slice(&self.prev_hash);
        buf.extend_from_slice(&self.merkle_root);
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&self.height.to_be_bytes());
        buf.extend_from_slice(&self.nonce.to_be_bytes());
        buf.extend_from_slice(&self.validator);
        buf
    }

    /// Recomputes `hash` after `nonce`, `timestamp`, or `validator` change
    /// (mining and signing both call this).
    pub fn recompute_hash(&mut self) {
        self.hash = self.header_hash();
    }

    /// `true` if the first `target_zeros` bytes of `hash` are zero.
    pub fn meets_target(&self, target_zeros: usize) -> bool {
        self.hash.iter().take(target_zeros).all(|&b| b == 0)
    }

    pub fn is_genesis(&self) -> bool {
        self.height == 0
    }

    pub fn serialize(&self) -> Result<Vec<u8>, BlockError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, BlockError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Builds the Merkle root over an ordered list of transaction ids.
/// `EMPTY_MERKLE_ROOT` for an empty list; odd levels duplicate the last
/// node, per the standard Bitcoin convention.
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return EMPTY_MERKLE_ROOT;
    }
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            let last = *level.last().unwrap();
            level.push(last);
        }
        level = level
            .chunks(2)
            .map(|pair| {
                let mut buf = Vec::with_capacity(64);
                buf.extend_from_slice(&pair[0]);
                buf.extend_from_slice(&pair[1]);
                sha256(&buf)
            })
            .collect();
    }
    level[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_merkle_root_is_zero() {
        assert_eq!(merkle_root(&[]), EMPTY_MERKLE_ROOT);
    }

    #[test]
    fn single_leaf_merkle_root_is_the_leaf() {
        let leaf = [5u8; 32];
        assert_eq!(merkle_root(&[leaf]), leaf);
    }

    #[test]
    fn odd_level_duplicates_last_node() {
        let a = [1u8; 32];
        let b = [2u8; 32];
        let c = [3u8; 32];
        let three = merkle_root(&[a, b, c]);

        let ab = sha256(&[a, b].concat());
        let cc = sha256(&[c, c].concat());
        let expected = sha256(&[ab, cc].concat());
        assert_eq!(three, expected);
    }

    #[test]
    fn header_hash_excludes_signature() {
        let tx = Transaction::new_coinbase([1u8; 20], b"memo", 100);
        let mut block = Block::new(vec![tx], [0u8; 32], 1, vec![0x04; 65]);
        let before = block.header_hash();
        block.signature = vec![9u8; 64];
        let after = block.header_hash();
        assert_eq!(before, after);
    }

    #[test]
    fn recompute_hash_stable_on_reload() {
        let tx = Transaction::new_coinbase([1u8; 20], b"memo", 100);
        let block = Block::new(vec![tx], [0u8; 32], 1, vec![0x04; 65]);
        let serialized = block.serialize().unwrap();
        let reloaded = Block::deserialize(&serialized).unwrap();
        assert_eq!(reloaded.header_hash(), block.hash);
    }

    #[test]
    fn serialize_round_trip() {
        let tx = Transaction::new_coinbase([2u8; 20], b"memo", 500);
        let block = Block::new(vec![tx], [3u8; 32], 7, vec![0x04; 65]);
        let bytes = block.serialize().unwrap();
        let decoded = Block::deserialize(&bytes).unwrap();
        assert_eq!(decoded.hash, block.hash);
        assert_eq!(decoded.height, block.height);
        assert_eq!(decoded.transactions.len(), 1);
    }
}
