//! Transaction and block data model for the Sole ledger: UTXO input/output
//! semantics, canonical identity hashing, per-input ECDSA signing, and the
//! block header/Merkle structure that ties transactions into the chain.
//!
//! Nothing in this crate touches persistence, consensus rules, or the
//! network — see `sole-chain`, `sole-consensus`, and `sole-network`.

pub mod block;
pub mod transaction;
pub mod utxo;

pub use block::{merkle_root, Block, BlockError, EMPTY_MERKLE_ROOT};
pub use transaction::{Transaction, TxError, TxInput, TxOutput, COINBASE_VOUT};
pub use utxo::Utxo;

/// A 32-byte SHA-256 digest: transaction id, block hash, or Merkle node.
pub type Hash = [u8; 32];
