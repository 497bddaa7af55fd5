//! Persistence layer for the Sole ledger: a single `sled` key-value store
//! holding blocks, the `"lh"` tip pointer, and the UTXO index, with atomic
//! updates per appended block.
//!
//! The literal key layout (`"lh"`, `<hash>`, `"utxo-<txid>-<vout>"`) lives
//! directly in one `sled::Db` rather than behind separate trees, so the
//! on-disk shape matches the ledger's own description of itself.

pub mod store;
pub mod utxo;

pub use store::{AcceptOutcome, Chain, ChainConfig, ChainError};
pub use utxo::UtxoIndex;
