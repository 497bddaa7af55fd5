//! The shared UTXO record type.
//!
//! The persistent index that maintains the set of these records lives in
//! `sole-chain` (it needs the key-value store); this module only defines
//! the record shape so `sole-chain`, `sole-api`, and `sole-mining` all agree
//! on it without depending on each other.

use serde::{Deserialize, Serialize};

use crate::{Hash, TxOutput};

/// A single spendable output: which transaction and output index it came
/// from, plus the output itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub tx_id: Hash,
    pub vout: i32,
    pub output: TxOutput,
}

impl Utxo {
    pub fn new(tx_id: Hash, vout: i32, output: TxOutput) -> Self {
        Utxo { tx_id, vout, output }
    }

    pub fn value(&self) -> i64 {
        self.output.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_passes_through_to_output() {
        let utxo = Utxo::new([1u8; 32], 0, TxOutput::new(42, [2u8; 20]));
        assert_eq!(utxo.value(), 42);
    }
}
