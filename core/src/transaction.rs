//! Transaction model for the Sole ledger: UTXO inputs/outputs, canonical
//! identity hashing, and per-input ECDSA signing/verification.
//!
//! The identity preimage and the trimmed-copy signing scheme are both
//! deliberately exact reproductions of a specific byte layout — any
//! deviation silently changes every transaction id and breaks every
//! existing signature, so nothing here is "improved" relative to the
//! preimage described by the ledger's on-disk format.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use sole_crypto::{self as crypto, CryptoError};

use crate::Hash;

#[derive(Debug, Error)]
pub enum TxError {
    #[error("insufficient funds: needed {needed}, found {found}")]
    InsufficientFunds { needed: i64, found: i64 },

    #[error("previous transaction {0} not found")]
    PreviousTxMissing(String),

    #[error("referenced output {0}:{1} does not exist")]
    OutputMissing(String, i32),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("encoding error: {0}")]
    Encoding(#[from] Box<bincode::ErrorKind>),
}

/// One spendable output: `value` in the smallest unit, locked to `pubkey_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: i64,
    pub pubkey_hash: [u8; 20],
}

impl TxOutput {
    pub fn new(value: i64, pubkey_hash: [u8; 20]) -> Self {
        TxOutput { value, pubkey_hash }
    }

    pub fn locked_to(&self, pubkey_hash: &[u8; 20]) -> bool {
        &self.pubkey_hash == pubkey_hash
    }
}

/// Coinbase inputs carry an empty `prev_tx_id` and `prev_vout == -1`.
pub const COINBASE_VOUT: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub prev_tx_id: Hash,
    pub prev_vout: i32,
    /// 64 bytes once signed, empty beforehand.
    pub signature: Vec<u8>,
    /// 64-byte raw `X||Y` public key on a spend, arbitrary tag bytes on a
    /// coinbase (a memo string).
    pub pub_key: Vec<u8>,
}

impl TxInput {
    pub fn is_coinbase(&self) -> bool {
        self.prev_tx_id == [0u8; 32] && self.prev_vout == COINBASE_VOUT
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Hash,
    pub vin: Vec<TxInput>,
    pub vout: Vec<TxOutput>,
    pub timestamp: i64,
}

impl Transaction {
    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].is_coinbase()
    }

    /// Builds a coinbase transaction: one synthetic input carrying `memo`,
    /// one output of `reward` locked to `to`.
    pub fn new_coinbase(to: [u8; 20], memo: &[u8], reward: i64) -> Self {
        Self::new_coinbase_at(to, memo, reward, sole_util::now())
    }

    /// Same as [`Transaction::new_coinbase`] but with an explicit
    /// timestamp, for building the deterministic genesis coinbase.
    pub fn new_coinbase_at(to: [u8; 20], memo: &[u8], reward: i64, timestamp: i64) -> Self {
        let mut tx = Transaction {
            id: [0u8; 32],
            vin: vec![TxInput {
                prev_tx_id: [0u8; 32],
                prev_vout: COINBASE_VOUT,
                signature: Vec::new(),
                pub_key: memo.to_vec(),
            }],
            vout: vec![TxOutput::new(reward, to)],
            timestamp,
        };
        tx.id = tx.identity_hash();
        tx
    }

    /// Builds an unsigned transfer transaction. `spendable` is the ordered
    /// list of `(prev_tx_id, prev_vout, value)` candidates for the sender's
    /// address, as produced by the UTXO index's natural iteration order;
    /// accumulation stops the instant the running sum reaches `amount`.
    /// `from_pubkey` is the sender's full raw public key (64 bytes,
    /// `X||Y`) and is written into every input; signatures are added in a
    /// later pass via [`sign`].
    pub fn new_transfer(
        from_pubkey: &[u8],
        from_pubkey_hash: [u8; 20],
        to: [u8; 20],
        amount: i64,
        spendable: &[(Hash, i32, i64)],
    ) -> Result<Self, TxError> {
        let mut collected = 0i64;
        let mut chosen: Vec<(Hash, i32)> = Vec::new();
        for (txid, vout, value) in spendable {
            if collected >= amount {
                break;
            }
            collected += value;
            chosen.push((*txid, *vout));
        }
        if collected < amount {
            return Err(TxError::InsufficientFunds {
                needed: amount,
                found: collected,
            });
        }

        let vin = chosen
            .into_iter()
            .map(|(prev_tx_id, prev_vout)| TxInput {
                prev_tx_id,
                prev_vout,
                signature: Vec::new(),
                pub_key: from_pubkey.to_vec(),
            })
            .collect();

        let mut vout = vec![TxOutput::new(amount, to)];
        let change = collected - amount;
        if change > 0 {
            vout.push(TxOutput::new(change, from_pubkey_hash));
        }

        let mut tx = Transaction {
            id: [0u8; 32],
            vin,
            vout,
            timestamp: sole_util::now(),
        };
        tx.id = tx.identity_hash();
        Ok(tx)
    }

    /// `SHA256` of the canonical identity preimage; excludes `id` itself.
    pub fn identity_hash(&self) -> Hash {
        crypto::sha256(&self.identity_preimage())
    }

    fn identity_preimage(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for input in &self.vin {
            buf.extend_from_slice(&input.prev_tx_id);
            buf.extend_from_slice(&(input.prev_vout as i64 as u64).to_be_bytes());
            buf.extend_from_slice(&input.pub_key);
            buf.extend_from_slice(&input.signature);
        }
        for output in &self.vout {
            buf.extend_from_slice(&output.value.to_be_bytes());
            buf.extend_from_slice(&output.pubkey_hash);
        }
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf
    }

    /// A trimmed copy zeroes every input's `signature` and `pub_key`, and
    /// zeroes `id`; it is the canonical shape signed and verified per input.
    fn trimmed_copy(&self) -> Transaction {
        Transaction {
            id: [0u8; 32],
            vin: self
                .vin
                .iter()
                .map(|input| TxInput {
                    prev_tx_id: input.prev_tx_id,
                    prev_vout: input.prev_vout,
                    signature: Vec::new(),
                    pub_key: Vec::new(),
                })
                .collect(),
            vout: self.vout.clone(),
            timestamp: self.timestamp,
        }
    }

    /// The digest signed/verified for input `index`: a trimmed copy with
    /// only that input's `pub_key` set to the referenced output's
    /// `pubkey_hash`.
    fn signing_digest(&self, index: usize, referenced_pubkey_hash: &[u8; 20]) -> Hash {
        let mut copy = self.trimmed_copy();
        copy.vin[index].pub_key = referenced_pubkey_hash.to_vec();
        let digest = copy.identity_hash();
        copy.vin[index].pub_key.clear();
        digest
    }

    /// Signs every non-coinbase input in place. `prev_txs` must contain the
    /// full transaction referenced by every input (keyed by `id`).
    pub fn sign(
        &mut self,
        signing_key: &p256::ecdsa::SigningKey,
        prev_txs: &std::collections::HashMap<Hash, Transaction>,
    ) -> Result<(), TxError> {
        if self.is_coinbase() {
            return Ok(());
        }
        for index in 0..self.vin.len() {
            let prev_tx_id = self.vin[index].prev_tx_id;
            let prev_vout = self.vin[index].prev_vout;
            let prev_tx = prev_txs
                .get(&prev_tx_id)
                .ok_or_else(|| TxError::PreviousTxMissing(hex::encode(prev_tx_id)))?;
            let referenced = prev_tx
                .vout
                .get(prev_vout as usize)
                .ok_or_else(|| TxError::OutputMissing(hex::encode(prev_tx_id), prev_vout))?;
            let digest = self.signing_digest(index, &referenced.pubkey_hash);
            let signature = crypto::sign(signing_key, &digest)?;
            self.vin[index].signature = signature.to_vec();
        }
        Ok(())
    }

    /// Verifies every non-coinbase input independently. Binds the signer's
    /// declared public key to the referenced output's locking hash before
    /// doing any ECDSA work.
    pub fn verify(&self, prev_txs: &std::collections::HashMap<Hash, Transaction>) -> bool {
        if self.is_coinbase() {
            return true;
        }
        for (index, input) in self.vin.iter().enumerate() {
            let prev_tx = match prev_txs.get(&input.prev_tx_id) {
                Some(tx) => tx,
                None => return false,
            };
            let referenced = match prev_tx.vout.get(input.prev_vout as usize) {
                Some(out) => out,
                None => return false,
            };
            if crypto::hash_pub_key(&input.pub_key) != referenced.pubkey_hash {
                return false;
            }
            let digest = self.signing_digest(index, &referenced.pubkey_hash);
            let verifying_key = match crypto::verifying_key_from_bytes(&input.pub_key) {
                Ok(k) => k,
                Err(_) => return false,
            };
            if !crypto::verify(&verifying_key, &digest, &input.signature) {
                return false;
            }
        }
        true
    }

    /// Sum of every referenced prior output's value; used by the
    /// value-conservation check. Errors if any input's source is missing.
    pub fn total_input_value(
        &self,
        prev_txs: &std::collections::HashMap<Hash, Transaction>,
    ) -> Result<i64, TxError> {
        if self.is_coinbase() {
            return Ok(0);
        }
        let mut total = 0i64;
        for input in &self.vin {
            let prev_tx = prev_txs
                .get(&input.prev_tx_id)
                .ok_or_else(|| TxError::PreviousTxMissing(hex::encode(input.prev_tx_id)))?;
            let referenced = prev_tx
                .vout
                .get(input.prev_vout as usize)
                .ok_or_else(|| TxError::OutputMissing(hex::encode(input.prev_tx_id), input.prev_vout))?;
            total += referenced.value;
        }
        Ok(total)
    }

    pub fn total_output_value(&self) -> i64 {
        self.vout.iter().map(|o| o.value).sum()
    }

    /// Round-trippable wire/disk encoding. `id` is not carried; it is
    /// recomputed on deserialization.
    pub fn serialize(&self) -> Result<Vec<u8>, TxError> {
        Ok(bincode::serialize(&(&self.vin, &self.vout, self.timestamp))?)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, TxError> {
        let (vin, vout, timestamp): (Vec<TxInput>, Vec<TxOutput>, i64) =
            bincode::deserialize(bytes)?;
        let mut tx = Transaction {
            id: [0u8; 32],
            vin,
            vout,
            timestamp,
        };
        tx.id = tx.identity_hash();
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sole_crypto::generate_keypair;
    use std::collections::HashMap;

    #[test]
    fn coinbase_has_no_signature_requirement() {
        let tx = Transaction::new_coinbase([1u8; 20], b"memo", 5_000_000_000_00000000i64);
        assert!(tx.is_coinbase());
        assert!(tx.verify(&HashMap::new()));
    }

    #[test]
    fn transfer_selects_until_amount_met_and_returns_change() {
        let prev_tx_id = [9u8; 32];
        let spendable = vec![(prev_tx_id, 0, 100), (prev_tx_id, 1, 50)];
        let tx = Transaction::new_transfer(&[0u8; 64], [2u8; 20], [3u8; 20], 70, &spendable)
            .expect("sufficient funds");
        assert_eq!(tx.vin.len(), 1);
        assert_eq!(tx.vout.len(), 2);
        assert_eq!(tx.vout[0].value, 70);
        assert_eq!(tx.vout[1].value, 30);
    }

    #[test]
    fn transfer_fails_on_insufficient_funds() {
        let err = Transaction::new_transfer(&[0u8; 64], [2u8; 20], [3u8; 20], 70, &[])
            .unwrap_err();
        assert!(matches!(err, TxError::InsufficientFunds { .. }));
    }

    #[test]
    fn sign_then_verify_round_trip() {
        let (signing_key, verifying_key) = generate_keypair();
        let pubkey = sole_crypto::public_key_raw(&verifying_key);
        let pubkey_hash = sole_crypto::hash_pub_key(&pubkey);

        let coinbase = Transaction::new_coinbase(pubkey_hash, b"genesis", 1000);
        let mut prev_txs = HashMap::new();
        prev_txs.insert(coinbase.id, coinbase.clone());

        let spendable = vec![(coinbase.id, 0, 1000)];
        let mut transfer =
            Transaction::new_transfer(&pubkey, pubkey_hash, [7u8; 20], 400, &spendable).unwrap();
        transfer.sign(&signing_key, &prev_txs).unwrap();

        assert!(transfer.verify(&prev_txs));
    }

    #[test]
    fn mutated_output_fails_verification() {
        let (signing_key, verifying_key) = generate_keypair();
        let pubkey = sole_crypto::public_key_raw(&verifying_key);
        let pubkey_hash = sole_crypto::hash_pub_key(&pubkey);

        let coinbase = Transaction::new_coinbase(pubkey_hash, b"genesis", 1000);
        let mut prev_txs = HashMap::new();
        prev_txs.insert(coinbase.id, coinbase.clone());

        let spendable = vec![(coinbase.id, 0, 1000)];
        let mut transfer =
            Transaction::new_transfer(&pubkey, pubkey_hash, [7u8; 20], 400, &spendable).unwrap();
        transfer.sign(&signing_key, &prev_txs).unwrap();

        transfer.vout[0].value += 1;
        assert!(!transfer.verify(&prev_txs));
    }

    #[test]
    fn wrong_signer_fails_pubkey_hash_binding() {
        let (_owner_signing, owner_verifying) = generate_keypair();
        let owner_pubkey = sole_crypto::public_key_raw(&owner_verifying);
        let owner_hash = sole_crypto::hash_pub_key(&owner_pubkey);

        let (attacker_signing, attacker_verifying) = generate_keypair();
        let attacker_pubkey = sole_crypto::public_key_raw(&attacker_verifying);

        let coinbase = Transaction::new_coinbase(owner_hash, b"genesis", 1000);
        let mut prev_txs = HashMap::new();
        prev_txs.insert(coinbase.id, coinbase.clone());

        let spendable = vec![(coinbase.id, 0, 1000)];
        let mut transfer =
            Transaction::new_transfer(&attacker_pubkey, owner_hash, [7u8; 20], 400, &spendable)
                .unwrap();
        transfer.sign(&attacker_signing, &prev_txs).unwrap();

        assert!(!transfer.verify(&prev_txs));
    }

    #[test]
    fn serialize_round_trip_preserves_id_and_fields() {
        let tx = Transaction::new_coinbase([4u8; 20], b"memo", 123456);
        let bytes = tx.serialize().unwrap();
        let decoded = Transaction::deserialize(&bytes).unwrap();
        assert_eq!(decoded.id, tx.id);
        assert_eq!(decoded.vin, tx.vin);
        assert_eq!(decoded.vout, tx.vout);
        assert_eq!(decoded.timestamp, tx.timestamp);
    }
}
