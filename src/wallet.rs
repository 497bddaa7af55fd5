//! Wallet file: a JSON set of `(label, publicKey, privateKey)` entries,
//! self-describing and restartable across runs. The CLI is its sole
//! consumer — the core never reads this file directly.

use std::fs;
use std::path::Path;

use p256::ecdsa::SigningKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use sole_crypto::{generate_keypair, hash_pub_key, public_key_raw, Address, CryptoError};

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wallet file is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("no wallet entry controls address {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WalletEntry {
    label: String,
    /// Hex of the raw 64-byte `X||Y` public key.
    public_key: String,
    /// Hex of the 32-byte P-256 scalar.
    private_key: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Wallet {
    entries: Vec<WalletEntry>,
}

impl Wallet {
    pub fn load_or_default(path: &Path) -> Result<Self, WalletError> {
        if !path.exists() {
            return Ok(Wallet::default());
        }
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), WalletError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    /// Generates a fresh P-256 keypair, appends it under `label`, and
    /// returns its address. Does not persist; call [`Wallet::save`].
    pub fn new_entry(&mut self, label: &str) -> Address {
        let (signing_key, verifying_key) = generate_keypair();
        let pubkey = public_key_raw(&verifying_key);
        let address = Address::from_pubkey_bytes(&pubkey);
        self.entries.push(WalletEntry {
            label: label.to_string(),
            public_key: hex::encode(pubkey),
            private_key: hex::encode(signing_key.to_bytes()),
        });
        address
    }

    /// Finds the entry controlling `address` and returns its signing key
    /// alongside the raw public key bytes to embed in transaction inputs.
    pub fn signing_key_for(&self, address: &str) -> Result<(SigningKey, Vec<u8>), WalletError> {
        let target = Address::decode(address)?;
        for entry in &self.entries {
            let Ok(pubkey) = hex::decode(&entry.public_key) else {
                continue;
            };
            if hash_pub_key(&pubkey) == target.0 {
                let key_bytes =
                    hex::decode(&entry.private_key).map_err(|_| CryptoError::InvalidKey)?;
                let signing_key =
                    SigningKey::from_slice(&key_bytes).map_err(|_| CryptoError::InvalidKey)?;
                return Ok((signing_key, pubkey));
            }
        }
        Err(WalletError::NotFound(address.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_entry_round_trips_through_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.json");

        let mut wallet = Wallet::default();
        let address = wallet.new_entry("admin");
        wallet.save(&path).unwrap();

        let reloaded = Wallet::load_or_default(&path).unwrap();
        let (_, pubkey) = reloaded.signing_key_for(&address.encode()).unwrap();
        assert_eq!(hash_pub_key(&pubkey), address.0);
    }

    #[test]
    fn missing_address_is_not_found() {
        let wallet = Wallet::default();
        let stray = Address::from_pubkey_hash([9u8; 20]);
        assert!(matches!(
            wallet.signing_key_for(&stray.encode()),
            Err(WalletError::NotFound(_))
        ));
    }
}
