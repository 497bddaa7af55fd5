//! Peer bookkeeping and the node's persistent identity.
//!
//! Identity reuses the same ECDSA P-256 primitive and address-derivation
//! hash as everywhere else in the ledger, rather than inventing a second
//! keypair format just for peer ids.

use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;

use p256::ecdsa::SigningKey;
use thiserror::Error;
use tokio::sync::RwLock;

use sole_crypto::{hash_pub_key, public_key_raw, CryptoError};

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// The node's persistent P2P keypair. `peer_id` is the hex of
/// `RIPEMD160(SHA256(pubKey))`, exactly the address-derivation hash used
/// for wallet addresses.
pub struct NodeIdentity {
    signing_key: SigningKey,
    peer_id: String,
}

impl NodeIdentity {
    /// Loads the identity key from `path`, generating and persisting a
    /// fresh one if the file does not yet exist.
    pub fn load_or_generate(path: impl AsRef<Path>) -> Result<Self, PeerError> {
        let path = path.as_ref();
        let signing_key = if path.exists() {
            let bytes = fs::read(path)?;
            SigningKey::from_slice(&bytes).map_err(|_| CryptoError::InvalidKey)?
        } else {
            let (signing_key, _verifying_key) = sole_crypto::generate_keypair();
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, signing_key.to_bytes())?;
            signing_key
        };
        let pubkey = public_key_raw(signing_key.verifying_key());
        let peer_id = hex::encode(hash_pub_key(&pubkey));
        Ok(NodeIdentity { signing_key, peer_id })
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }
}

#[derive(Debug, Clone)]
struct PeerState {
    addr: SocketAddr,
    handshake_done: bool,
}

/// Tracks connected peers by id and whether their handshake has already
/// been processed, so a repeat `version` message is ignored.
#[derive(Default)]
pub struct PeerManager {
    peers: RwLock<HashMap<String, PeerState>>,
}

impl PeerManager {
    pub fn new() -> Self {
        PeerManager {
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Records `addr` for `peer_id` if unseen. Returns `true` the first
    /// time a given peer id completes a handshake, `false` on any repeat —
    /// this is the sole deduplication point for `version` messages.
    pub async fn record_handshake(&self, peer_id: &str, addr: SocketAddr) -> bool {
        let mut peers = self.peers.write().await;
        match peers.get_mut(peer_id) {
            Some(state) => {
                if state.handshake_done {
                    false
                } else {
                    state.handshake_done = true;
                    true
                }
            }
            None => {
                peers.insert(
                    peer_id.to_string(),
                    PeerState {
                        addr,
                        handshake_done: true,
                    },
                );
                true
            }
        }
    }

    pub async fn peer_ids(&self) -> Vec<String> {
        self.peers.read().await.keys().cloned().collect()
    }

    /// Every known peer address except `exclude_id`, for fan-out
    /// broadcasts that must skip the message's originator.
    pub async fn addrs_except(&self, exclude_id: &str) -> Vec<SocketAddr> {
        self.peers
            .read()
            .await
            .iter()
            .filter(|(id, _)| id.as_str() != exclude_id)
            .map(|(_, state)| state.addr)
            .collect()
    }

    pub async fn all_addrs(&self) -> Vec<SocketAddr> {
        self.peers.read().await.values().map(|state| state.addr).collect()
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_handshake_deduplicates_repeats() {
        let manager = PeerManager::new();
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        assert!(manager.record_handshake("peer-a", addr).await);
        assert!(!manager.record_handshake("peer-a", addr).await);
        assert_eq!(manager.peer_count().await, 1);
    }

    #[tokio::test]
    async fn addrs_except_excludes_the_given_id() {
        let manager = PeerManager::new();
        manager.record_handshake("peer-a", "127.0.0.1:9000".parse().unwrap()).await;
        manager.record_handshake("peer-b", "127.0.0.1:9001".parse().unwrap()).await;
        let addrs = manager.addrs_except("peer-a").await;
        assert_eq!(addrs.len(), 1);
        assert_eq!(addrs[0], "127.0.0.1:9001".parse::<SocketAddr>().unwrap());
    }
}
