//! Validator-side mining loop for the Sole ledger.
//!
//! Activated only when the node holds the private key for an authorized
//! validator. On each tick it drains the mempool, drops whatever no longer
//! verifies, prepends a coinbase, and forges a block through the chain
//! store — which mines it to the symbolic proof-of-work target, signs it,
//! and appends it in one atomic write.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use p256::ecdsa::SigningKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use sole_chain::{Chain, ChainError, UtxoIndex};
use sole_consensus::ConsensusError;
use sole_core::{Hash, Transaction};
use sole_mempool::Mempool;
use sole_network::Host;

#[derive(Debug, Error)]
pub enum MiningError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Consensus(#[from] ConsensusError),
}

impl MiningError {
    fn is_fatal(&self) -> bool {
        matches!(self, MiningError::Chain(e) if e.is_fatal())
    }
}

/// (De)serializes a [`Duration`] as a plain number of seconds, so a TOML
/// value like `tick_interval = 5` loads without a custom visitor — serde's
/// own `Duration` impl instead expects a `{secs, nanos}` table.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs))
    }
}

/// Validator-side configuration, read once at startup (the coinbase reward
/// and tick interval are configuration, not hardcoded constants, even
/// though a single fixed reward is the only policy this node implements —
/// see the Open Question resolution on reward halving).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MiningConfig {
    #[serde(with = "duration_secs")]
    pub tick_interval: Duration,
    pub reward: i64,
    pub memo: String,
}

impl Default for MiningConfig {
    fn default() -> Self {
        MiningConfig {
            tick_interval: Duration::from_secs(5),
            reward: 5_000_000 * 100_000_000,
            memo: "forged by sole".to_string(),
        }
    }
}

/// Runs the periodic mining tick until the process exits. Intended to be
/// spawned as its own task alongside the network host and API listener.
pub struct MiningLoop {
    config: MiningConfig,
    validator_address: [u8; 20],
    signing_key: SigningKey,
    chain: Arc<Chain>,
    mempool: Arc<Mempool>,
    host: Arc<Host>,
}

impl MiningLoop {
    pub fn new(
        config: MiningConfig,
        validator_address: [u8; 20],
        signing_key: SigningKey,
        chain: Arc<Chain>,
        mempool: Arc<Mempool>,
        host: Arc<Host>,
    ) -> Self {
        MiningLoop {
            config,
            validator_address,
            signing_key,
            chain,
            mempool,
            host,
        }
    }

    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        loop {
            interval.tick().await;
            if let Err(e) = self.tick().await {
                if e.is_fatal() {
                    error!("chain store corruption detected, aborting: {e}");
                    std::process::abort();
                }
                error!("mining tick failed, will retry next tick: {e}");
            }
        }
    }

    /// One tick: snapshot, re-verify, forge, index, broadcast, evict. Does
    /// nothing if the mempool is empty after re-verification.
    async fn tick(&self) -> Result<(), MiningError> {
        let candidates = self.verified_candidates().await;
        if candidates.is_empty() {
            return Ok(());
        }

        let coinbase = Transaction::new_coinbase(self.validator_address, self.config.memo.as_bytes(), self.config.reward);
        let mut txs = Vec::with_capacity(candidates.len() + 1);
        txs.push(coinbase);
        txs.extend(candidates);

        let chain = self.chain.clone();
        let signing_key = self.signing_key.clone();
        let block = tokio::task::spawn_blocking(move || chain.forge(txs, &signing_key))
            .await
            .expect("forge task panicked")?;
        info!("forged block {} at height {}", hex::encode(block.hash), block.height);

        UtxoIndex::new(&self.chain).update(&block)?;
        self.mempool.remove_confirmed(&block).await;
        self.host.broadcast_block_inv(block.hash).await;
        Ok(())
    }

    /// Snapshots the mempool under lock, then re-verifies every candidate
    /// against the chain outside the lock. A candidate that no longer
    /// verifies (e.g. it lost a race for the same UTXO) is dropped and
    /// evicted so it is not retried forever.
    async fn verified_candidates(&self) -> Vec<Transaction> {
        let snapshot = self.mempool.snapshot().await;
        let mut seen_inputs: std::collections::HashSet<(Hash, i32)> = std::collections::HashSet::new();
        let mut survivors = Vec::new();

        for tx in snapshot {
            let mut prev_txs = std::collections::HashMap::new();
            let mut ok = true;
            for input in &tx.vin {
                if seen_inputs.contains(&(input.prev_tx_id, input.prev_vout)) {
                    ok = false;
                    break;
                }
                match self.chain.find_transaction(&input.prev_tx_id) {
                    Ok(prev_tx) => {
                        prev_txs.insert(input.prev_tx_id, prev_tx);
                    }
                    Err(_) => {
                        ok = false;
                        break;
                    }
                }
            }
            if !ok || !tx.verify(&prev_txs) {
                warn!("dropping candidate {} that no longer verifies", hex::encode(tx.id));
                self.mempool.drop_invalid(&tx.id).await;
                continue;
            }
            let inputs = match tx.total_input_value(&prev_txs) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if inputs < tx.total_output_value() {
                self.mempool.drop_invalid(&tx.id).await;
                continue;
            }
            for input in &tx.vin {
                seen_inputs.insert((input.prev_tx_id, input.prev_vout));
            }
            survivors.push(tx);
        }
        survivors
    }
}
