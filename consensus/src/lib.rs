//! Proof-of-authority consensus for the Sole ledger: the compiled-in
//! authorized-validator table, block signing/verification, the symbolic
//! proof-of-work spam limiter, and header validation against the current
//! tip.
//!
//! Symbolic PoW here is an anti-spam mechanism, not a security primitive —
//! the actual authority check is the validator signature.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use sole_core::Block;
use sole_crypto::{self as crypto, CryptoError};

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("validator key is not in the authorized set")]
    UnauthorizedValidator,

    #[error("block signature does not verify")]
    InvalidSignature,

    #[error("header rule violation: {0}")]
    HeaderRuleViolation(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Parameters for the genesis block, normally read from configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenesisParams {
    pub timestamp: i64,
    pub reward: i64,
    pub admin_address: String,
    pub memo: String,
}

/// The tag written into the genesis block's `validator` field; it carries
/// no signature and is never looked up in the authorized set.
pub const GENESIS_VALIDATOR_TAG: &[u8] = b"sole-genesis-anchor";

/// Compile-time-shaped consensus configuration, loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusParams {
    /// Number of leading zero bytes a block hash must have.
    pub target_zeros: usize,
    /// How far into the future a block's timestamp may drift, in seconds.
    pub drift_tolerance_secs: i64,
    /// Hex-encoded uncompressed (`04`-prefixed) public keys permitted to
    /// sign blocks.
    pub authorized_validators: Vec<String>,
    pub genesis: GenesisParams,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        ConsensusParams {
            target_zeros: 1,
            drift_tolerance_secs: 60,
            authorized_validators: Vec::new(),
            genesis: GenesisParams {
                timestamp: 1768947120,
                reward: 5_000_000 * 100_000_000,
                admin_address: "1HSYNy8yXUuUZrkBCnzSc34Lqr8soPAKQL".to_string(),
                memo: "Lu sule, lu mare, lu ientu. Unisalento 2026.".to_string(),
            },
        }
    }
}

impl ConsensusParams {
    /// Normalizes an incoming 64-byte raw or 65-byte uncompressed validator
    /// key to its canonical uncompressed hex form, then checks membership
    /// in the authorized set.
    pub fn is_authorized(&self, validator_bytes: &[u8]) -> bool {
        match normalize_validator_hex(validator_bytes) {
            Ok(hex) => self
                .authorized_validators
                .iter()
                .any(|candidate| candidate.eq_ignore_ascii_case(&hex)),
            Err(_) => false,
        }
    }
}

/// Normalizes a 64-byte raw `X||Y` or 65-byte uncompressed `0x04||X||Y`
/// validator key to lowercase hex of the 65-byte uncompressed form.
pub fn normalize_validator_hex(validator_bytes: &[u8]) -> Result<String, ConsensusError> {
    let key = crypto::verifying_key_from_bytes(validator_bytes)?;
    Ok(hex::encode(crypto::public_key_uncompressed(&key)))
}

/// Populates `validator` with the signer's uncompressed public key, ensures
/// `hash` reflects that, then signs `hash` and writes the 64-byte result.
pub fn sign_block(
    block: &mut Block,
    signing_key: &p256::ecdsa::SigningKey,
) -> Result<(), ConsensusError> {
    let verifying_key = *signing_key.verifying_key();
    block.validator = crypto::public_key_uncompressed(&verifying_key).to_vec();
    block.recompute_hash();
    let signature = crypto::sign(signing_key, &block.hash)?;
    block.signature = signature.to_vec();
    Ok(())
}

/// Length-checks, authorization lookup, and ECDSA verification of a
/// non-genesis block's signature.
pub fn verify_block_signature(
    block: &Block,
    params: &ConsensusParams,
) -> Result<(), ConsensusError> {
    if block.signature.len() != 64 {
        return Err(ConsensusError::InvalidSignature);
    }
    if !matches!(block.validator.len(), 64 | 65) {
        return Err(ConsensusError::InvalidSignature);
    }
    if !params.is_authorized(&block.validator) {
        return Err(ConsensusError::UnauthorizedValidator);
    }
    let verifying_key = crypto::verifying_key_from_bytes(&block.validator)?;
    if !crypto::verify(&verifying_key, &block.hash, &block.signature) {
        return Err(ConsensusError::InvalidSignature);
    }
    Ok(())
}

/// Iterates `nonce = 0, 1, 2, ...`, recomputing the header hash each time,
/// until `hash` has `target_zeros` leading zero bytes.
pub fn mine_block(block: &mut Block, target_zeros: usize) {
    block.nonce = 0;
    block.recompute_hash();
    while !block.meets_target(target_zeros) {
        block.nonce += 1;
        block.recompute_hash();
    }
}

/// Validates `block`'s header against `prev`, the current tip:
/// 1. strictly monotonic timestamp,
/// 2. timestamp not beyond `now + drift_tolerance_secs`,
/// 3. symbolic proof-of-work target met,
/// 4. height and `prev_hash` chain correctly onto `prev`.
pub fn validate_block_header(
    block: &Block,
    prev: &Block,
    params: &ConsensusParams,
) -> Result<(), ConsensusError> {
    if block.timestamp <= prev.timestamp {
        return Err(ConsensusError::HeaderRuleViolation(
            "timestamp does not strictly increase".to_string(),
        ));
    }
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(i64::MAX);
    if block.timestamp > now + params.drift_tolerance_secs {
        return Err(ConsensusError::HeaderRuleViolation(
            "timestamp too far in the future".to_string(),
        ));
    }
    if !block.meets_target(params.target_zeros) {
        return Err(ConsensusError::HeaderRuleViolation(
            "symbolic proof-of-work target not met".to_string(),
        ));
    }
    if block.height != prev.height + 1 || block.prev_hash != prev.hash {
        return Err(ConsensusError::HeaderRuleViolation(
            "height/prev_hash does not chain onto the tip".to_string(),
        ));
    }
    Ok(())
}

/// Builds the designated genesis block: one coinbase transaction minting
/// `genesis.reward` to `genesis.admin_address`, an empty `prev_hash`,
/// `height = 0`, a placeholder validator tag, and no signature. Still
/// mined to satisfy the symbolic proof-of-work target.
pub fn build_genesis(params: &ConsensusParams) -> Result<Block, ConsensusError> {
    let admin = crypto::Address::decode(&params.genesis.admin_address)
        .map_err(|_| ConsensusError::HeaderRuleViolation("invalid genesis admin address".to_string()))?;
    let coinbase = sole_core::Transaction::new_coinbase_at(
        admin.0,
        params.genesis.memo.as_bytes(),
        params.genesis.reward,
        params.genesis.timestamp,
    );
    let mut genesis = Block::new_at(
        vec![coinbase],
        [0u8; 32],
        0,
        GENESIS_VALIDATOR_TAG.to_vec(),
        params.genesis.timestamp,
    );
    mine_block(&mut genesis, params.target_zeros);
    Ok(genesis)
}
