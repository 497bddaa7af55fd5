//! Cryptographic primitives for the Sole ledger.
//!
//! Centralizes every digest, signature, and address codec the rest of the
//! workspace needs: ECDSA over P-256, double-SHA-256, RIPEMD-160, and
//! Base58Check. Nothing here knows about transactions or blocks.

use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::EncodedPoint;
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid key format")]
    InvalidKey,
    #[error("signing failed")]
    SigningError,
    #[error("verification failed")]
    VerificationError,
    #[error("invalid address")]
    InvalidAddress,
    #[error("signature must be exactly 64 bytes")]
    InvalidSignatureLength,
}

/// RIPEMD160(SHA256(pubkey)) pubkey-hash form of an address (20 bytes).
pub const PUBKEY_HASH_LEN: usize = 20;

/// 0x00, the only address version this ledger issues.
pub const ADDRESS_VERSION: u8 = 0x00;

/// A ledger address: the 20-byte pubkey hash locking an output, together
/// with its Base58Check external encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address(pub [u8; PUBKEY_HASH_LEN]);

impl Address {
    pub fn from_pubkey_hash(hash: [u8; PUBKEY_HASH_LEN]) -> Self {
        Address(hash)
    }

    /// Derives the address directly from a raw X||Y or 0x04||X||Y public key.
    pub fn from_pubkey_bytes(pubkey: &[u8]) -> Self {
        Address(hash_pub_key(pubkey))
    }

    pub fn encode(&self) -> String {
        base58check_encode(ADDRESS_VERSION, &self.0)
    }

    pub fn decode(s: &str) -> Result<Self, CryptoError> {
        let payload = base58check_decode(ADDRESS_VERSION, s)?;
        if payload.len() != PUBKEY_HASH_LEN {
            return Err(CryptoError::InvalidAddress);
        }
        let mut hash = [0u8; PUBKEY_HASH_LEN];
        hash.copy_from_slice(&payload);
        Ok(Address(hash))
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encode())
    }
}

/// Reconstructs and re-verifies the Base58Check checksum; never panics on bad input.
pub fn validate_address(s: &str) -> bool {
    base58check_decode(ADDRESS_VERSION, s).is_ok()
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA256(SHA256(data)); used only for the Base58Check checksum, never for
/// transaction or block identity hashing.
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    sha256(&sha256(data))
}

pub fn ripemd160(data: &[u8]) -> [u8; PUBKEY_HASH_LEN] {
    let mut hasher = Ripemd160::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// RIPEMD160(SHA256(pubkey)), the locking identifier on every output.
pub fn hash_pub_key(pubkey: &[u8]) -> [u8; PUBKEY_HASH_LEN] {
    ripemd160(&sha256(pubkey))
}

pub fn base58check_encode(version: u8, payload: &[u8]) -> String {
    let mut buf = Vec::with_capacity(1 + payload.len() + 4);
    buf.push(version);
    buf.extend_from_slice(payload);
    let checksum = double_sha256(&buf);
    buf.extend_from_slice(&checksum[..4]);
    bs58::encode(buf).into_string()
}

pub fn base58check_decode(expected_version: u8, s: &str) -> Result<Vec<u8>, CryptoError> {
    let raw = bs58::decode(s)
        .into_vec()
        .map_err(|_| CryptoError::InvalidAddress)?;
    if raw.len() < 5 {
        return Err(CryptoError::InvalidAddress);
    }
    let (versioned_payload, checksum) = raw.split_at(raw.len() - 4);
    let expected = double_sha256(versioned_payload);
    if &expected[..4] != checksum {
        return Err(CryptoError::InvalidAddress);
    }
    if versioned_payload[0] != expected_version {
        return Err(CryptoError::InvalidAddress);
    }
    Ok(versioned_payload[1..].to_vec())
}

/// Generates a fresh P-256 keypair using the OS RNG.
pub fn generate_keypair() -> (SigningKey, VerifyingKey) {
    let signing_key = SigningKey::random(&mut rand_core::OsRng);
    let verifying_key = *signing_key.verifying_key();
    (signing_key, verifying_key)
}

/// Serializes a public key as `0x04 || X || Y` (65 bytes).
pub fn public_key_uncompressed(key: &VerifyingKey) -> [u8; 65] {
    let point = key.to_encoded_point(false);
    let bytes = point.as_bytes();
    let mut out = [0u8; 65];
    out.copy_from_slice(bytes);
    out
}

/// Serializes a public key as the raw `X || Y` pair (64 bytes, no tag byte).
pub fn public_key_raw(key: &VerifyingKey) -> [u8; 64] {
    let full = public_key_uncompressed(key);
    let mut out = [0u8; 64];
    out.copy_from_slice(&full[1..]);
    out
}

/// Reconstructs a public key from either wire shape: 64-byte raw `X||Y` or
/// 65-byte uncompressed `0x04||X||Y`. Both normalize to the same identity.
pub fn verifying_key_from_bytes(bytes: &[u8]) -> Result<VerifyingKey, CryptoError> {
    let normalized: std::borrow::Cow<[u8]> = match bytes.len() {
        64 => {
            let mut v = Vec::with_capacity(65);
            v.push(0x04);
            v.extend_from_slice(bytes);
            std::borrow::Cow::Owned(v)
        }
        65 if bytes[0] == 0x04 => std::borrow::Cow::Borrowed(bytes),
        _ => return Err(CryptoError::InvalidKey),
    };
    let point = EncodedPoint::from_bytes(normalized.as_ref()).map_err(|_| CryptoError::InvalidKey)?;
    VerifyingKey::from_encoded_point(&point)
        .into_option()
        .ok_or(CryptoError::InvalidKey)
}

/// Signs a pre-computed 32-byte digest directly (no further hashing), and
/// serializes the result as `r(32, big-endian) || s(32, big-endian)`.
pub fn sign(signing_key: &SigningKey, digest: &[u8; 32]) -> Result<[u8; 64], CryptoError> {
    let sig: Signature = signing_key
        .sign_prehash(digest)
        .map_err(|_| CryptoError::SigningError)?;
    let bytes = sig.to_bytes();
    let mut out = [0u8; 64];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Verifies a 64-byte `r||s` signature over a pre-computed 32-byte digest.
/// Rejects any signature whose length is not 64 rather than panicking.
pub fn verify(verifying_key: &VerifyingKey, digest: &[u8; 32], signature: &[u8]) -> bool {
    if signature.len() != 64 {
        return false;
    }
    let sig = match Signature::from_slice(signature) {
        Ok(s) => s,
        Err(_) => return false,
    };
    verifying_key.verify_prehash(digest, &sig).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_round_trip() {
        let hash = [7u8; PUBKEY_HASH_LEN];
        let addr = Address::from_pubkey_hash(hash);
        let encoded = addr.encode();
        let decoded = Address::decode(&encoded).unwrap();
        assert_eq!(decoded.0, hash);
        assert!(validate_address(&encoded));
    }

    #[test]
    fn address_rejects_corrupted_checksum() {
        let addr = Address::from_pubkey_hash([9u8; PUBKEY_HASH_LEN]);
        let mut encoded = addr.encode();
        encoded.push('z');
        assert!(!validate_address(&encoded));
    }

    #[test]
    fn sign_and_verify_round_trip() {
        let (signing_key, verifying_key) = generate_keypair();
        let digest = sha256(b"a transaction id preimage");
        let signature = sign(&signing_key, &digest).unwrap();
        assert!(verify(&verifying_key, &digest, &signature));
    }

    #[test]
    fn verify_rejects_wrong_digest() {
        let (signing_key, verifying_key) = generate_keypair();
        let digest = sha256(b"original");
        let signature = sign(&signing_key, &digest).unwrap();
        let other_digest = sha256(b"tampered");
        assert!(!verify(&verifying_key, &other_digest, &signature));
    }

    #[test]
    fn verify_rejects_malformed_signature_length() {
        let (_signing_key, verifying_key) = generate_keypair();
        let digest = sha256(b"anything");
        assert!(!verify(&verifying_key, &digest, &[0u8; 10]));
    }

    #[test]
    fn public_key_shapes_normalize_identically() {
        let (_signing_key, verifying_key) = generate_keypair();
        let raw = public_key_raw(&verifying_key);
        let uncompressed = public_key_uncompressed(&verifying_key);
        let from_raw = verifying_key_from_bytes(&raw).unwrap();
        let from_uncompressed = verifying_key_from_bytes(&uncompressed).unwrap();
        assert_eq!(
            public_key_uncompressed(&from_raw),
            public_key_uncompressed(&from_uncompressed)
        );
    }

    #[test]
    fn hash_pub_key_is_twenty_bytes() {
        let (_signing_key, verifying_key) = generate_keypair();
        let raw = public_key_raw(&verifying_key);
        let hash = hash_pub_key(&raw);
        assert_eq!(hash.len(), PUBKEY_HASH_LEN);
    }
}
