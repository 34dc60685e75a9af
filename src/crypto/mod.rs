//! Cryptographic primitives for the miner client.
//!
//! - X25519 static keys double as digital addresses
//! - X25519 ephemeral keys for the certificate handshake
//! - ChaCha20-Poly1305 / XChaCha20-Poly1305 for session payloads and bundles
//! - SHA3-256, SHA-256 and BLAKE3 as per-level key derivation functions
//! - SHA3-256 for unit hashing
//! - bip39 for standard mnemonic seed phrases

pub mod cipher;
mod keys;
mod mnemonic;

pub use cipher::{
    CertificateVerdict, CipherError, CipherResult, CipherSession, SealedCipher, SecurityLevel,
};
pub use keys::{KeyPair, SECRET_KEY_SIZE};
pub use mnemonic::{
    generate_mnemonic, keypair_from_mnemonic, keypair_from_phrase, parse_mnemonic,
    MNEMONIC_WORD_COUNT,
};

use sha3::{Digest, Sha3_256};
use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Invalid secret key material
    #[error("invalid secret key: {0}")]
    InvalidSecretKey(String),
    /// Invalid mnemonic phrase
    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),
}

/// Result type for crypto operations
pub type CryptoResult<T> = Result<T, CryptoError>;

/// SHA3-256 of `data`
#[must_use]
pub fn sha3_256(data: &[u8]) -> [u8; 32] {
    Sha3_256::digest(data).into()
}
