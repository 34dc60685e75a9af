//! BIP39 mnemonic seed phrases for key recovery.
//!
//! Derivation path: mnemonic -> BIP39 seed (with passphrase)
//! -> BLAKE3(domain || seed) -> 32-byte X25519 secret.
//!
//! The same mnemonic always produces the same digital address.

use bip39::{Language, Mnemonic};
use rand::RngCore;

use super::{CryptoError, CryptoResult, KeyPair};

/// Number of words in the mnemonic (24 words = 256 bits of entropy)
pub const MNEMONIC_WORD_COUNT: usize = 24;

/// Domain separator for X25519 key derivation from a BIP39 seed
const X25519_KDF_DOMAIN: &[u8] = b"dice-miner-x25519-keygen-v1";

/// Generate a new random 24-word English mnemonic.
#[must_use]
pub fn generate_mnemonic() -> Mnemonic {
    let mut entropy = [0u8; MNEMONIC_WORD_COUNT * 4 / 3];
    rand::rngs::OsRng.fill_bytes(&mut entropy);
    Mnemonic::from_entropy_in(Language::English, &entropy)
        .expect("entropy length is valid for 24-word mnemonic")
}

/// Parse a mnemonic phrase.
///
/// # Errors
/// Returns error if the phrase is invalid (wrong words, checksum, etc.)
pub fn parse_mnemonic(phrase: &str) -> CryptoResult<Mnemonic> {
    Mnemonic::parse_in(Language::English, phrase)
        .map_err(|e| CryptoError::InvalidMnemonic(e.to_string()))
}

/// Deterministically derive a key pair from a mnemonic.
#[must_use]
pub fn keypair_from_mnemonic(mnemonic: &Mnemonic, passphrase: &str) -> KeyPair {
    let bip39_seed = mnemonic.to_seed(passphrase);

    let mut hasher = blake3::Hasher::new();
    hasher.update(X25519_KDF_DOMAIN);
    hasher.update(&bip39_seed);
    let seed: [u8; 32] = *hasher.finalize().as_bytes();

    KeyPair::from_seed(seed)
}

/// Derive a key pair from a phrase string.
///
/// # Errors
/// Returns error if the phrase is invalid
pub fn keypair_from_phrase(phrase: &str, passphrase: &str) -> CryptoResult<KeyPair> {
    let mnemonic = parse_mnemonic(phrase)?;
    Ok(keypair_from_mnemonic(&mnemonic, passphrase))
}
