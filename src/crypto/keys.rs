//! X25519 key pairs.
//!
//! The public half of a key pair is the owner's digital address. Static
//! Diffie-Hellman between two addresses gives both sides the same secret
//! without any exchange, which is what lets a unit be sealed to a new owner
//! offline.

use rand::rngs::OsRng;
use std::fmt;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use super::{CryptoError, CryptoResult};
use crate::types::Address;

/// X25519 secret key size in bytes
pub const SECRET_KEY_SIZE: usize = 32;

/// A key pair: static secret plus the digital address derived from it.
///
/// SECURITY: does not implement Clone; the secret is zeroized on drop.
pub struct KeyPair {
    secret: StaticSecret,
    address: Address,
}

impl KeyPair {
    /// Generate a new random key pair
    #[must_use]
    pub fn generate() -> Self {
        Self::from_secret(StaticSecret::random_from_rng(OsRng))
    }

    /// Deterministically build a key pair from 32 secret bytes
    #[must_use]
    pub fn from_seed(seed: [u8; SECRET_KEY_SIZE]) -> Self {
        Self::from_secret(StaticSecret::from(seed))
    }

    /// Restore from stored secret bytes
    ///
    /// # Errors
    /// Returns error if the slice is not 32 bytes
    pub fn from_secret_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        let seed: [u8; SECRET_KEY_SIZE] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidSecretKey(format!(
                "expected {} bytes, got {}",
                SECRET_KEY_SIZE,
                bytes.len()
            ))
        })?;
        Ok(Self::from_seed(seed))
    }

    fn from_secret(secret: StaticSecret) -> Self {
        let address = Address::from_bytes(PublicKey::from(&secret).to_bytes());
        Self { secret, address }
    }

    /// The digital address (public key)
    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    /// Raw secret bytes, for persistence
    #[must_use]
    pub fn secret_bytes(&self) -> Zeroizing<[u8; SECRET_KEY_SIZE]> {
        Zeroizing::new(self.secret.to_bytes())
    }

    /// Static Diffie-Hellman with a peer address
    #[must_use]
    pub fn diffie_hellman(&self, peer: &Address) -> Zeroizing<[u8; 32]> {
        let peer = PublicKey::from(*peer.as_bytes());
        Zeroizing::new(self.secret.diffie_hellman(&peer).to_bytes())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
