//! Cipher sessions and the certificate handshake.
//!
//! Before any payload is exchanged with an operator both sides swap
//! certificates. A certificate names the sender, the intended recipient, the
//! sender's security level and a fresh X25519 ephemeral key. Accepting the
//! peer's certificate mixes the static and ephemeral Diffie-Hellman secrets
//! through the level's KDF into a session key.
//!
//! Acceptance has three outcomes:
//! - `Ok(Accepted(id))`: session key established
//! - `Ok(Rejected(reason))`: structurally unusable certificate, try again
//! - `Err(IncompatibleLevel)`: the peer speaks another level
//!
//! Without an established session, payloads fall back to a key derived from
//! the static Diffie-Hellman secret alone. Bundles sealed for a third party
//! always use that static path under a fixed level.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce, XChaCha20Poly1305, XNonce,
};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sha3::{Digest, Sha3_256};
use std::fmt;
use std::str::FromStr;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use super::KeyPair;
use crate::types::Address;

/// Certificate format version
const CERTIFICATE_VERSION: u8 = 1;

/// Poly1305 tag size
const TAG_SIZE: usize = 16;

const SESSION_CONTEXT: &str = "dice-miner session key v1";
const SESSION_ID_CONTEXT: &str = "dice-miner session id v1";
const STATIC_CONTEXT: &str = "dice-miner static key v1";
const BUNDLE_CONTEXT: &str = "dice-miner bundle key v1";

/// Level used for bundles sealed to a new owner
const BUNDLE_LEVEL: SecurityLevel = SecurityLevel::XChaCha20Sha3;

/// Result type for cipher operations
pub type CipherResult<T> = Result<T, CipherError>;

/// A cipher suite the handshake can run under
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecurityLevel {
    /// XChaCha20-Poly1305, SHA3-256 KDF
    #[serde(rename = "xchacha20-sha3")]
    XChaCha20Sha3,
    /// ChaCha20-Poly1305, SHA-256 KDF
    #[serde(rename = "chacha20-sha256")]
    ChaCha20Sha256,
    /// ChaCha20-Poly1305, BLAKE3 KDF
    #[serde(rename = "chacha20-blake3")]
    ChaCha20Blake3,
}

impl SecurityLevel {
    /// Default downgrade ladder, strongest first
    pub const LADDER: [Self; 3] = [
        Self::XChaCha20Sha3,
        Self::ChaCha20Sha256,
        Self::ChaCha20Blake3,
    ];

    /// Wire name of the level
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::XChaCha20Sha3 => "xchacha20-sha3",
            Self::ChaCha20Sha256 => "chacha20-sha256",
            Self::ChaCha20Blake3 => "chacha20-blake3",
        }
    }

    fn nonce_len(self) -> usize {
        match self {
            Self::XChaCha20Sha3 => 24,
            Self::ChaCha20Sha256 | Self::ChaCha20Blake3 => 12,
        }
    }

    fn derive_key(self, context: &str, parts: &[&[u8]]) -> Zeroizing<[u8; 32]> {
        let key = match self {
            Self::XChaCha20Sha3 => digest_parts::<Sha3_256>(context, parts),
            Self::ChaCha20Sha256 => digest_parts::<Sha256>(context, parts),
            Self::ChaCha20Blake3 => {
                let mut hasher = blake3::Hasher::new_derive_key(context);
                for part in parts {
                    hasher.update(&(part.len() as u32).to_be_bytes());
                    hasher.update(part);
                }
                *hasher.finalize().as_bytes()
            }
        };
        Zeroizing::new(key)
    }

    fn seal(self, key: &[u8; 32], plaintext: &[u8]) -> CipherResult<Vec<u8>> {
        let mut nonce = vec![0u8; self.nonce_len()];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = match self {
            Self::XChaCha20Sha3 => XChaCha20Poly1305::new(Key::from_slice(key))
                .encrypt(XNonce::from_slice(&nonce), plaintext),
            Self::ChaCha20Sha256 | Self::ChaCha20Blake3 => {
                ChaCha20Poly1305::new(Key::from_slice(key))
                    .encrypt(Nonce::from_slice(&nonce), plaintext)
            }
        }
        .map_err(|_| CipherError::Encrypt)?;

        nonce.extend_from_slice(&ciphertext);
        Ok(nonce)
    }

    fn open(self, key: &[u8; 32], sealed: &[u8]) -> CipherResult<Vec<u8>> {
        let nonce_len = self.nonce_len();
        if sealed.len() < nonce_len + TAG_SIZE {
            return Err(CipherError::Decrypt);
        }
        let (nonce, ciphertext) = sealed.split_at(nonce_len);

        match self {
            Self::XChaCha20Sha3 => XChaCha20Poly1305::new(Key::from_slice(key))
                .decrypt(XNonce::from_slice(nonce), ciphertext),
            Self::ChaCha20Sha256 | Self::ChaCha20Blake3 => {
                ChaCha20Poly1305::new(Key::from_slice(key))
                    .decrypt(Nonce::from_slice(nonce), ciphertext)
            }
        }
        .map_err(|_| CipherError::Decrypt)
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SecurityLevel {
    type Err = CipherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::LADDER
            .into_iter()
            .find(|level| level.name() == s)
            .ok_or_else(|| CipherError::UnknownLevel(s.to_string()))
    }
}

fn digest_parts<D: Digest>(context: &str, parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = D::new();
    hasher.update(context.as_bytes());
    for part in parts {
        hasher.update((part.len() as u32).to_be_bytes());
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest[..32]);
    out
}

/// Result of a non-failing certificate acceptance
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CertificateVerdict {
    /// Session established; carries a short session identifier
    Accepted(String),
    /// Certificate unusable as received
    Rejected(String),
}

/// Cipher errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CipherError {
    /// Peer certificate was issued under another security level
    #[error("incompatible security level: local {local}, peer {remote}")]
    IncompatibleLevel {
        /// Level in force locally
        local: SecurityLevel,
        /// Level named by the peer
        remote: String,
    },
    /// Unknown security level name
    #[error("unknown security level: {0}")]
    UnknownLevel(String),
    /// Encryption failed
    #[error("encryption failed")]
    Encrypt,
    /// Ciphertext malformed or failed authentication
    #[error("decryption failed")]
    Decrypt,
    /// Certificate could not be serialized
    #[error("certificate encoding failed: {0}")]
    Encoding(String),
}

/// Session cipher as seen by the protocol engine.
pub trait CipherSession {
    /// Level currently in force
    fn security_level(&self) -> SecurityLevel;

    /// Switch level; discards any established session
    fn set_security_level(&mut self, level: SecurityLevel);

    /// Issue a fresh handshake certificate addressed to `peer`
    fn issue_certificate(&mut self, peer: &Address) -> CipherResult<Vec<u8>>;

    /// Accept the certificate `peer` sent back
    fn accept_certificate(
        &mut self,
        certificate: &[u8],
        peer: &Address,
    ) -> CipherResult<CertificateVerdict>;

    /// Encrypt a payload for `peer`
    fn encrypt(&self, plaintext: &[u8], peer: &Address) -> CipherResult<Vec<u8>>;

    /// Decrypt a payload from `peer`
    fn decrypt(&self, ciphertext: &[u8], peer: &Address) -> CipherResult<Vec<u8>>;

    /// Seal data for a recipient who is not part of the session
    fn seal_file(&self, plaintext: &[u8], recipient: &Address) -> CipherResult<Vec<u8>>;

    /// Open data sealed by `sender` with [`CipherSession::seal_file`]
    fn open_file(&self, sealed: &[u8], sender: &Address) -> CipherResult<Vec<u8>>;
}

#[derive(Serialize, Deserialize)]
struct Certificate {
    version: u8,
    level: String,
    sender: Address,
    recipient: Address,
    ephemeral: String,
}

struct SessionKey {
    peer: Address,
    level: SecurityLevel,
    key: Zeroizing<[u8; 32]>,
}

/// X25519 + ChaCha20-Poly1305 cipher session.
pub struct SealedCipher {
    keypair: KeyPair,
    level: SecurityLevel,
    ephemeral: Option<StaticSecret>,
    session: Option<SessionKey>,
}

impl SealedCipher {
    /// Create a cipher for `keypair` starting at `level`
    #[must_use]
    pub fn new(keypair: KeyPair, level: SecurityLevel) -> Self {
        Self {
            keypair,
            level,
            ephemeral: None,
            session: None,
        }
    }

    /// Local digital address
    #[must_use]
    pub fn address(&self) -> Address {
        self.keypair.address()
    }

    /// Whether a handshake has completed
    #[must_use]
    pub fn is_established(&self) -> bool {
        self.session.is_some()
    }

    fn payload_key(&self, peer: &Address) -> (SecurityLevel, Zeroizing<[u8; 32]>) {
        match &self.session {
            Some(session) if session.peer == *peer => (session.level, session.key.clone()),
            _ => {
                let shared = self.keypair.diffie_hellman(peer);
                (
                    self.level,
                    self.level.derive_key(STATIC_CONTEXT, &[shared.as_slice()]),
                )
            }
        }
    }

    fn bundle_key(&self, peer: &Address) -> Zeroizing<[u8; 32]> {
        let shared = self.keypair.diffie_hellman(peer);
        BUNDLE_LEVEL.derive_key(BUNDLE_CONTEXT, &[shared.as_slice()])
    }
}

impl CipherSession for SealedCipher {
    fn security_level(&self) -> SecurityLevel {
        self.level
    }

    fn set_security_level(&mut self, level: SecurityLevel) {
        self.level = level;
        self.ephemeral = None;
        self.session = None;
    }

    fn issue_certificate(&mut self, peer: &Address) -> CipherResult<Vec<u8>> {
        let ephemeral = StaticSecret::random_from_rng(OsRng);
        let certificate = Certificate {
            version: CERTIFICATE_VERSION,
            level: self.level.name().to_string(),
            sender: self.keypair.address(),
            recipient: *peer,
            ephemeral: hex::encode(PublicKey::from(&ephemeral).as_bytes()),
        };
        let bytes =
            serde_json::to_vec(&certificate).map_err(|e| CipherError::Encoding(e.to_string()))?;

        self.ephemeral = Some(ephemeral);
        self.session = None;
        Ok(bytes)
    }

    fn accept_certificate(
        &mut self,
        certificate: &[u8],
        peer: &Address,
    ) -> CipherResult<CertificateVerdict> {
        let Ok(cert) = serde_json::from_slice::<Certificate>(certificate) else {
            return Ok(CertificateVerdict::Rejected("malformed certificate".into()));
        };
        if cert.version != CERTIFICATE_VERSION {
            return Ok(CertificateVerdict::Rejected(format!(
                "unsupported certificate version {}",
                cert.version
            )));
        }
        if cert.level != self.level.name() {
            return Err(CipherError::IncompatibleLevel {
                local: self.level,
                remote: cert.level,
            });
        }
        if cert.sender != *peer {
            return Ok(CertificateVerdict::Rejected(format!(
                "certificate issued by {}, expected {}",
                cert.sender, peer
            )));
        }
        if cert.recipient != self.keypair.address() {
            return Ok(CertificateVerdict::Rejected(
                "certificate addressed to another party".into(),
            ));
        }
        let Some(peer_ephemeral) = hex::decode(&cert.ephemeral)
            .ok()
            .and_then(|bytes| <[u8; 32]>::try_from(bytes).ok())
        else {
            return Ok(CertificateVerdict::Rejected(
                "certificate carries no usable ephemeral key".into(),
            ));
        };
        let Some(own_ephemeral) = self.ephemeral.as_ref() else {
            return Ok(CertificateVerdict::Rejected(
                "no local certificate outstanding".into(),
            ));
        };

        let own_public = PublicKey::from(own_ephemeral).to_bytes();
        let (low, high) = if own_public <= peer_ephemeral {
            (own_public, peer_ephemeral)
        } else {
            (peer_ephemeral, own_public)
        };
        let static_shared = self.keypair.diffie_hellman(peer);
        let ephemeral_shared = Zeroizing::new(
            own_ephemeral
                .diffie_hellman(&PublicKey::from(peer_ephemeral))
                .to_bytes(),
        );

        let key = self.level.derive_key(
            SESSION_CONTEXT,
            &[
                static_shared.as_slice(),
                ephemeral_shared.as_slice(),
                &low,
                &high,
            ],
        );
        let id = hex::encode(
            &self
                .level
                .derive_key(SESSION_ID_CONTEXT, &[key.as_slice()])[..8],
        );

        self.session = Some(SessionKey {
            peer: *peer,
            level: self.level,
            key,
        });
        Ok(CertificateVerdict::Accepted(id))
    }

    fn encrypt(&self, plaintext: &[u8], peer: &Address) -> CipherResult<Vec<u8>> {
        let (level, key) = self.payload_key(peer);
        level.seal(&key, plaintext)
    }

    fn decrypt(&self, ciphertext: &[u8], peer: &Address) -> CipherResult<Vec<u8>> {
        let (level, key) = self.payload_key(peer);
        level.open(&key, ciphertext)
    }

    fn seal_file(&self, plaintext: &[u8], recipient: &Address) -> CipherResult<Vec<u8>> {
        BUNDLE_LEVEL.seal(&self.bundle_key(recipient), plaintext)
    }

    fn open_file(&self, sealed: &[u8], sender: &Address) -> CipherResult<Vec<u8>> {
        BUNDLE_LEVEL.open(&self.bundle_key(sender), sealed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(level: SecurityLevel) -> (SealedCipher, SealedCipher) {
        (
            SealedCipher::new(KeyPair::generate(), level),
            SealedCipher::new(KeyPair::generate(), level),
        )
    }

    /// Run the handshake the way client and operator do: client issues, the
    /// operator answers with its own certificate and accepts the client's.
    fn handshake(client: &mut SealedCipher, server: &mut SealedCipher) -> CertificateVerdict {
        let client_addr = client.address();
        let server_addr = server.address();
        let client_cert = client.issue_certificate(&server_addr).unwrap();
        let server_cert = server.issue_certificate(&client_addr).unwrap();
        server.accept_certificate(&client_cert, &client_addr).unwrap();
        client.accept_certificate(&server_cert, &server_addr).unwrap()
    }

    #[test]
    fn test_handshake_yields_shared_session() {
        for level in SecurityLevel::LADDER {
            let (mut client, mut server) = pair(level);
            assert!(matches!(
                handshake(&mut client, &mut server),
                CertificateVerdict::Accepted(_)
            ));

            let sealed = server.encrypt(b"{\"zeroes\":20}", &client.address()).unwrap();
            let opened = client.decrypt(&sealed, &server.address()).unwrap();
            assert_eq!(opened, b"{\"zeroes\":20}");
        }
    }

    #[test]
    fn test_level_mismatch_is_an_error() {
        let mut client = SealedCipher::new(KeyPair::generate(), SecurityLevel::XChaCha20Sha3);
        let mut server = SealedCipher::new(KeyPair::generate(), SecurityLevel::ChaCha20Blake3);
        let cert = server.issue_certificate(&client.address()).unwrap();
        client.issue_certificate(&server.address()).unwrap();

        let err = client
            .accept_certificate(&cert, &server.address())
            .unwrap_err();
        assert!(matches!(err, CipherError::IncompatibleLevel { .. }));
    }

    #[test]
    fn test_garbage_certificate_is_rejected_not_failed() {
        let (mut client, server) = pair(SecurityLevel::ChaCha20Sha256);
        client.issue_certificate(&server.address()).unwrap();
        let verdict = client
            .accept_certificate(b"not a certificate", &server.address())
            .unwrap();
        assert!(matches!(verdict, CertificateVerdict::Rejected(_)));
    }

    #[test]
    fn test_certificate_from_wrong_sender_rejected() {
        let (mut client, mut server) = pair(SecurityLevel::ChaCha20Sha256);
        let impostor = KeyPair::generate().address();
        client.issue_certificate(&impostor).unwrap();
        let cert = server.issue_certificate(&client.address()).unwrap();
        let verdict = client.accept_certificate(&cert, &impostor).unwrap();
        assert!(matches!(verdict, CertificateVerdict::Rejected(_)));
    }

    #[test]
    fn test_static_payloads_before_handshake() {
        let (client, server) = pair(SecurityLevel::ChaCha20Blake3);
        let sealed = client.encrypt(b"claim", &server.address()).unwrap();
        assert_eq!(server.decrypt(&sealed, &client.address()).unwrap(), b"claim");
    }

    #[test]
    fn test_tampered_payload_fails() {
        let (client, server) = pair(SecurityLevel::XChaCha20Sha3);
        let mut sealed = client.encrypt(b"claim", &server.address()).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert_eq!(
            server.decrypt(&sealed, &client.address()),
            Err(CipherError::Decrypt)
        );
        assert_eq!(
            server.decrypt(b"short", &client.address()),
            Err(CipherError::Decrypt)
        );
    }

    #[test]
    fn test_bundle_opens_only_for_recipient() {
        let owner = SealedCipher::new(KeyPair::generate(), SecurityLevel::ChaCha20Sha256);
        let buyer = SealedCipher::new(KeyPair::generate(), SecurityLevel::ChaCha20Blake3);
        let stranger = SealedCipher::new(KeyPair::generate(), SecurityLevel::XChaCha20Sha3);

        let sealed = owner.seal_file(b"unit", &buyer.address()).unwrap();
        assert_eq!(buyer.open_file(&sealed, &owner.address()).unwrap(), b"unit");
        assert!(stranger.open_file(&sealed, &owner.address()).is_err());
    }

    #[test]
    fn test_level_names_roundtrip() {
        for level in SecurityLevel::LADDER {
            assert_eq!(level.name().parse::<SecurityLevel>().unwrap(), level);
        }
        assert!("rot13".parse::<SecurityLevel>().is_err());
    }
}
