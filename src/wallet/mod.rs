//! Key files.
//!
//! A key file holds one X25519 key pair as JSON. The digital address is
//! stored alongside the private key so a damaged or mismatched file is
//! caught on load rather than producing units for the wrong owner.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::crypto::{KeyPair, SECRET_KEY_SIZE};
use crate::types::{Address, Timestamp};

/// Current key file format version
const KEY_FILE_VERSION: u8 = 1;

/// Algorithm identifier written to key files
const KEY_ALGORITHM: &str = "x25519";

/// Key file format (v1: X25519)
#[derive(Serialize, Deserialize)]
struct KeyFileJson {
    /// Version for compatibility
    version: u8,
    /// Algorithm identifier
    algorithm: String,
    /// Private key (hex)
    private_key: String,
    /// Digital address (hex-dash)
    digital_address: String,
    /// Optional label
    name: Option<String>,
    /// Creation timestamp
    created_at: Timestamp,
}

/// A key pair bound to a file on disk
pub struct KeyFile {
    keypair: KeyPair,
    /// Optional label
    pub name: Option<String>,
    /// Path the key was loaded from or saved to
    pub path: Option<PathBuf>,
}

impl KeyFile {
    /// Generate a fresh key
    #[must_use]
    pub fn generate() -> Self {
        Self::from_keypair(KeyPair::generate())
    }

    /// Wrap an existing key pair
    #[must_use]
    pub fn from_keypair(keypair: KeyPair) -> Self {
        Self {
            keypair,
            name: None,
            path: None,
        }
    }

    /// Digital address
    #[must_use]
    pub fn address(&self) -> Address {
        self.keypair.address()
    }

    /// Borrow the key pair
    #[must_use]
    pub fn keypair(&self) -> &KeyPair {
        &self.keypair
    }

    /// Consume into the key pair
    #[must_use]
    pub fn into_keypair(self) -> KeyPair {
        self.keypair
    }

    /// Save to `path`, creating parent directories.
    ///
    /// # Errors
    /// Returns error if the file cannot be written
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<(), KeyFileError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| KeyFileError::IoError(e.to_string()))?;
            }
        }

        let key_file = KeyFileJson {
            version: KEY_FILE_VERSION,
            algorithm: KEY_ALGORITHM.to_string(),
            private_key: hex::encode(self.keypair.secret_bytes().as_slice()),
            digital_address: self.address().to_hex_dash(),
            name: self.name.clone(),
            created_at: crate::types::now_millis(),
        };

        let json = serde_json::to_string_pretty(&key_file)
            .map_err(|e| KeyFileError::SerializationError(e.to_string()))?;

        let mut file = File::create(path).map_err(|e| KeyFileError::IoError(e.to_string()))?;
        file.write_all(json.as_bytes())
            .map_err(|e| KeyFileError::IoError(e.to_string()))?;

        self.path = Some(path.to_path_buf());
        Ok(())
    }

    /// Load a key file and check the stored address matches the key.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or is invalid
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, KeyFileError> {
        let path = path.as_ref();

        let mut file = File::open(path).map_err(|e| KeyFileError::IoError(e.to_string()))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| KeyFileError::IoError(e.to_string()))?;

        let key_file: KeyFileJson = serde_json::from_str(&contents)
            .map_err(|e| KeyFileError::SerializationError(e.to_string()))?;

        if key_file.version != KEY_FILE_VERSION {
            return Err(KeyFileError::UnsupportedVersion(key_file.version));
        }
        if key_file.algorithm != KEY_ALGORITHM {
            return Err(KeyFileError::InvalidKey(format!(
                "unsupported algorithm {}",
                key_file.algorithm
            )));
        }

        let secret = zeroize::Zeroizing::new(
            hex::decode(&key_file.private_key)
                .map_err(|e| KeyFileError::InvalidKey(e.to_string()))?,
        );
        if secret.len() != SECRET_KEY_SIZE {
            return Err(KeyFileError::InvalidKey(format!(
                "expected {} bytes, got {}",
                SECRET_KEY_SIZE,
                secret.len()
            )));
        }
        let keypair = KeyPair::from_secret_bytes(&secret)
            .map_err(|e| KeyFileError::InvalidKey(e.to_string()))?;

        let stored = Address::parse(&key_file.digital_address)
            .map_err(|e| KeyFileError::InvalidKey(e.to_string()))?;
        if stored != keypair.address() {
            return Err(KeyFileError::AddressMismatch {
                stored,
                derived: keypair.address(),
            });
        }

        Ok(Self {
            keypair,
            name: key_file.name,
            path: Some(path.to_path_buf()),
        })
    }

    /// Default directory for generated keys
    #[must_use]
    pub fn default_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".dice-miner")
            .join("keys")
    }
}

/// Key file errors
#[derive(Debug, thiserror::Error)]
pub enum KeyFileError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),
    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),
    /// Invalid key
    #[error("invalid key: {0}")]
    InvalidKey(String),
    /// Stored address does not belong to the stored key
    #[error("key file address {stored} does not match key ({derived})")]
    AddressMismatch {
        /// Address written in the file
        stored: Address,
        /// Address derived from the private key
        derived: Address,
    },
    /// Unsupported key file version
    #[error("unsupported key file version: {0}")]
    UnsupportedVersion(u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_file_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("miner.key");

        let mut key = KeyFile::generate();
        key.name = Some("test".to_string());
        key.save(&path).unwrap();

        let loaded = KeyFile::load(&path).unwrap();
        assert_eq!(loaded.address(), key.address());
        assert_eq!(loaded.name.as_deref(), Some("test"));
        assert_eq!(loaded.path.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_tampered_address_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("miner.key");
        KeyFile::generate().save(&path).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let mut json: serde_json::Value = serde_json::from_str(&contents).unwrap();
        json["digital_address"] = KeyPair::generate().address().to_hex_dash().into();
        fs::write(&path, json.to_string()).unwrap();

        assert!(matches!(
            KeyFile::load(&path),
            Err(KeyFileError::AddressMismatch { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            KeyFile::load(dir.path().join("absent.key")),
            Err(KeyFileError::IoError(_))
        ));
    }
}
