//! Persistence of units and sealed bundles.
//!
//! Output files are never overwritten. Writing `out` with extension `.dice`
//! tries `out.dice`, then `out.0.dice`, `out.1.dice` and so on, creating the
//! first name that does not exist yet.

use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crypto::{CipherError, CipherSession};
use crate::types::{Address, Unit, UnitError};

/// Result type for persistence
pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Filesystem error
    #[error("cannot access {path}: {reason}")]
    Io {
        /// File involved
        path: String,
        /// Underlying cause
        reason: String,
    },
    /// File content is not in the expected format
    #[error("invalid file format: {0}")]
    Format(String),
    /// Sealing or opening failed
    #[error("sealed unit: {0}")]
    Cipher(#[from] CipherError),
    /// Unit content could not be decoded
    #[error("invalid unit: {0}")]
    Unit(#[from] UnitError),
}

impl StoreError {
    fn io(path: &Path, e: &io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        }
    }

    /// Whether the file was readable but its content was not usable
    #[must_use]
    pub fn is_content_error(&self) -> bool {
        !matches!(self, Self::Io { .. })
    }
}

/// A unit sealed to a new owner, as written to disk
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBundle {
    /// Address of the owner who sealed the unit
    pub sender: Address,
    /// Sealed unit text (hex)
    pub unit: String,
}

impl EncryptedBundle {
    /// Seal `unit` to `recipient`
    ///
    /// # Errors
    /// Returns error if sealing fails
    pub fn seal(
        cipher: &dyn CipherSession,
        sender: Address,
        unit: &Unit,
        recipient: &Address,
    ) -> StoreResult<Self> {
        let sealed = cipher.seal_file(unit.to_text().as_bytes(), recipient)?;
        Ok(Self {
            sender,
            unit: hex::encode(sealed),
        })
    }

    /// Open the sealed unit with the recipient's cipher
    ///
    /// # Errors
    /// Returns error if the content does not decrypt or decode
    pub fn open(&self, cipher: &dyn CipherSession) -> StoreResult<Unit> {
        let sealed = hex::decode(&self.unit).map_err(|e| StoreError::Format(e.to_string()))?;
        let text = cipher.open_file(&sealed, &self.sender)?;
        let text = String::from_utf8(text).map_err(|e| StoreError::Format(e.to_string()))?;
        Ok(Unit::from_text(&text)?)
    }
}

fn candidate(base: &Path, ext: &str, index: Option<u32>) -> PathBuf {
    let mut name: OsString = base.as_os_str().to_os_string();
    if let Some(index) = index {
        name.push(format!(".{index}"));
    }
    name.push(ext);
    PathBuf::from(name)
}

/// First path in the suffix sequence that does not exist yet
#[must_use]
pub fn unique_path(base: &Path, ext: &str) -> PathBuf {
    std::iter::once(None)
        .chain((0..).map(Some))
        .map(|index| candidate(base, ext, index))
        .find(|path| !path.exists())
        .unwrap_or_else(|| candidate(base, ext, None))
}

/// Write `contents` to the first free path in the suffix sequence
///
/// # Errors
/// Returns error on any filesystem failure other than a taken name
pub fn write_new(base: &Path, ext: &str, contents: &[u8]) -> StoreResult<PathBuf> {
    for index in std::iter::once(None).chain((0..u32::MAX).map(Some)) {
        let path = candidate(base, ext, index);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(StoreError::io(&path, &e)),
        };
        file.write_all(contents)
            .map_err(|e| StoreError::io(&path, &e))?;
        debug!(path = %path.display(), bytes = contents.len(), "written");
        return Ok(path);
    }
    Err(StoreError::Io {
        path: base.display().to_string(),
        reason: "no free file name".into(),
    })
}

/// Persist a unit in its textual encoding
///
/// # Errors
/// Returns error if the file cannot be written
pub fn save_unit(base: &Path, ext: &str, unit: &Unit) -> StoreResult<PathBuf> {
    write_new(base, ext, unit.to_text().as_bytes())
}

/// Load a unit file
///
/// # Errors
/// Returns error if the file cannot be read or decoded
pub fn read_unit(path: &Path) -> StoreResult<Unit> {
    let text = fs::read_to_string(path).map_err(|e| StoreError::io(path, &e))?;
    Ok(Unit::from_text(&text)?)
}

/// Persist a sealed bundle as JSON
///
/// # Errors
/// Returns error if the file cannot be written
pub fn save_bundle(base: &Path, ext: &str, bundle: &EncryptedBundle) -> StoreResult<PathBuf> {
    let json =
        serde_json::to_vec_pretty(bundle).map_err(|e| StoreError::Format(e.to_string()))?;
    write_new(base, ext, &json)
}

/// Load a sealed bundle
///
/// # Errors
/// Returns error if the file cannot be read or is not a bundle
pub fn read_bundle(path: &Path) -> StoreResult<EncryptedBundle> {
    let text = fs::read_to_string(path).map_err(|e| StoreError::io(path, &e))?;
    serde_json::from_str(&text).map_err(|e| StoreError::Format(e.to_string()))
}

/// Load and open a bundle in one step
///
/// # Errors
/// Returns [`StoreError::Io`] if unreadable, a content error otherwise
pub fn open_bundle(path: &Path, cipher: &dyn CipherSession) -> StoreResult<Unit> {
    read_bundle(path)?.open(cipher)
}
