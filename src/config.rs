//! TOML configuration for the miner client.
//!
//! Every field has a default, so a missing file or a partial file both load.
//! The default location is `~/.dice-miner/miner.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::SecurityLevel;

/// Default tick period of the session engine
pub const DEFAULT_TICK_PERIOD_MS: u64 = 10;

/// Default ceiling on the zero bits a single search may be asked for
pub const DEFAULT_MAX_ZERO_BITS: u8 = 40;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Parse error
    #[error("parse error: {0}")]
    ParseError(String),
    /// Semantically invalid value
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// File extensions used for persisted artifacts
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extensions {
    /// Unit files
    #[serde(default = "default_unit_ext")]
    pub unit: String,
    /// Key files
    #[serde(default = "default_key_ext")]
    pub key: String,
    /// Sealed bundles
    #[serde(default = "default_bundle_ext")]
    pub bundle: String,
}

impl Default for Extensions {
    fn default() -> Self {
        Self {
            unit: default_unit_ext(),
            key: default_key_ext(),
            bundle: default_bundle_ext(),
        }
    }
}

/// Miner configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinerConfig {
    /// Name table mapping operator addresses to endpoints
    #[serde(default = "default_names_file")]
    pub names_file: PathBuf,
    /// Handshake downgrade ladder, strongest first
    #[serde(default = "default_security_levels")]
    pub security_levels: Vec<SecurityLevel>,
    /// Engine tick period in milliseconds (default: 10)
    #[serde(default = "default_tick_period_ms")]
    pub tick_period_ms: u64,
    /// Largest difficulty target the miner will search for
    #[serde(default = "default_max_zero_bits")]
    pub max_zero_bits: u8,
    /// Worker threads for accelerated search (0 = available parallelism)
    #[serde(default)]
    pub search_threads: usize,
    /// Artifact file extensions
    #[serde(default)]
    pub extensions: Extensions,
}

fn default_names_file() -> PathBuf {
    MinerConfig::default_dir().join("names.toml")
}

fn default_security_levels() -> Vec<SecurityLevel> {
    SecurityLevel::LADDER.to_vec()
}

fn default_tick_period_ms() -> u64 {
    DEFAULT_TICK_PERIOD_MS
}

fn default_max_zero_bits() -> u8 {
    DEFAULT_MAX_ZERO_BITS
}

fn default_unit_ext() -> String {
    ".dice".to_string()
}

fn default_key_ext() -> String {
    ".key".to_string()
}

fn default_bundle_ext() -> String {
    ".edice".to_string()
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            names_file: default_names_file(),
            security_levels: default_security_levels(),
            tick_period_ms: DEFAULT_TICK_PERIOD_MS,
            max_zero_bits: DEFAULT_MAX_ZERO_BITS,
            search_threads: 0,
            extensions: Extensions::default(),
        }
    }
}

impl MinerConfig {
    /// Directory holding the config, name table and generated keys
    #[must_use]
    pub fn default_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".dice-miner")
    }

    /// Default config file path
    #[must_use]
    pub fn default_path() -> PathBuf {
        Self::default_dir().join("miner.toml")
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed or validated
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, or defaults when the file does not exist
    ///
    /// # Errors
    /// Returns error if an existing file is invalid
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Save to a TOML file
    ///
    /// # Errors
    /// Returns error if the file cannot be written
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check values the engine relies on
    ///
    /// # Errors
    /// Returns error on an empty ladder, a zero tick period or a zero
    /// difficulty ceiling
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.security_levels.is_empty() {
            return Err(ConfigError::Invalid(
                "security_levels must name at least one level".into(),
            ));
        }
        if self.tick_period_ms == 0 {
            return Err(ConfigError::Invalid("tick_period_ms must be positive".into()));
        }
        if self.max_zero_bits == 0 {
            return Err(ConfigError::Invalid("max_zero_bits must be positive".into()));
        }
        Ok(())
    }

    /// Engine tick period
    #[must_use]
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: MinerConfig = toml::from_str(
            r#"
            tick_period_ms = 25
            security_levels = ["chacha20-blake3"]

            [extensions]
            unit = ".unit"
            "#,
        )
        .unwrap();

        assert_eq!(config.tick_period(), Duration::from_millis(25));
        assert_eq!(config.security_levels, vec![SecurityLevel::ChaCha20Blake3]);
        assert_eq!(config.extensions.unit, ".unit");
        assert_eq!(config.extensions.bundle, ".edice");
        assert_eq!(config.search_threads, 0);
        assert_eq!(config.max_zero_bits, DEFAULT_MAX_ZERO_BITS);
    }

    #[test]
    fn test_toml_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("miner.toml");
        let config = MinerConfig::default();
        config.save_to_file(&path).unwrap();
        assert_eq!(MinerConfig::load_from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = MinerConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.tick_period_ms, DEFAULT_TICK_PERIOD_MS);
        assert_eq!(config.security_levels.len(), SecurityLevel::LADDER.len());
    }

    #[test]
    fn test_empty_ladder_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("miner.toml");
        std::fs::write(&path, "security_levels = []\n").unwrap();
        assert!(matches!(
            MinerConfig::load_from_file(&path),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_zero_bit_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("miner.toml");

        std::fs::write(&path, "max_zero_bits = 24\n").unwrap();
        assert_eq!(MinerConfig::load_from_file(&path).unwrap().max_zero_bits, 24);

        std::fs::write(&path, "max_zero_bits = 0\n").unwrap();
        assert!(matches!(
            MinerConfig::load_from_file(&path),
            Err(ConfigError::Invalid(_))
        ));
    }
}
