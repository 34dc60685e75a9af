//! Operator name resolution.
//!
//! Operators are known by digital address; the name table maps each address
//! to a host and port. The table is a TOML file:
//!
//! ```toml
//! [[node]]
//! address = "0x..."
//! host = "operator.example.org"
//! port = 7300
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use super::Endpoint;
use crate::types::Address;

/// Resolution errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// Address has no entry in the table
    #[error("no endpoint known for {0}")]
    Unknown(Address),
    /// Name table could not be read
    #[error("cannot read name table {path}: {reason}")]
    Io {
        /// Table path
        path: String,
        /// Underlying cause
        reason: String,
    },
    /// Name table could not be parsed
    #[error("invalid name table: {0}")]
    Parse(String),
}

/// Maps an operator address to its endpoint
pub trait NameResolver {
    /// Resolve `address`
    ///
    /// # Errors
    /// Returns [`ResolveError::Unknown`] if the address is not known
    fn resolve(&self, address: &Address) -> Result<Endpoint, ResolveError>;
}

#[derive(Deserialize)]
struct NameTable {
    #[serde(default)]
    node: Vec<NodeEntry>,
}

#[derive(Deserialize)]
struct NodeEntry {
    address: Address,
    host: String,
    port: u16,
}

/// Resolver backed by a TOML name table
#[derive(Clone, Debug, Default)]
pub struct FileResolver {
    entries: HashMap<Address, Endpoint>,
}

impl FileResolver {
    /// Load a name table from disk
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self, ResolveError> {
        let content = std::fs::read_to_string(path).map_err(|e| ResolveError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Parse a name table
    ///
    /// # Errors
    /// Returns error if the text is not a valid table
    pub fn from_toml(content: &str) -> Result<Self, ResolveError> {
        let table: NameTable =
            toml::from_str(content).map_err(|e| ResolveError::Parse(e.to_string()))?;
        let entries = table
            .node
            .into_iter()
            .map(|n| (n.address, Endpoint::new(n.host, n.port)))
            .collect();
        Ok(Self { entries })
    }

    /// Number of known operators
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl NameResolver for FileResolver {
    fn resolve(&self, address: &Address) -> Result<Endpoint, ResolveError> {
        self.entries
            .get(address)
            .cloned()
            .ok_or(ResolveError::Unknown(*address))
    }
}

/// Resolver that maps every address to one endpoint
#[cfg(test)]
#[derive(Clone, Debug)]
pub struct StaticResolver(pub Endpoint);

#[cfg(test)]
impl NameResolver for StaticResolver {
    fn resolve(&self, _address: &Address) -> Result<Endpoint, ResolveError> {
        Ok(self.0.clone())
    }
}
