//! # Session Configuration
//!
//! One TOML file with a table per layer:
//!
//! ```toml
//! session_level_id = 3
//! nat_pmp_gateway = "192.168.1.1"
//!
//! [transport]
//! join_timeout_ms = 2000
//!
//! [exchange]
//! exchange_timeout_ms = 8000
//!
//! [persistence]
//! path = "last_game.wtrn"
//! verify_checksums = true
//! ```
//!
//! Every field has a default, so an empty file is a valid configuration.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use warden_lockstep::ExchangeConfig;
use warden_transport::{TransportConfig, TransportError};

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read config {path}: {source}")]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this layout.
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("invalid config value: {0}")]
    Invalid(#[from] TransportError),
}

/// Turn file settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Record every session to this file when set.
    pub path: Option<PathBuf>,
    /// Verify each turn's aggregate checksum on read.
    pub verify_checksums: bool,
    /// Sync every append to the device, not just flush it.
    pub durable_sync: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            path: None,
            verify_checksums: true,
            durable_sync: false,
        }
    }
}

/// Everything a [`crate::Session`] needs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Level identifier handed to clients and written to turn files.
    pub session_level_id: u32,
    /// Gateway to ask for a NAT-PMP port mapping when hosting.
    pub nat_pmp_gateway: Option<Ipv4Addr>,
    /// Requested NAT-PMP lease in seconds; the mapper default when unset.
    pub nat_pmp_lifetime_secs: Option<u32>,
    /// `[transport]` table.
    pub transport: TransportConfig,
    /// `[exchange]` table.
    pub exchange: ExchangeConfig,
    /// `[persistence]` table.
    pub persistence: PersistenceConfig,
}

impl SessionConfig {
    /// Parses and validates a configuration.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed TOML, [`ConfigError::Invalid`]
    /// for out-of-range values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.transport.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates `path`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Read`] when the file cannot be read, otherwise as
    /// [`SessionConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}
