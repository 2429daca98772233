//! Bridge configuration loaded from TOML.
//!
//! ```toml
//! multipart_max_memory = 33554432
//! outbound_user_agent = "castro-bridge/1.0"
//! vocations_file = "data/vocations.json"
//! towns_file = "data/towns.json"
//!
//! [ssl]
//! enabled = true
//! cert = "certs/server.pem"
//! key = "certs/server.key"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{BridgeError, BridgeErrorKind};
use crate::multipart::DEFAULT_MAX_MEMORY;
use crate::registry::{load_towns, load_vocations, ReferenceData};

/// Process-wide bridge settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// TLS settings of the host server.
    #[serde(default)]
    pub ssl: SslConfig,
    /// Multipart threshold used when a script passes zero.
    #[serde(default = "default_max_memory")]
    pub multipart_max_memory: u64,
    /// `User-Agent` for outbound calls that do not set one.
    #[serde(default)]
    pub outbound_user_agent: Option<String>,
    /// Vocation reference data (JSON).
    #[serde(default)]
    pub vocations_file: Option<PathBuf>,
    /// Town reference data (JSON).
    #[serde(default)]
    pub towns_file: Option<PathBuf>,
}

/// TLS settings. Only `enabled` matters to the bridge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SslConfig {
    /// Whether the server terminates TLS.
    #[serde(default)]
    pub enabled: bool,
    /// Certificate path.
    #[serde(default)]
    pub cert: Option<PathBuf>,
    /// Private key path.
    #[serde(default)]
    pub key: Option<PathBuf>,
}

fn default_max_memory() -> u64 {
    DEFAULT_MAX_MEMORY
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            ssl: SslConfig::default(),
            multipart_max_memory: DEFAULT_MAX_MEMORY,
            outbound_user_agent: None,
            vocations_file: None,
            towns_file: None,
        }
    }
}

impl BridgeConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns `Config` for syntax errors, unknown keys and invalid values.
    pub fn from_toml_str(content: &str) -> Result<Self, BridgeError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| BridgeError::new(BridgeErrorKind::Config, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `Config` when the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, BridgeError> {
        let content = fs::read_to_string(path).map_err(|e| {
            BridgeError::new(
                BridgeErrorKind::Config,
                format!("cannot read {}: {}", path.display(), e),
            )
        })?;
        Self::from_toml_str(&content)
    }

    /// Whether the server runs under TLS. Drives the cookie secure flag.
    pub fn is_ssl(&self) -> bool {
        self.ssl.enabled
    }

    /// Loads the configured reference data files. Unset files load as empty.
    ///
    /// # Errors
    ///
    /// Returns `Config` when a configured file cannot be loaded.
    pub fn load_reference_data(&self) -> Result<ReferenceData, BridgeError> {
        let vocations = match &self.vocations_file {
            Some(path) => load_vocations(path)?,
            None => Vec::new(),
        };
        let towns = match &self.towns_file {
            Some(path) => load_towns(path)?,
            None => Vec::new(),
        };
        ReferenceData::new(vocations, towns)
    }

    fn validate(&self) -> Result<(), BridgeError> {
        if self.multipart_max_memory == 0 {
            return Err(BridgeError::new(
                BridgeErrorKind::Config,
                "multipart_max_memory must be greater than zero",
            ));
        }
        if self.ssl.enabled && (self.ssl.cert.is_none() || self.ssl.key.is_none()) {
            return Err(BridgeError::new(
                BridgeErrorKind::Config,
                "ssl.enabled requires ssl.cert and ssl.key",
            ));
        }
        Ok(())
    }
}
