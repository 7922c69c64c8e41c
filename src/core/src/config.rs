use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, VentError};
use crate::paths::vent_config_path;

/// Broker configuration, read from `config.toml` under the vent home directory.
///
/// Every field has a default, so an empty or missing file is valid.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VentConfig {
    /// Prefix of generated subscription tokens.
    pub token_prefix: String,
    pub request: RequestConfig,
}

impl Default for VentConfig {
    fn default() -> Self {
        Self {
            token_prefix: "vent-".to_string(),
            request: RequestConfig::default(),
        }
    }
}

impl VentConfig {
    /// Load from the default location, falling back to defaults when absent.
    pub fn load() -> Result<Self> {
        let path = vent_config_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| VentError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| VentError::Config(format!("parse config.toml: {e}")))
    }

    pub fn config_path() -> Result<PathBuf> {
        vent_config_path()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
    pub sync_failure: SyncFailure,
}

/// How `request` treats a handler that fails synchronously.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncFailure {
    /// Return the error from `request` itself; no aggregate is produced.
    #[default]
    Propagate,
    /// Fold the error into the aggregate as its rejection.
    Reject,
}
