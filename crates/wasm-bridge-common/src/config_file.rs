//! Configuration file structures for wasm-bridge.
//!
//! A configuration file carries the process-wide [`BridgeConfig`] and the
//! default [`VmOptions`] applied to every VM created by the CLI.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{BridgeConfig, VmOptions};

/// Top-level configuration file structure.
///
/// # Example
///
/// ```toml
/// [bridge.engine]
/// opt_level = "speed"
///
/// [bridge.cache]
/// dir = "/var/cache/wasm-bridge"
///
/// [bridge.abi]
/// allocator = "__wbindgen_malloc"
/// deallocator = "__wbindgen_free"
///
/// [options]
/// EnableAOT = true
/// args = ["app.wasm"]
///
/// [options.preopens]
/// "/" = "."
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    /// Bridge configuration (engine, execution, cache and ABI settings).
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Default VM options.
    #[serde(default)]
    pub options: VmOptions,
}

impl ConfigFile {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigFileError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed as TOML.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        toml::from_str(content).map_err(|e| ConfigFileError::Parse {
            message: e.to_string(),
        })
    }
}

/// Configuration file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },
}
