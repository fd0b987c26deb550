//! Per-VM options supplied by the embedding host.
//!
//! The options object uses the field names the embedding host sends:
//!
//! ```json
//! {
//!   "args": ["app.wasm", "--verbose", 42],
//!   "env": { "RUST_LOG": "debug" },
//!   "preopens": { "/data": "/srv/data" },
//!   "EnableWasiStartFunction": false,
//!   "EnableAOT": true,
//!   "EnableMeasurement": true,
//!   "AllowCommands": ["ls", "echo"],
//!   "AllowAllCommands": false
//! }
//! ```
//!
//! Every field is optional.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Deserializer, Serialize};

use crate::BridgeError;

/// Options controlling the WASI environment and execution mode of a VM.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct VmOptions {
    /// Command-line arguments visible to the guest.
    #[serde(deserialize_with = "deserialize_args")]
    pub args: Vec<String>,

    /// Preopened directories, keyed by guest path, valued by host path.
    pub preopens: BTreeMap<String, String>,

    /// Environment variables visible to the guest.
    pub env: BTreeMap<String, String>,

    /// Run the module as a command (`_start`) instead of a reactor.
    #[serde(rename = "EnableWasiStartFunction")]
    pub enable_wasi_start_function: bool,

    /// Compile bytecode ahead of time and reuse the cached artifact.
    #[serde(rename = "EnableAOT")]
    pub enable_aot: bool,

    /// Collect instruction count and gas cost statistics.
    #[serde(rename = "EnableMeasurement")]
    pub enable_measurement: bool,

    /// Host commands the guest may run through the process host module.
    #[serde(rename = "AllowCommands")]
    pub allow_commands: Vec<String>,

    /// Allow the guest to run any host command.
    #[serde(rename = "AllowAllCommands")]
    pub allow_all_commands: bool,
}

/// A single entry of the `args` array.
///
/// Numbers and byte arrays are accepted and converted to their textual form.
#[derive(Deserialize)]
#[serde(untagged)]
enum ArgValue {
    Signed(i64),
    Unsigned(u64),
    Text(String),
    Bytes(Vec<u8>),
}

impl From<ArgValue> for String {
    fn from(value: ArgValue) -> Self {
        match value {
            ArgValue::Signed(n) => n.to_string(),
            ArgValue::Unsigned(n) => n.to_string(),
            ArgValue::Text(s) => s,
            ArgValue::Bytes(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        }
    }
}

fn deserialize_args<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Vec::<ArgValue>::deserialize(deserializer)?;
    Ok(values.into_iter().map(String::from).collect())
}

impl VmOptions {
    /// Parse options from a JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ParseOptionsFailed`] if the text is not a JSON
    /// object or a recognized field has the wrong type.
    pub fn from_json(json: &str) -> Result<Self, BridgeError> {
        let value: serde_json::Value =
            serde_json::from_str(json).map_err(|e| BridgeError::parse_options(e.to_string()))?;
        Self::from_value(value)
    }

    /// Parse options from an already decoded JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, BridgeError> {
        if !value.is_object() {
            return Err(BridgeError::parse_options("options must be an object"));
        }
        serde_json::from_value(value).map_err(|e| BridgeError::parse_options(e.to_string()))
    }

    /// Returns `true` when run-style calls should treat the module as a reactor.
    pub fn is_reactor_mode(&self) -> bool {
        !self.enable_wasi_start_function
    }

    /// Environment variables as key/value pairs.
    pub fn env_pairs(&self) -> Vec<(String, String)> {
        self.env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Build the command policy for the process host module.
    pub fn command_policy(&self) -> CommandPolicy {
        CommandPolicy {
            allowed: self.allow_commands.iter().cloned().collect(),
            allow_all: self.allow_all_commands,
        }
    }

    /// Enable or disable AOT compilation.
    #[must_use]
    pub fn with_aot(mut self, enabled: bool) -> Self {
        self.enable_aot = enabled;
        self
    }

    /// Enable or disable measurement.
    #[must_use]
    pub fn with_measurement(mut self, enabled: bool) -> Self {
        self.enable_measurement = enabled;
        self
    }
}

/// Which host commands a guest may run.
///
/// Nothing is allowed by default; commands are matched by exact name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandPolicy {
    allowed: BTreeSet<String>,
    allow_all: bool,
}

impl CommandPolicy {
    /// A policy that denies every command.
    pub fn deny_all() -> Self {
        Self::default()
    }

    /// A policy that allows every command.
    pub fn allow_all() -> Self {
        Self {
            allowed: BTreeSet::new(),
            allow_all: true,
        }
    }

    /// A policy allowing exactly the given commands.
    pub fn allow<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: commands.into_iter().map(Into::into).collect(),
            allow_all: false,
        }
    }

    /// Check whether `command` may be run.
    pub fn is_allowed(&self, command: &str) -> bool {
        self.allow_all || self.allowed.contains(command)
    }
}
