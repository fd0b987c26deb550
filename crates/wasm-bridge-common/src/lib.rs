//! Common types, errors, and configuration for wasm-bridge.
//!
//! This crate provides shared functionality used across the wasm-bridge workspace:
//! - Error types using `thiserror` for type-safe error handling
//! - Configuration structures for engine, cache and guest ABI settings
//! - VM options as sent by the embedding host

pub mod config;
pub mod config_file;
pub mod error;
pub mod options;

pub use config::{
    BridgeConfig, CacheConfig, EngineConfig, ExecutionConfig, GuestAbiConfig, OptLevel,
};
pub use config_file::{ConfigFile, ConfigFileError};
pub use error::{BridgeError, HelperFailure, HostFunctionError, WasiError};
pub use options::{CommandPolicy, VmOptions};
