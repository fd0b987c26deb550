//! Configuration structures for wasm-bridge.
//!
//! This module defines configuration options for the bridge components:
//! - [`BridgeConfig`]: Top-level configuration containing all settings
//! - [`EngineConfig`]: Wasmtime engine settings
//! - [`ExecutionConfig`]: Per-session execution limits
//! - [`CacheConfig`]: Location of the AOT artifact cache
//! - [`GuestAbiConfig`]: Export names and fixed addresses of the guest calling convention
//!
//! Configuration is always passed explicitly to constructors; nothing here is
//! process-global.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level bridge configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BridgeConfig {
    /// Wasmtime engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Per-session execution configuration.
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// AOT artifact cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Guest calling convention.
    #[serde(default)]
    pub abi: GuestAbiConfig,
}

/// Cranelift optimization level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptLevel {
    /// No optimizations.
    None,
    /// Optimize for speed.
    #[default]
    Speed,
    /// Optimize for speed and code size.
    SpeedAndSize,
}

/// Wasmtime engine configuration.
///
/// Settings here change the code the engine generates, so they also select
/// which cached artifacts are compatible.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Cranelift optimization level.
    #[serde(default)]
    pub opt_level: OptLevel,

    /// Compile functions on multiple threads.
    #[serde(default = "defaults::parallel_compilation")]
    pub parallel_compilation: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            opt_level: OptLevel::default(),
            parallel_compilation: defaults::parallel_compilation(),
        }
    }
}

/// Per-session execution configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionConfig {
    /// Fuel granted to each session.
    ///
    /// Fuel doubles as the instruction counter used for statistics. The
    /// default is effectively unlimited.
    #[serde(default = "defaults::max_fuel")]
    pub max_fuel: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_fuel: defaults::max_fuel(),
        }
    }
}

/// AOT artifact cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Directory holding content-addressed compiled artifacts.
    #[serde(default = "defaults::cache_dir")]
    pub dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: defaults::cache_dir(),
        }
    }
}

/// Guest calling convention used to pass variable-length data.
///
/// The defaults match modules produced by `wasm-bindgen`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct GuestAbiConfig {
    /// Export that allocates `len` bytes and returns their address.
    #[serde(default = "defaults::allocator")]
    pub allocator: String,

    /// Export that releases `(ptr, len)`.
    #[serde(default = "defaults::deallocator")]
    pub deallocator: String,

    /// Export called after instantiation in reactor style, if present.
    #[serde(default = "defaults::initializer")]
    pub initializer: String,

    /// Command-style entry point.
    #[serde(default = "defaults::entry_point")]
    pub entry_point: String,

    /// Address of the 8-byte result record for text and byte-sequence returns.
    #[serde(default = "defaults::result_offset")]
    pub result_offset: u32,

    /// Address at which the guest writes 64-bit return values.
    #[serde(default = "defaults::wide_return_offset")]
    pub wide_return_offset: u32,
}

impl Default for GuestAbiConfig {
    fn default() -> Self {
        Self {
            allocator: defaults::allocator(),
            deallocator: defaults::deallocator(),
            initializer: defaults::initializer(),
            entry_point: defaults::entry_point(),
            result_offset: defaults::result_offset(),
            wide_return_offset: defaults::wide_return_offset(),
        }
    }
}

/// Default value functions for serde.
mod defaults {
    use std::path::PathBuf;

    pub const fn parallel_compilation() -> bool {
        true
    }

    pub const fn max_fuel() -> u64 {
        u64::MAX
    }

    pub fn cache_dir() -> PathBuf {
        std::env::temp_dir().join("wasm-bridge-cache")
    }

    pub fn allocator() -> String {
        "__wbindgen_malloc".to_string()
    }

    pub fn deallocator() -> String {
        "__wbindgen_free".to_string()
    }

    pub fn initializer() -> String {
        "_initialize".to_string()
    }

    pub fn entry_point() -> String {
        "_start".to_string()
    }

    pub const fn result_offset() -> u32 {
        8
    }

    pub const fn wide_return_offset() -> u32 {
        0
    }
}
