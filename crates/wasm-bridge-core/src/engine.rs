//! Wasmtime engine configuration and creation.
//!
//! The [`WasmEngine`] holds compilation settings only. It is cheap to clone
//! and carries no per-session state; every session builds its own store on
//! top of it.

use std::hash::{DefaultHasher, Hash, Hasher};

use tracing::{debug, info, instrument};
use wasmtime::{Config, Engine};

use wasm_bridge_common::{BridgeError, EngineConfig, OptLevel};

use crate::cache::ArtifactCompiler;

/// WebAssembly engine wrapper.
///
/// # Configuration
///
/// The engine is configured with:
/// - **Fuel Metering**: always on, so instruction counts are available and
///   AOT artifacts compiled with and without measurement stay compatible
/// - **Cranelift**: optimization level taken from [`EngineConfig`]
/// - **Synchronous execution**: calls run to completion on the caller's thread
///
/// # Example
///
/// ```ignore
/// use wasm_bridge_common::EngineConfig;
/// use wasm_bridge_core::WasmEngine;
///
/// let engine = WasmEngine::new(&EngineConfig::default())?;
/// let artifact = engine.precompile(&wasm_bytes)?;
/// ```
#[derive(Clone)]
pub struct WasmEngine {
    engine: Engine,
    config: EngineConfig,
}

impl WasmEngine {
    /// Create a new WebAssembly engine with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the Wasmtime configuration is rejected.
    pub fn new(config: &EngineConfig) -> Result<Self, BridgeError> {
        let mut wasmtime_config = Config::new();

        wasmtime_config.consume_fuel(true);
        wasmtime_config.cranelift_opt_level(match config.opt_level {
            OptLevel::None => wasmtime::OptLevel::None,
            OptLevel::Speed => wasmtime::OptLevel::Speed,
            OptLevel::SpeedAndSize => wasmtime::OptLevel::SpeedAndSize,
        });
        wasmtime_config.parallel_compilation(config.parallel_compilation);

        let engine = Engine::new(&wasmtime_config).map_err(|e| {
            BridgeError::invalid_config(format!("Failed to create Wasmtime engine: {e}"))
        })?;

        info!(opt_level = ?config.opt_level, "Wasmtime engine initialized");

        Ok(Self {
            engine,
            config: config.clone(),
        })
    }

    /// Get a reference to the inner Wasmtime engine.
    pub fn inner(&self) -> &Engine {
        &self.engine
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Fingerprint of every engine setting that affects compiled artifacts.
    ///
    /// Two engines with the same fingerprint can load each other's artifacts.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.engine.precompile_compatibility_hash().hash(&mut hasher);
        hasher.finish()
    }

    /// Compile guest bytecode to a native artifact.
    #[instrument(skip(self, bytecode), fields(bytes_len = bytecode.len()))]
    pub fn precompile(&self, bytecode: &[u8]) -> Result<Vec<u8>, BridgeError> {
        let artifact = self
            .engine
            .precompile_module(bytecode)
            .map_err(|e| BridgeError::compile_failed(format!("{e:#}")))?;

        debug!(artifact_len = artifact.len(), "Module precompiled");
        Ok(artifact)
    }
}

impl ArtifactCompiler for WasmEngine {
    fn compile(&self, bytecode: &[u8]) -> Result<Vec<u8>, BridgeError> {
        self.precompile(bytecode)
    }
}

impl std::fmt::Debug for WasmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmEngine")
            .field("opt_level", &self.config.opt_level)
            .field("parallel_compilation", &self.config.parallel_compilation)
            .finish_non_exhaustive()
    }
}
