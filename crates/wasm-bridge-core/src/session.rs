//! Module session lifecycle.
//!
//! A [`ModuleSession`] owns one instantiation of a guest module and walks
//! through a fixed sequence of states:
//!
//! ```text
//! Unopened -> Loaded -> Validated -> Instantiated -> Closed
//! ```
//!
//! Any state may move to `Closed`. Closing releases the store, instance and
//! memory handle, and captures execution statistics, which stay readable
//! afterwards. Closing twice is a no-op.

use std::fmt;
use std::path::Path;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};
use wasmparser::Parser;
use wasmtime::{Export, Instance, Linker, Memory, Module, Store, Val};
use wasmtime_wasi::I32Exit;

use wasm_bridge_common::BridgeError;

use crate::WasmEngine;
use crate::bytecode::{BytecodeInput, InputKind, WASM_MAGIC, classify_file};
use crate::marshal::GuestInstance;
use crate::store::{ExecutionStatistics, SessionContext, create_store, fuel_consumed};

/// Lifecycle state of a [`ModuleSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing loaded yet.
    Unopened,
    /// Module bytes or artifact loaded.
    Loaded,
    /// Module validated and compiled.
    Validated,
    /// Module instantiated; exports may be called.
    Instantiated,
    /// Resources released.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unopened => "unopened",
            Self::Loaded => "loaded",
            Self::Validated => "validated",
            Self::Instantiated => "instantiated",
            Self::Closed => "closed",
        })
    }
}

/// What `load` produced, pending validation.
enum Loaded {
    /// Structurally parsed wasm binary. Text modules are converted on load.
    Binary(Vec<u8>),
    /// A deserialized artifact, validated when it was compiled.
    Compiled(Module),
}

/// One instantiation of a guest module.
pub struct ModuleSession {
    engine: WasmEngine,
    max_fuel: u64,
    measure: bool,
    id: String,
    state: SessionState,
    loaded: Option<Loaded>,
    module: Option<Module>,
    store: Option<Store<SessionContext>>,
    instance: Option<Instance>,
    memory: Option<Memory>,
    instantiated_at: Option<Instant>,
    statistics: ExecutionStatistics,
}

impl ModuleSession {
    /// Create an unopened session.
    pub fn new(engine: &WasmEngine, max_fuel: u64, measure: bool) -> Self {
        Self {
            engine: engine.clone(),
            max_fuel,
            measure,
            id: uuid::Uuid::new_v4().to_string(),
            state: SessionState::Unopened,
            loaded: None,
            module: None,
            store: None,
            instance: None,
            memory: None,
            instantiated_at: None,
            statistics: ExecutionStatistics::default(),
        }
    }

    /// Unique identifier of this session.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Statistics captured at close.
    pub fn statistics(&self) -> ExecutionStatistics {
        self.statistics
    }

    /// The store data, while instantiated.
    pub fn context(&self) -> Option<&SessionContext> {
        self.store.as_ref().map(Store::data)
    }

    fn expect_state(
        &self,
        expected: SessionState,
        error: fn(String) -> BridgeError,
    ) -> Result<(), BridgeError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(error(format!("session is in state {}", self.state)))
        }
    }

    /// Load the module from a file or buffer.
    ///
    /// Compiled artifacts are deserialized here. Bytecode and text are parsed
    /// for structure only, so malformed input fails with
    /// [`BridgeError::LoadFailed`]; type checking happens in
    /// [`ModuleSession::validate`].
    #[instrument(skip(self, input), fields(session_id = %self.id, kind = ?input.kind()))]
    pub fn load(&mut self, input: &BytecodeInput) -> Result<(), BridgeError> {
        self.expect_state(SessionState::Unopened, BridgeError::load_failed)?;

        let loaded = match input.kind() {
            InputKind::FilePath => {
                let path = input
                    .path()
                    .ok_or_else(|| BridgeError::load_failed("file input has no path"))?;
                self.load_file(path)?
            }
            InputKind::GuestBytecode => Loaded::Binary(parse_source(input.bytes()?.to_vec())?),
            InputKind::CompiledObject(_) => Loaded::Compiled(self.deserialize(input.bytes()?)?),
            InputKind::Invalid => {
                return Err(BridgeError::load_failed("input is not a recognized module format"));
            }
        };

        self.loaded = Some(loaded);
        self.state = SessionState::Loaded;
        debug!("Module loaded");
        Ok(())
    }

    #[allow(unsafe_code)]
    fn load_file(&self, path: &Path) -> Result<Loaded, BridgeError> {
        if let InputKind::CompiledObject(_) = classify_file(path)? {
            // SAFETY: artifacts are produced by `Engine::precompile_module` and
            // stored under a directory keyed by the engine's compatibility hash.
            let module = unsafe { Module::deserialize_file(self.engine.inner(), path) }
                .map_err(|e| {
                    BridgeError::load_failed(format!(
                        "Failed to load precompiled module from {}: {e:#}",
                        path.display()
                    ))
                })?;
            return Ok(Loaded::Compiled(module));
        }

        let source = std::fs::read(path)
            .map_err(|e| BridgeError::load_failed(format!("{}: {e}", path.display())))?;
        parse_source(source).map(Loaded::Binary)
    }

    #[allow(unsafe_code)]
    fn deserialize(&self, bytes: &[u8]) -> Result<Module, BridgeError> {
        // SAFETY: wasmtime checks the artifact header and engine compatibility
        // before mapping any code; a mismatch is reported as an error.
        unsafe { Module::deserialize(self.engine.inner(), bytes) }.map_err(|e| {
            BridgeError::load_failed(format!("Failed to load precompiled module: {e:#}"))
        })
    }

    /// Validate and compile the loaded module.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub fn validate(&mut self) -> Result<(), BridgeError> {
        self.expect_state(SessionState::Loaded, BridgeError::validate_failed)?;
        let loaded = self
            .loaded
            .take()
            .ok_or_else(|| BridgeError::validate_failed("no module loaded"))?;

        let start = Instant::now();
        let module = match loaded {
            Loaded::Compiled(module) => module,
            Loaded::Binary(bytes) => {
                Module::validate(self.engine.inner(), &bytes)
                    .map_err(|e| BridgeError::validate_failed(format!("{e:#}")))?;
                Module::from_binary(self.engine.inner(), &bytes)
                    .map_err(|e| BridgeError::compile_failed(format!("{e:#}")))?
            }
        };

        debug!(duration_us = start.elapsed().as_micros(), "Module validated");
        self.module = Some(module);
        self.state = SessionState::Validated;
        Ok(())
    }

    /// Instantiate the module and locate its linear memory.
    #[instrument(skip(self, linker, context), fields(session_id = %self.id))]
    pub fn instantiate(
        &mut self,
        linker: &Linker<SessionContext>,
        context: SessionContext,
    ) -> Result<(), BridgeError> {
        self.expect_state(SessionState::Validated, BridgeError::instantiate_failed)?;
        let module = self
            .module
            .as_ref()
            .ok_or_else(|| BridgeError::instantiate_failed("no module validated"))?;

        let mut store = create_store(&self.engine, self.max_fuel, context)?;
        let instance = linker
            .instantiate(&mut store, module)
            .map_err(|e| BridgeError::instantiate_failed(format!("{e:#}")))?;

        let memory = instance
            .exports(&mut store)
            .find_map(Export::into_memory);
        if memory.is_none() {
            debug!("Module exports no linear memory");
        }

        self.store = Some(store);
        self.instance = Some(instance);
        self.memory = memory;
        self.instantiated_at = Some(Instant::now());
        self.state = SessionState::Instantiated;
        info!("Module instantiated");
        Ok(())
    }

    /// Load, validate and instantiate in one step.
    ///
    /// A no-op if the session is already instantiated.
    pub fn open(
        &mut self,
        input: &BytecodeInput,
        linker: &Linker<SessionContext>,
        context: SessionContext,
    ) -> Result<(), BridgeError> {
        if self.state == SessionState::Instantiated {
            return Ok(());
        }
        self.load(input)?;
        self.validate()?;
        self.instantiate(linker, context)
    }

    /// Returns `true` if the instance exports a function named `name`.
    pub fn has_export(&mut self, name: &str) -> bool {
        match (self.instance, self.store.as_mut()) {
            (Some(instance), Some(store)) => instance.get_func(store, name).is_some(),
            _ => false,
        }
    }

    /// Call the reactor initialization export, if the module has one.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub fn initialize_reactor(&mut self, initializer: &str) -> Result<(), BridgeError> {
        if !self.has_export(initializer) {
            return Ok(());
        }
        self.call(initializer, &[])
            .map(|_| ())
            .map_err(|e| BridgeError::InitReactorFailed {
                export: initializer.to_string(),
                message: e.to_string(),
            })
    }

    /// Run the command-style entry point and return its exit code.
    ///
    /// A normal return is exit code 0; `proc_exit(n)` yields `n`.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub fn run_entry_point(&mut self, entry_point: &str) -> Result<i32, BridgeError> {
        let (instance, store) = self.instance_parts()?;
        let func = instance
            .get_typed_func::<(), ()>(&mut *store, entry_point)
            .map_err(|_| BridgeError::missing_export(entry_point))?;

        match func.call(&mut *store, ()) {
            Ok(()) => Ok(0),
            Err(e) => match e.downcast_ref::<I32Exit>() {
                Some(exit) => {
                    debug!(exit_code = exit.0, "Guest exited");
                    Ok(exit.0)
                }
                None => Err(BridgeError::execution_failed(entry_point, format!("{e:#}"))),
            },
        }
    }

    /// Tear down the session and capture statistics.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }

        if let (Some(store), Some(started)) = (self.store.as_ref(), self.instantiated_at) {
            let consumed = fuel_consumed(self.max_fuel, store);
            self.statistics =
                ExecutionStatistics::from_fuel(self.measure, consumed, started.elapsed());
            debug!(
                fuel_consumed = consumed,
                elapsed_us = self.statistics.elapsed.as_micros(),
                "Session statistics captured"
            );
        }

        self.memory = None;
        self.instance = None;
        self.store = None;
        self.module = None;
        self.loaded = None;
        self.state = SessionState::Closed;
    }

    fn instance_parts(&mut self) -> Result<(Instance, &mut Store<SessionContext>), BridgeError> {
        let state = self.state;
        match (self.instance, self.store.as_mut()) {
            (Some(instance), Some(store)) => Ok((instance, store)),
            _ => Err(BridgeError::execution_failed(
                "<session>",
                format!("session is in state {state}"),
            )),
        }
    }
}

/// Structurally parse module source, converting text to binary.
///
/// Only the section layout is checked here; type checking is left to
/// [`ModuleSession::validate`].
fn parse_source(source: Vec<u8>) -> Result<Vec<u8>, BridgeError> {
    let binary = if source.starts_with(&WASM_MAGIC) {
        source
    } else {
        wat::parse_bytes(&source)
            .map_err(|e| BridgeError::load_failed(format!("malformed module text: {e}")))?
            .into_owned()
    };

    for payload in Parser::new(0).parse_all(&binary) {
        payload.map_err(|e| BridgeError::load_failed(format!("malformed module: {e}")))?;
    }
    Ok(binary)
}

impl GuestInstance for ModuleSession {
    fn call(&mut self, name: &str, args: &[i32]) -> Result<Option<i32>, BridgeError> {
        let (instance, store) = self.instance_parts()?;
        let func = instance
            .get_func(&mut *store, name)
            .ok_or_else(|| BridgeError::missing_export(name))?;

        let params: Vec<Val> = args.iter().copied().map(Val::I32).collect();
        let mut results = vec![Val::I32(0); func.ty(&*store).results().len()];

        func.call(&mut *store, &params, &mut results)
            .map_err(|e| BridgeError::execution_failed(name, format!("{e:#}")))?;

        match results.first() {
            None => Ok(None),
            Some(Val::I32(value)) => Ok(Some(*value)),
            Some(other) => {
                warn!(function = name, result = ?other, "Unexpected result type");
                Err(BridgeError::execution_failed(
                    name,
                    "function does not return an i32",
                ))
            }
        }
    }

    fn read_memory(&self, offset: u32, length: u32) -> Result<Vec<u8>, BridgeError> {
        let out_of_bounds = BridgeError::BadMemoryAccess { offset, length };
        let (Some(memory), Some(store)) = (self.memory, self.store.as_ref()) else {
            return Err(out_of_bounds);
        };

        let start = offset as usize;
        let end = start
            .checked_add(length as usize)
            .ok_or(BridgeError::BadMemoryAccess { offset, length })?;

        memory
            .data(store)
            .get(start..end)
            .map(<[u8]>::to_vec)
            .ok_or(out_of_bounds)
    }

    fn write_memory(&mut self, offset: u32, bytes: &[u8]) -> Result<(), BridgeError> {
        let length = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
        let (Some(memory), Some(store)) = (self.memory, self.store.as_mut()) else {
            return Err(BridgeError::BadMemoryAccess { offset, length });
        };

        memory
            .write(store, offset as usize, bytes)
            .map_err(|_| BridgeError::BadMemoryAccess { offset, length })
    }
}

impl Drop for ModuleSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ModuleSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleSession")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("measure", &self.measure)
            .finish_non_exhaustive()
    }
}
