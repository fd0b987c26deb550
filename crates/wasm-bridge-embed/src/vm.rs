//! The embedding facade.
//!
//! A [`VirtualMachine`] holds a guest module and calls into it with typed
//! call shapes. Every operation opens a fresh [`ModuleSession`], runs, and
//! closes the session again, on success and failure alike. Statistics of
//! the last session stay readable through [`VirtualMachine::statistics`].

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use wasmtime::Linker;

use wasm_bridge_common::{BridgeConfig, BridgeError, GuestAbiConfig, VmOptions};
use wasm_bridge_core::abi::{from_guest_word, to_guest_word};
use wasm_bridge_core::{
    BytecodeInput, CompilationCache, ExecutionStatistics, Extracted, GuestInstance, InputKind,
    IntKind, ModuleSession, NumberWidth, SessionContext, SessionState, WasmEngine, classify,
    extract_result, marshal_arguments, read_wide_return,
};
use wasm_bridge_host::{build_wasi_context, create_linker};

use crate::args::to_descriptors;

/// Integer returned by one of the integer call shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum IntValue {
    /// Signed 32-bit result.
    I32(i32),
    /// Unsigned 32-bit result.
    U32(u32),
    /// Signed 64-bit result.
    I64(i64),
    /// Unsigned 64-bit result.
    U64(u64),
}

impl fmt::Display for IntValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I32(v) => write!(f, "{v}"),
            Self::U32(v) => write!(f, "{v}"),
            Self::I64(v) => write!(f, "{v}"),
            Self::U64(v) => write!(f, "{v}"),
        }
    }
}

/// Statistics of the last session, in the shape reported to the host.
///
/// Only `Measure` is present when measurement is disabled.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatisticsReport {
    pub measure: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruction_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_gas_cost: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruction_per_second: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_micros: Option<u64>,
}

impl From<ExecutionStatistics> for StatisticsReport {
    fn from(stats: ExecutionStatistics) -> Self {
        if !stats.measured {
            return Self {
                measure: false,
                instruction_count: None,
                total_gas_cost: None,
                instruction_per_second: None,
                elapsed_micros: None,
            };
        }
        Self {
            measure: true,
            instruction_count: Some(stats.instruction_count),
            total_gas_cost: Some(stats.total_gas_cost),
            instruction_per_second: Some(stats.instructions_per_second()),
            elapsed_micros: Some(u64::try_from(stats.elapsed.as_micros()).unwrap_or(u64::MAX)),
        }
    }
}

/// A guest module plus everything needed to call into it.
pub struct VirtualMachine {
    input: BytecodeInput,
    options: VmOptions,
    config: BridgeConfig,
    engine: WasmEngine,
    linker: Linker<SessionContext>,
    cache: CompilationCache,
    statistics: ExecutionStatistics,
    release_error: Option<BridgeError>,
}

impl VirtualMachine {
    /// Create a VM for the module at `path`.
    ///
    /// The file is not opened until the first call, unless AOT compilation
    /// is enabled, in which case it is compiled into the cache now.
    pub fn from_path(
        path: impl Into<PathBuf>,
        options: VmOptions,
        config: BridgeConfig,
    ) -> Result<Self, BridgeError> {
        Self::with_input(BytecodeInput::from_path(path), options, config)
    }

    /// Create a VM for a module held in memory.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidInputFormat`] for buffers shorter than
    /// four bytes and [`BridgeError::UnknownBytecodeFormat`] for buffers that
    /// are neither wasm bytecode nor a compiled object.
    pub fn from_bytes(
        bytes: Vec<u8>,
        options: VmOptions,
        config: BridgeConfig,
    ) -> Result<Self, BridgeError> {
        let input = BytecodeInput::from_bytes(bytes)?;
        if !input.is_valid_data() {
            return Err(BridgeError::UnknownBytecodeFormat);
        }
        Self::with_input(input, options, config)
    }

    fn with_input(
        input: BytecodeInput,
        options: VmOptions,
        config: BridgeConfig,
    ) -> Result<Self, BridgeError> {
        let engine = WasmEngine::new(&config.engine)?;
        let linker = create_linker(engine.inner())?;
        let cache = CompilationCache::for_engine(&config.cache.dir, &engine);

        let mut vm = Self {
            input,
            options,
            config,
            engine,
            linker,
            cache,
            statistics: ExecutionStatistics::default(),
            release_error: None,
        };
        vm.prepare_input()?;

        info!(
            kind = ?vm.input.kind(),
            aot = vm.options.enable_aot,
            reactor = vm.options.is_reactor_mode(),
            "Virtual machine created"
        );
        Ok(vm)
    }

    /// Move compiled objects and AOT artifacts to files so sessions load
    /// them from disk.
    fn prepare_input(&mut self) -> Result<(), BridgeError> {
        let artifact = match self.input.kind() {
            InputKind::CompiledObject(_) => self.cache.dump(self.input.bytes()?)?,
            InputKind::GuestBytecode if self.options.enable_aot => {
                self.cache.store(self.input.bytes()?, &self.engine)?
            }
            InputKind::FilePath if self.options.enable_aot => {
                let source = self.input.read_source()?;
                if is_compiled(&source) {
                    return Ok(());
                }
                self.cache.store(&source, &self.engine)?
            }
            _ => return Ok(()),
        };

        debug!(path = %artifact.display(), "Input rewritten to artifact file");
        self.input.rewrite_to_file(artifact);
        Ok(())
    }

    /// The module input, after any AOT rewrite.
    pub fn input(&self) -> &BytecodeInput {
        &self.input
    }

    /// The artifact cache this VM writes to.
    pub fn cache(&self) -> &CompilationCache {
        &self.cache
    }

    /// Run the command entry point and return the guest's exit code.
    #[instrument(skip(self))]
    pub fn start(&mut self) -> Result<i32, BridgeError> {
        self.with_session(false, |session, abi| {
            session.run_entry_point(&abi.entry_point)
        })
    }

    /// Call `name` for its side effects.
    #[instrument(skip(self, args), fields(args_len = args.len()))]
    pub fn run(&mut self, name: &str, args: &[Value]) -> Result<(), BridgeError> {
        let descriptors = to_descriptors(args, NumberWidth::Narrow)?;
        self.with_session(true, |session, abi| {
            let params = marshal_arguments(session, abi, &descriptors, Vec::new())?;
            session.call(name, &params).map(|_| ())
        })
    }

    /// Call `name` and read back an integer of the given kind.
    ///
    /// 32-bit kinds are the function's return value. 64-bit kinds take
    /// 64-bit arguments and are read from the wide-return slot.
    #[instrument(skip(self, args), fields(args_len = args.len()))]
    pub fn run_integer(
        &mut self,
        name: &str,
        kind: IntKind,
        args: &[Value],
    ) -> Result<IntValue, BridgeError> {
        let descriptors = to_descriptors(args, kind.width())?;
        self.with_session(true, |session, abi| {
            let params = marshal_arguments(session, abi, &descriptors, Vec::new())?;
            let returned = session.call(name, &params)?;

            match kind {
                IntKind::I32 | IntKind::U32 => {
                    let value = returned.ok_or_else(|| {
                        BridgeError::execution_failed(name, "function returned no value")
                    })?;
                    Ok(if kind == IntKind::I32 {
                        IntValue::I32(value)
                    } else {
                        IntValue::U32(from_guest_word(value))
                    })
                }
                IntKind::I64 => {
                    let value = read_wide_return(&*session, abi)?;
                    Ok(IntValue::I64(i64::from_le_bytes(value.to_le_bytes())))
                }
                IntKind::U64 => read_wide_return(&*session, abi).map(IntValue::U64),
            }
        })
    }

    /// Call `name` and read back a signed 32-bit integer.
    pub fn run_int(&mut self, name: &str, args: &[Value]) -> Result<i32, BridgeError> {
        match self.run_integer(name, IntKind::I32, args)? {
            IntValue::I32(v) => Ok(v),
            other => Err(unexpected_kind(name, other)),
        }
    }

    /// Call `name` and read back an unsigned 32-bit integer.
    pub fn run_uint(&mut self, name: &str, args: &[Value]) -> Result<u32, BridgeError> {
        match self.run_integer(name, IntKind::U32, args)? {
            IntValue::U32(v) => Ok(v),
            other => Err(unexpected_kind(name, other)),
        }
    }

    /// Call `name` and read back a signed 64-bit integer.
    pub fn run_int64(&mut self, name: &str, args: &[Value]) -> Result<i64, BridgeError> {
        match self.run_integer(name, IntKind::I64, args)? {
            IntValue::I64(v) => Ok(v),
            other => Err(unexpected_kind(name, other)),
        }
    }

    /// Call `name` and read back an unsigned 64-bit integer.
    pub fn run_uint64(&mut self, name: &str, args: &[Value]) -> Result<u64, BridgeError> {
        match self.run_integer(name, IntKind::U64, args)? {
            IntValue::U64(v) => Ok(v),
            other => Err(unexpected_kind(name, other)),
        }
    }

    /// Call `name` and read back the text it returns through the result
    /// record. Invalid UTF-8 is replaced.
    pub fn run_string(&mut self, name: &str, args: &[Value]) -> Result<String, BridgeError> {
        let data = self.run_bytes(name, args)?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    /// Call `name` and read back the bytes it returns through the result
    /// record.
    #[instrument(skip(self, args), fields(args_len = args.len()))]
    pub fn run_bytes(&mut self, name: &str, args: &[Value]) -> Result<Vec<u8>, BridgeError> {
        let descriptors = to_descriptors(args, NumberWidth::Narrow)?;
        let extracted = self.with_session(true, |session, abi| {
            let prefix = vec![to_guest_word(abi.result_offset)];
            let params = marshal_arguments(session, abi, &descriptors, prefix)?;
            session.call(name, &params)?;
            extract_result(session, abi)
        })?;

        let Extracted { data, release } = extracted;
        self.release_error = release.err();
        Ok(data)
    }

    /// Compile the module to `out_path`.
    ///
    /// Inputs that are already compiled are copied unchanged. The artifact is
    /// written atomically.
    #[instrument(skip(self, out_path), fields(out_path = %out_path.as_ref().display()))]
    pub fn compile(&self, out_path: impl AsRef<Path>) -> Result<(), BridgeError> {
        let out_path = out_path.as_ref();
        let source = self.input.read_source()?;

        let artifact = if is_compiled(&source) {
            source.into_owned()
        } else {
            self.engine.precompile(&source)?
        };

        self.cache.write_artifact(out_path, &artifact)?;
        info!(artifact_len = artifact.len(), "Module compiled");
        Ok(())
    }

    /// Statistics of the last session that was instantiated.
    pub fn statistics(&self) -> StatisticsReport {
        self.statistics.into()
    }

    /// Raw statistics of the last session.
    pub fn execution_statistics(&self) -> ExecutionStatistics {
        self.statistics
    }

    /// Take the error from the last failed release of a guest result buffer.
    pub fn take_release_error(&mut self) -> Option<BridgeError> {
        self.release_error.take()
    }

    /// Open a session, run `operation` in it and close it again.
    ///
    /// The session is closed before any error is returned.
    fn with_session<T>(
        &mut self,
        run_style: bool,
        operation: impl FnOnce(&mut ModuleSession, &GuestAbiConfig) -> Result<T, BridgeError>,
    ) -> Result<T, BridgeError> {
        let mut session = ModuleSession::new(
            &self.engine,
            self.config.execution.max_fuel,
            self.options.enable_measurement,
        );

        let result = self
            .open_session(&mut session, run_style)
            .and_then(|()| operation(&mut session, &self.config.abi));

        // Sessions that never ran keep the previous call's statistics.
        let ran = session.state() == SessionState::Instantiated;
        session.close();
        if ran {
            self.statistics = session.statistics();
        }

        if let Err(e) = &result {
            warn!(session_id = session.id(), error = %e, "Session failed");
        }
        result
    }

    fn open_session(&self, session: &mut ModuleSession, run_style: bool) -> Result<(), BridgeError> {
        let wasi = build_wasi_context(&self.options)?;
        let context = SessionContext::new(wasi, session.id(), self.options.command_policy());
        session.open(&self.input, &self.linker, context)?;

        if run_style && self.options.is_reactor_mode() {
            session.initialize_reactor(&self.config.abi.initializer)?;
        }
        Ok(())
    }
}

/// File contents too short to carry a magic number are not compiled objects;
/// compiling or loading them reports the actual problem.
fn is_compiled(source: &[u8]) -> bool {
    matches!(classify(source), Ok(InputKind::CompiledObject(_)))
}

fn unexpected_kind(name: &str, value: IntValue) -> BridgeError {
    BridgeError::execution_failed(name, format!("unexpected integer result {value:?}"))
}
