//! Per-session store state and execution statistics.
//!
//! This module provides:
//! - [`SessionContext`]: State reachable from host functions through the store
//! - [`ProcessState`]: Pending command and captured output of the process host module
//! - [`ExecutionStatistics`]: Counters captured when a session closes

use std::time::Duration;

use wasmtime::Store;
use wasmtime_wasi::preview1::WasiP1Ctx;

use crate::WasmEngine;
use wasm_bridge_common::{BridgeError, CommandPolicy};

/// Per-session store data.
///
/// Created for each session and dropped with it. Host functions access it
/// through [`wasmtime::Caller::data_mut`].
pub struct SessionContext {
    /// WASI preview1 context.
    wasi: WasiP1Ctx,

    /// Unique session identifier for tracing.
    pub session_id: String,

    /// Process host module state.
    pub process: ProcessState,
}

impl SessionContext {
    /// Create a session context.
    pub fn new(wasi: WasiP1Ctx, session_id: impl Into<String>, policy: CommandPolicy) -> Self {
        Self {
            wasi,
            session_id: session_id.into(),
            process: ProcessState::new(policy),
        }
    }

    /// The WASI context, for linking.
    pub fn wasi_mut(&mut self) -> &mut WasiP1Ctx {
        &mut self.wasi
    }
}

/// A host command being assembled by the guest, and the output of the last
/// one that ran.
#[derive(Debug, Clone, Default)]
pub struct ProcessState {
    /// Which commands the guest may run.
    pub policy: CommandPolicy,
    /// Program name of the pending command.
    pub program: String,
    /// Arguments of the pending command.
    pub args: Vec<String>,
    /// Environment of the pending command.
    pub envs: Vec<(String, String)>,
    /// Standard input of the pending command.
    pub stdin: Vec<u8>,
    /// Timeout of the pending command.
    pub timeout: Option<Duration>,
    /// Exit code of the last command.
    pub exit_code: i32,
    /// Standard output of the last command.
    pub stdout: Vec<u8>,
    /// Standard error of the last command.
    pub stderr: Vec<u8>,
}

impl ProcessState {
    /// Create an empty state governed by `policy`.
    pub fn new(policy: CommandPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Clear the pending command, keeping the output of the last run.
    pub fn reset_command(&mut self) {
        self.program.clear();
        self.args.clear();
        self.envs.clear();
        self.stdin.clear();
        self.timeout = None;
    }
}

/// Execution statistics of one session.
///
/// Instruction counts come from fuel consumption. Gas cost uses a unit cost
/// per instruction, so it equals the instruction count.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExecutionStatistics {
    /// Whether measurement was enabled.
    pub measured: bool,
    /// Instructions executed.
    pub instruction_count: u64,
    /// Total gas cost.
    pub total_gas_cost: u64,
    /// Time between instantiation and close.
    pub elapsed: Duration,
}

impl ExecutionStatistics {
    /// Build statistics from fuel consumption.
    pub fn from_fuel(measured: bool, fuel_consumed: u64, elapsed: Duration) -> Self {
        if !measured {
            return Self {
                elapsed,
                ..Self::default()
            };
        }
        Self {
            measured,
            instruction_count: fuel_consumed,
            total_gas_cost: fuel_consumed,
            elapsed,
        }
    }

    /// Instruction throughput, or zero if nothing ran.
    #[allow(clippy::cast_precision_loss)]
    pub fn instructions_per_second(&self) -> f64 {
        let seconds = self.elapsed.as_secs_f64();
        if seconds == 0.0 {
            return 0.0;
        }
        self.instruction_count as f64 / seconds
    }
}

/// Create a store holding `context` with `max_fuel` available.
pub fn create_store(
    engine: &WasmEngine,
    max_fuel: u64,
    context: SessionContext,
) -> Result<Store<SessionContext>, BridgeError> {
    let mut store = Store::new(engine.inner(), context);
    store
        .set_fuel(max_fuel)
        .map_err(|e| BridgeError::invalid_config(format!("Failed to set fuel: {e}")))?;
    Ok(store)
}

/// Fuel consumed since the store was given `initial_fuel`.
pub fn fuel_consumed(initial_fuel: u64, store: &Store<SessionContext>) -> u64 {
    let remaining = store.get_fuel().unwrap_or(initial_fuel);
    initial_fuel.saturating_sub(remaining)
}
