//! Host function registration for Wasmtime linkers.
//!
//! This module builds the linker every session instantiates against:
//! - WASI preview1 (`wasi_snapshot_preview1`)
//! - The process host module (`wasmedge_process`)

use tracing::trace;
use wasmtime::{Caller, Engine, Extern, Linker, Memory};
use wasmtime_wasi::preview1;

use wasm_bridge_common::{BridgeError, HostFunctionError, WasiError};
use wasm_bridge_core::SessionContext;

use crate::process;

/// Import module name of the process host functions.
pub const PROCESS_MODULE: &str = "wasmedge_process";

/// Create a linker with every host function registered.
///
/// # Errors
///
/// Returns an error if function registration fails.
pub fn create_linker(engine: &Engine) -> Result<Linker<SessionContext>, BridgeError> {
    let mut linker = Linker::new(engine);
    register_wasi(&mut linker)?;
    register_process(&mut linker)?;
    Ok(linker)
}

/// Register the WASI preview1 functions.
pub fn register_wasi(linker: &mut Linker<SessionContext>) -> Result<(), BridgeError> {
    preview1::add_to_linker_sync(linker, |ctx: &mut SessionContext| ctx.wasi_mut()).map_err(
        |e| WasiError::LinkFailed {
            reason: format!("{e:#}"),
        },
    )?;
    Ok(())
}

/// Register the process host functions.
///
/// # Memory Protocol
///
/// Strings and buffers are passed as `(ptr, len)` pairs into the guest's
/// exported `memory`. Output getters write into a guest buffer the caller
/// sized with the matching `*_len` function. An out-of-bounds pointer traps.
pub fn register_process(linker: &mut Linker<SessionContext>) -> Result<(), BridgeError> {
    let link_failed = |e: wasmtime::Error| {
        BridgeError::invalid_config(format!("Failed to register process function: {e}"))
    };

    linker
        .func_wrap(
            PROCESS_MODULE,
            "wasmedge_process_set_prog_name",
            |mut caller: Caller<'_, SessionContext>, ptr: i32, len: i32| -> wasmtime::Result<()> {
                let program = read_string(&mut caller, ptr, len)?;
                process::set_program(&mut caller.data_mut().process, program);
                Ok(())
            },
        )
        .map_err(link_failed)?;

    linker
        .func_wrap(
            PROCESS_MODULE,
            "wasmedge_process_add_arg",
            |mut caller: Caller<'_, SessionContext>, ptr: i32, len: i32| -> wasmtime::Result<()> {
                let arg = read_string(&mut caller, ptr, len)?;
                process::add_arg(&mut caller.data_mut().process, arg);
                Ok(())
            },
        )
        .map_err(link_failed)?;

    linker
        .func_wrap(
            PROCESS_MODULE,
            "wasmedge_process_add_env",
            |mut caller: Caller<'_, SessionContext>,
             key_ptr: i32,
             key_len: i32,
             value_ptr: i32,
             value_len: i32|
             -> wasmtime::Result<()> {
                let key = read_string(&mut caller, key_ptr, key_len)?;
                let value = read_string(&mut caller, value_ptr, value_len)?;
                process::add_env(&mut caller.data_mut().process, key, value);
                Ok(())
            },
        )
        .map_err(link_failed)?;

    linker
        .func_wrap(
            PROCESS_MODULE,
            "wasmedge_process_add_stdin",
            |mut caller: Caller<'_, SessionContext>, ptr: i32, len: i32| -> wasmtime::Result<()> {
                let bytes = read_bytes(&mut caller, ptr, len)?;
                process::add_stdin(&mut caller.data_mut().process, &bytes);
                Ok(())
            },
        )
        .map_err(link_failed)?;

    linker
        .func_wrap(
            PROCESS_MODULE,
            "wasmedge_process_set_timeout",
            |mut caller: Caller<'_, SessionContext>, millis: i32| {
                let millis = u32::try_from(millis).unwrap_or(0);
                process::set_timeout(&mut caller.data_mut().process, millis);
            },
        )
        .map_err(link_failed)?;

    linker
        .func_wrap(
            PROCESS_MODULE,
            "wasmedge_process_run",
            |mut caller: Caller<'_, SessionContext>| -> i32 {
                process::run(&mut caller.data_mut().process)
            },
        )
        .map_err(link_failed)?;

    linker
        .func_wrap(
            PROCESS_MODULE,
            "wasmedge_process_get_exit_code",
            |caller: Caller<'_, SessionContext>| -> i32 { caller.data().process.exit_code },
        )
        .map_err(link_failed)?;

    linker
        .func_wrap(
            PROCESS_MODULE,
            "wasmedge_process_get_stdout_len",
            |caller: Caller<'_, SessionContext>| -> i32 {
                len_as_i32(caller.data().process.stdout.len())
            },
        )
        .map_err(link_failed)?;

    linker
        .func_wrap(
            PROCESS_MODULE,
            "wasmedge_process_get_stdout",
            |mut caller: Caller<'_, SessionContext>, ptr: i32| -> wasmtime::Result<()> {
                let stdout = caller.data().process.stdout.clone();
                write_bytes(&mut caller, ptr, &stdout)
            },
        )
        .map_err(link_failed)?;

    linker
        .func_wrap(
            PROCESS_MODULE,
            "wasmedge_process_get_stderr_len",
            |caller: Caller<'_, SessionContext>| -> i32 {
                len_as_i32(caller.data().process.stderr.len())
            },
        )
        .map_err(link_failed)?;

    linker
        .func_wrap(
            PROCESS_MODULE,
            "wasmedge_process_get_stderr",
            |mut caller: Caller<'_, SessionContext>, ptr: i32| -> wasmtime::Result<()> {
                let stderr = caller.data().process.stderr.clone();
                write_bytes(&mut caller, ptr, &stderr)
            },
        )
        .map_err(link_failed)?;

    Ok(())
}

fn len_as_i32(len: usize) -> i32 {
    i32::try_from(len).unwrap_or(i32::MAX)
}

fn guest_memory(caller: &mut Caller<'_, SessionContext>) -> Result<Memory, HostFunctionError> {
    caller
        .get_export("memory")
        .and_then(Extern::into_memory)
        .ok_or(HostFunctionError::MissingMemory)
}

/// Validate a guest `(ptr, len)` pair and return it as a byte range.
fn guest_range(ptr: i32, len: i32, memory_size: usize) -> Result<(usize, usize), HostFunctionError> {
    let invalid = HostFunctionError::InvalidPointer {
        offset: i64::from(ptr),
        length: i64::from(len),
    };
    let (Ok(start), Ok(len)) = (usize::try_from(ptr), usize::try_from(len)) else {
        return Err(invalid);
    };
    match start.checked_add(len) {
        Some(end) if end <= memory_size => Ok((start, end)),
        _ => Err(invalid),
    }
}

fn read_bytes(
    caller: &mut Caller<'_, SessionContext>,
    ptr: i32,
    len: i32,
) -> Result<Vec<u8>, HostFunctionError> {
    let memory = guest_memory(caller)?;
    let data = memory.data(&*caller);
    let (start, end) = guest_range(ptr, len, data.len())?;
    trace!(ptr, len, "Read guest buffer");
    Ok(data[start..end].to_vec())
}

fn read_string(
    caller: &mut Caller<'_, SessionContext>,
    ptr: i32,
    len: i32,
) -> Result<String, HostFunctionError> {
    let bytes = read_bytes(caller, ptr, len)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn write_bytes(
    caller: &mut Caller<'_, SessionContext>,
    ptr: i32,
    bytes: &[u8],
) -> wasmtime::Result<()> {
    let memory = guest_memory(caller)?;
    let len = len_as_i32(bytes.len());
    let (start, end) = guest_range(ptr, len, memory.data_size(&*caller))?;
    memory.data_mut(&mut *caller)[start..end].copy_from_slice(bytes);
    Ok(())
}
