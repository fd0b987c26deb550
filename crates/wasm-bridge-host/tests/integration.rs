//! Integration tests for wasm-bridge-host.
//!
//! These tests instantiate guests against the full linker and drive the
//! process host module and WASI from guest code.

use wasm_bridge_common::{BridgeError, CommandPolicy, EngineConfig, VmOptions};
use wasm_bridge_core::{BytecodeInput, GuestInstance, ModuleSession, SessionContext, WasmEngine};
use wasm_bridge_host::{build_wasi_context, create_linker};

/// Guest that runs the command named at offset 100 (length in `len`) and
/// returns the exit code reported by the host.
const PROCESS_WAT: &str = r#"
    (module
      (import "wasmedge_process" "wasmedge_process_set_prog_name" (func $set_prog (param i32 i32)))
      (import "wasmedge_process" "wasmedge_process_add_arg" (func $add_arg (param i32 i32)))
      (import "wasmedge_process" "wasmedge_process_run" (func $run (result i32)))
      (import "wasmedge_process" "wasmedge_process_get_exit_code" (func $exit_code (result i32)))
      (import "wasmedge_process" "wasmedge_process_get_stdout_len" (func $stdout_len (result i32)))
      (import "wasmedge_process" "wasmedge_process_get_stdout" (func $stdout (param i32)))
      (import "wasmedge_process" "wasmedge_process_get_stderr_len" (func $stderr_len (result i32)))
      (memory (export "memory") 1)
      (data (i32.const 100) "echo")
      (data (i32.const 200) "bridged")
      (func (export "run_echo") (result i32)
        (call $set_prog (i32.const 100) (i32.const 4))
        (call $add_arg (i32.const 200) (i32.const 7))
        (drop (call $run))
        (call $exit_code))
      (func (export "copy_stdout") (param $ptr i32) (result i32)
        (call $stdout (local.get $ptr))
        (call $stdout_len))
      (func (export "stderr_len") (result i32) (call $stderr_len))
      (func (export "bad_pointer")
        (call $set_prog (i32.const 65530) (i32.const 100))))
"#;

fn engine() -> WasmEngine {
    WasmEngine::new(&EngineConfig::default()).unwrap()
}

fn open(engine: &WasmEngine, source: &str, options: &VmOptions) -> (ModuleSession, tempfile::NamedTempFile) {
    let file = tempfile::Builder::new().suffix(".wat").tempfile().unwrap();
    std::fs::write(file.path(), source).unwrap();

    let linker = create_linker(engine.inner()).unwrap();
    let context = SessionContext::new(
        build_wasi_context(options).unwrap(),
        "host-test",
        options.command_policy(),
    );
    let mut session = ModuleSession::new(engine, u64::MAX, false);
    session
        .open(&BytecodeInput::from_path(file.path()), &linker, context)
        .unwrap();
    (session, file)
}

// ============================================================================
// Test: Process Host Module
// ============================================================================

#[test]
fn test_denied_command_reports_minus_one() {
    let engine = engine();
    let (mut session, _file) = open(&engine, PROCESS_WAT, &VmOptions::default());

    assert_eq!(session.call("run_echo", &[]).unwrap(), Some(-1));
    let stderr_len = session.call("stderr_len", &[]).unwrap().unwrap();
    assert!(stderr_len > 0);
}

#[cfg(unix)]
#[test]
fn test_allowed_command_output_is_copied_to_guest() {
    let engine = engine();
    let options = VmOptions {
        allow_commands: vec!["echo".into()],
        ..Default::default()
    };
    assert!(options.command_policy().is_allowed("echo"));
    assert!(!CommandPolicy::deny_all().is_allowed("echo"));

    let (mut session, _file) = open(&engine, PROCESS_WAT, &options);

    assert_eq!(session.call("run_echo", &[]).unwrap(), Some(0));
    let len = session.call("copy_stdout", &[1000]).unwrap().unwrap();
    assert_eq!(len, 8);
    assert_eq!(session.read_memory(1000, 8).unwrap(), b"bridged\n");
}

#[test]
fn test_out_of_bounds_pointer_traps() {
    let engine = engine();
    let (mut session, _file) = open(&engine, PROCESS_WAT, &VmOptions::default());

    let err = session.call("bad_pointer", &[]).unwrap_err();
    assert!(matches!(err, BridgeError::ExecutionFailed { .. }));
    assert!(err.to_string().contains("Invalid guest pointer"));
}

// ============================================================================
// Test: WASI
// ============================================================================

#[test]
fn test_wasi_proc_exit_code() {
    let wat = r#"
        (module
          (import "wasi_snapshot_preview1" "proc_exit" (func $exit (param i32)))
          (memory (export "memory") 1)
          (func (export "_start") (call $exit (i32.const 7))))
    "#;
    let engine = engine();
    let (mut session, _file) = open(&engine, wat, &VmOptions::default());

    assert_eq!(session.run_entry_point("_start").unwrap(), 7);
}

#[test]
fn test_wasi_args_are_visible() {
    let wat = r#"
        (module
          (import "wasi_snapshot_preview1" "args_sizes_get"
            (func $sizes (param i32 i32) (result i32)))
          (memory (export "memory") 1)
          (func (export "argc") (result i32)
            (drop (call $sizes (i32.const 0) (i32.const 4)))
            (i32.load (i32.const 0))))
    "#;
    let engine = engine();
    let options = VmOptions {
        args: vec!["app.wasm".into(), "--flag".into(), "value".into()],
        ..Default::default()
    };
    let (mut session, _file) = open(&engine, wat, &options);

    assert_eq!(session.call("argc", &[]).unwrap(), Some(3));
}
