//! Integration tests for wasm-bridge-embed.
//!
//! These tests drive the [`VirtualMachine`] facade end to end:
//! - Typed call shapes against real guest modules
//! - AOT compilation and artifact reuse
//! - Reactor and command execution styles
//! - Statistics and failure reporting

use std::path::Path;

use serde_json::{Value, json};
use wasm_bridge_common::{BridgeConfig, BridgeError, HelperFailure, VmOptions};
use wasm_bridge_core::{CompilationCache, InputKind, IntKind};
use wasm_bridge_embed::{IntValue, VirtualMachine};

/// `(func (export "add") (param i32 i32) (result i32))` as a wasm binary.
const ADD_WASM: &[u8] = &[
    0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00, // header
    0x01, 0x07, 0x01, 0x60, 0x02, 0x7f, 0x7f, 0x01, 0x7f, // type
    0x03, 0x02, 0x01, 0x00, // function
    0x07, 0x07, 0x01, 0x03, 0x61, 0x64, 0x64, 0x00, 0x00, // export
    0x0a, 0x09, 0x01, 0x07, 0x00, 0x20, 0x00, 0x20, 0x01, 0x6a, 0x0b, // code
];

/// Guest following the allocator and result-record conventions.
const GUEST_WAT: &str = r#"
    (module
      (memory (export "memory") 1)
      (global $heap (mut i32) (i32.const 1024))
      (global $ready (mut i32) (i32.const 0))
      (func (export "_initialize") (global.set $ready (i32.const 42)))
      (func (export "ready") (result i32) (global.get $ready))
      (func (export "__wbindgen_malloc") (param $len i32) (result i32)
        (local $ptr i32)
        (local.set $ptr (global.get $heap))
        (global.set $heap (i32.add (global.get $heap) (local.get $len)))
        (local.get $ptr))
      (func (export "__wbindgen_free") (param i32 i32))
      (func (export "echo") (param $ret i32) (param $ptr i32) (param $len i32)
        (i32.store (local.get $ret) (local.get $ptr))
        (i32.store offset=4 (local.get $ret) (local.get $len)))
      (func (export "negate") (param i32) (result i32)
        (i32.sub (i32.const 0) (local.get 0)))
      (func (export "noop") (param i32))
      (func (export "boom") unreachable)
      (func (export "add64") (param $ret i32) (param $al i32) (param $ah i32) (param $bl i32) (param $bh i32)
        (i64.store (local.get $ret)
          (i64.add
            (i64.or (i64.extend_i32_u (local.get $al))
                    (i64.shl (i64.extend_i32_u (local.get $ah)) (i64.const 32)))
            (i64.or (i64.extend_i32_u (local.get $bl))
                    (i64.shl (i64.extend_i32_u (local.get $bh)) (i64.const 32)))))))
"#;

fn config(cache_dir: &Path) -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.cache.dir = cache_dir.to_path_buf();
    config
}

fn wat_file(dir: &Path, name: &str, source: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, source).unwrap();
    path
}

fn guest_vm(dir: &tempfile::TempDir, options: VmOptions) -> VirtualMachine {
    let path = wat_file(dir.path(), "guest.wat", GUEST_WAT);
    VirtualMachine::from_path(path, options, config(&dir.path().join("cache"))).unwrap()
}

// ============================================================================
// Test: Scalar Calls
// ============================================================================

#[test]
fn test_add_from_buffer() {
    let dir = tempfile::tempdir().unwrap();
    let mut vm =
        VirtualMachine::from_bytes(ADD_WASM.to_vec(), VmOptions::default(), config(dir.path()))
            .unwrap();

    assert_eq!(vm.input().kind(), InputKind::GuestBytecode);
    assert_eq!(vm.run_int("add", &[json!(2), json!(3)]).unwrap(), 5);
    assert_eq!(vm.run_int("add", &[json!(-7), json!(3)]).unwrap(), -4);
    assert_eq!(
        serde_json::to_value(vm.statistics()).unwrap(),
        json!({"Measure": false})
    );
}

#[test]
fn test_unsigned_result() {
    let dir = tempfile::tempdir().unwrap();
    let mut vm = guest_vm(&dir, VmOptions::default());

    assert_eq!(vm.run_uint("negate", &[json!(1)]).unwrap(), u32::MAX);
    assert_eq!(
        vm.run_integer("negate", IntKind::I32, &[json!(1)]).unwrap(),
        IntValue::I32(-1)
    );
}

#[test]
fn test_wide_results() {
    let dir = tempfile::tempdir().unwrap();
    let mut vm = guest_vm(&dir, VmOptions::default());

    let big = 1_u64 << 40;
    assert_eq!(
        vm.run_uint64("add64", &[json!(big), json!(5)]).unwrap(),
        big + 5
    );
    assert_eq!(vm.run_int64("add64", &[json!(-10), json!(3)]).unwrap(), -7);
    assert_eq!(
        vm.run_uint64("add64", &[json!(u64::MAX), json!(1)]).unwrap(),
        0
    );
}

// ============================================================================
// Test: Text and Byte Results
// ============================================================================

#[test]
fn test_string_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let mut vm = guest_vm(&dir, VmOptions::default());

    assert_eq!(vm.run_string("echo", &[json!("hello")]).unwrap(), "hello");
    assert!(vm.take_release_error().is_none());

    assert_eq!(
        vm.run_bytes("echo", &[json!([0, 159, 146, 150])]).unwrap(),
        vec![0, 159, 146, 150]
    );
    assert_eq!(vm.run_string("echo", &[json!([0xff, 0x41])]).unwrap(), "\u{fffd}A");
}

#[test]
fn test_release_failure_keeps_data() {
    let source = GUEST_WAT.replace(
        r#"(func (export "__wbindgen_free") (param i32 i32))"#,
        r#"(func (export "__wbindgen_free") (param i32 i32) unreachable)"#,
    );
    let dir = tempfile::tempdir().unwrap();
    let path = wat_file(dir.path(), "trapping_free.wat", &source);
    let mut vm = VirtualMachine::from_path(path, VmOptions::default(), config(dir.path())).unwrap();

    assert_eq!(vm.run_string("echo", &[json!("kept")]).unwrap(), "kept");

    let err = vm.take_release_error().unwrap();
    assert!(matches!(
        err,
        BridgeError::DeallocationFailed {
            cause: HelperFailure::Trapped(_),
            ..
        }
    ));
    assert!(vm.take_release_error().is_none());
}

#[test]
fn test_missing_allocator() {
    let source = GUEST_WAT.replace("__wbindgen_malloc", "private_malloc");
    let dir = tempfile::tempdir().unwrap();
    let path = wat_file(dir.path(), "no_malloc.wat", &source);
    let mut vm = VirtualMachine::from_path(path, VmOptions::default(), config(dir.path())).unwrap();

    let err = vm.run_string("echo", &[json!("x")]).unwrap_err();
    assert!(matches!(err, BridgeError::AllocationFailed { .. }));
    assert!(err.is_guest_misconfiguration());
}

// ============================================================================
// Test: Execution Styles
// ============================================================================

#[test]
fn test_reactor_initialization() {
    let dir = tempfile::tempdir().unwrap();

    let mut reactor = guest_vm(&dir, VmOptions::default());
    assert_eq!(reactor.run_int("ready", &[]).unwrap(), 42);

    let command = VmOptions {
        enable_wasi_start_function: true,
        ..Default::default()
    };
    let mut vm = guest_vm(&dir, command);
    assert_eq!(vm.run_int("ready", &[]).unwrap(), 0);
}

#[test]
fn test_start_exit_codes() {
    let dir = tempfile::tempdir().unwrap();
    let options = VmOptions::from_json(r#"{"EnableWasiStartFunction": true}"#).unwrap();

    let normal = wat_file(
        dir.path(),
        "normal.wat",
        r#"(module (memory (export "memory") 1) (func (export "_start")))"#,
    );
    let mut vm = VirtualMachine::from_path(normal, options.clone(), config(dir.path())).unwrap();
    assert_eq!(vm.start().unwrap(), 0);

    let exiting = wat_file(
        dir.path(),
        "exiting.wat",
        r#"
        (module
          (import "wasi_snapshot_preview1" "proc_exit" (func $exit (param i32)))
          (memory (export "memory") 1)
          (func (export "_start") (call $exit (i32.const 3))))
        "#,
    );
    let mut vm = VirtualMachine::from_path(exiting, options, config(dir.path())).unwrap();
    assert_eq!(vm.start().unwrap(), 3);
}

// ============================================================================
// Test: AOT Compilation
// ============================================================================

#[test]
fn test_aot_reuses_cached_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let options = VmOptions::default().with_aot(true);

    let mut first =
        VirtualMachine::from_bytes(ADD_WASM.to_vec(), options.clone(), config(dir.path())).unwrap();
    assert!(first.input().is_file());
    let artifact = first.input().path().unwrap().to_path_buf();
    assert!(artifact.starts_with(dir.path()));
    assert!(CompilationCache::is_cached(&artifact));
    assert_eq!(first.run_int("add", &[json!(40), json!(2)]).unwrap(), 42);

    let modified = std::fs::metadata(&artifact).unwrap().modified().unwrap();

    let mut second =
        VirtualMachine::from_bytes(ADD_WASM.to_vec(), options, config(dir.path())).unwrap();
    assert_eq!(second.input().path().unwrap(), artifact);
    assert_eq!(
        std::fs::metadata(&artifact).unwrap().modified().unwrap(),
        modified
    );
    assert_eq!(second.run_int("add", &[json!(1), json!(1)]).unwrap(), 2);
}

#[test]
fn test_aot_from_text_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut vm = guest_vm(&dir, VmOptions::default().with_aot(true));

    let artifact = vm.input().path().unwrap();
    assert_eq!(artifact.extension().unwrap(), "cwasm");
    assert_eq!(vm.run_string("echo", &[json!("aot")]).unwrap(), "aot");
}

#[test]
fn test_compile_then_load_compiled_buffer() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out").join("add.cwasm");

    let vm = VirtualMachine::from_bytes(ADD_WASM.to_vec(), VmOptions::default(), config(dir.path()))
        .unwrap();
    vm.compile(&out).unwrap();

    let compiled = std::fs::read(&out).unwrap();
    let mut loaded =
        VirtualMachine::from_bytes(compiled, VmOptions::default(), config(dir.path())).unwrap();
    assert!(loaded.input().is_file());
    assert_eq!(loaded.run_int("add", &[json!(20), json!(22)]).unwrap(), 42);

    // Compiling an artifact copies it unchanged.
    let copy = dir.path().join("copy.cwasm");
    loaded.compile(&copy).unwrap();
    assert_eq!(std::fs::read(copy).unwrap(), std::fs::read(out).unwrap());
}

// ============================================================================
// Test: Statistics and Failures
// ============================================================================

#[test]
fn test_measured_statistics() {
    let dir = tempfile::tempdir().unwrap();
    let options = VmOptions::default().with_measurement(true);
    let mut vm = VirtualMachine::from_bytes(ADD_WASM.to_vec(), options, config(dir.path())).unwrap();

    vm.run_int("add", &[json!(1), json!(2)]).unwrap();
    let report = vm.statistics();

    assert!(report.measure);
    assert!(report.instruction_count.unwrap() > 0);
    assert_eq!(report.instruction_count, report.total_gas_cost);

    let json = serde_json::to_value(&report).unwrap();
    assert!(json.get("InstructionPerSecond").is_some());
}

#[test]
fn test_failures_are_reported_after_close() {
    let dir = tempfile::tempdir().unwrap();
    let mut vm = guest_vm(&dir, VmOptions::default().with_measurement(true));

    let err = vm.run("boom", &[]).unwrap_err();
    assert!(matches!(err, BridgeError::ExecutionFailed { .. }));
    assert!(vm.statistics().measure);

    let err = vm.run("missing", &[]).unwrap_err();
    assert!(matches!(err, BridgeError::MissingExport { .. }));

    let err = vm.run("noop", &[Value::Bool(true)]).unwrap_err();
    assert!(matches!(err, BridgeError::UnsupportedArgumentType { .. }));

    vm.run("noop", &[json!(1)]).unwrap();
}

#[test]
fn test_invalid_module_fails_validation() {
    let dir = tempfile::tempdir().unwrap();
    let mut broken = ADD_WASM.to_vec();
    // i32.add becomes i64.add, which no longer type-checks.
    let add = broken.len() - 2;
    broken[add] = 0x7c;

    let mut vm =
        VirtualMachine::from_bytes(broken, VmOptions::default(), config(dir.path())).unwrap();
    let err = vm.run_int("add", &[json!(1), json!(2)]).unwrap_err();
    assert!(matches!(err, BridgeError::ValidateFailed { .. }));
}

#[test]
fn test_malformed_file_fails_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = wat_file(dir.path(), "garbage.wasm", "GARBAGE!not a module at all");
    let mut vm = VirtualMachine::from_path(path, VmOptions::default(), config(dir.path())).unwrap();

    let err = vm.run("noop", &[]).unwrap_err();
    assert!(matches!(err, BridgeError::LoadFailed { .. }));
}

#[test]
fn test_short_file_is_reported_by_compilation() {
    let dir = tempfile::tempdir().unwrap();
    let path = wat_file(dir.path(), "short.wasm", "ab");

    let err = VirtualMachine::from_path(&path, VmOptions::default().with_aot(true), config(dir.path()))
        .err()
        .unwrap();
    assert!(matches!(err, BridgeError::CompileFailed { .. }));

    let vm = VirtualMachine::from_path(&path, VmOptions::default(), config(dir.path())).unwrap();
    let err = vm.compile(dir.path().join("short.cwasm")).unwrap_err();
    assert!(matches!(err, BridgeError::CompileFailed { .. }));
}

#[test]
fn test_statistics_survive_failed_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = wat_file(dir.path(), "guest.wat", GUEST_WAT);
    let options = VmOptions::default().with_measurement(true);
    let mut vm = VirtualMachine::from_path(&path, options, config(dir.path())).unwrap();

    vm.run("noop", &[json!(1)]).unwrap();
    let before = vm.statistics();
    assert!(before.instruction_count.unwrap() > 0);

    std::fs::remove_file(&path).unwrap();
    let err = vm.run("noop", &[json!(1)]).unwrap_err();
    assert!(matches!(err, BridgeError::LoadFailed { .. }));
    assert_eq!(vm.statistics(), before);
}
