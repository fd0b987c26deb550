//! Embedding API for wasm-bridge.
//!
//! [`VirtualMachine`] is what an embedding host talks to. It accepts a
//! module as a path or an in-memory buffer together with [`VmOptions`] and a
//! [`BridgeConfig`], and exposes typed call shapes:
//!
//! | Operation | Arguments | Result |
//! |-----------|-----------|--------|
//! | `start` | none | guest exit code |
//! | `run` | 32-bit | nothing |
//! | `run_int` / `run_uint` | 32-bit | function return value |
//! | `run_int64` / `run_uint64` | 64-bit | wide-return slot |
//! | `run_string` / `run_bytes` | 32-bit | result record |
//!
//! Host arguments are JSON values, see [`args`].
//!
//! [`VmOptions`]: wasm_bridge_common::VmOptions
//! [`BridgeConfig`]: wasm_bridge_common::BridgeConfig

pub mod args;
pub mod vm;

pub use args::{parse_cli_value, to_descriptor, to_descriptors};
pub use vm::{IntValue, StatisticsReport, VirtualMachine};
