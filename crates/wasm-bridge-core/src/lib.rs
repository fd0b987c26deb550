//! Core embedding bridge for wasm-bridge.
//!
//! This crate provides everything between a guest blob and a typed call:
//! - [`BytecodeInput`]: Classified guest input (path, bytecode or compiled object)
//! - [`CompilationCache`]: Content-addressed AOT artifact cache
//! - [`marshal_arguments`] / [`extract_result`]: Host ⇄ guest value protocol
//! - [`ModuleSession`]: One load → validate → instantiate → close lifecycle
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     BytecodeInput                       │
//! │  - Magic-number classification                          │
//! └─────────────────────────────────────────────────────────┘
//!                            │ (AOT)
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                   CompilationCache                      │
//! │  (Shared across processes, content-addressed)           │
//! │  - <dir>/<engine fingerprint>/<sha256 prefix>.cwasm     │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │          ModuleSession (Store<SessionContext>)          │
//! │  (Per call, opened and closed on every path)            │
//! │  - Argument staging via guest allocator                 │
//! │  - Result record extraction and release                 │
//! │  - Fuel-based statistics                                │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod abi;
pub mod bytecode;
pub mod cache;
pub mod engine;
pub mod extract;
pub mod marshal;
pub mod session;
pub mod store;

#[cfg(test)]
mod mock;

pub use abi::ResultRecord;
pub use bytecode::{BytecodeInput, InputKind, NativeFormat, classify};
pub use cache::{ArtifactCompiler, CacheKey, CompilationCache};
pub use engine::WasmEngine;
pub use extract::{Extracted, extract_result, read_wide_return};
pub use marshal::{ArgumentDescriptor, GuestInstance, IntKind, NumberWidth, marshal_arguments};
pub use session::{ModuleSession, SessionState};
pub use store::{ExecutionStatistics, ProcessState, SessionContext};
