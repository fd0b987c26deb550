//! Host environment for wasm-bridge guests.
//!
//! This crate provides everything a guest may import:
//!
//! - [`wasi`]: WASI preview1 context built from the VM options
//! - [`process`]: Running allowed host commands on the guest's behalf
//! - [`linker`]: Registration of all host functions on a Wasmtime linker
//!
//! # Security Model
//!
//! Nothing is allowed by default. Preopens expose only the directories the
//! options name, and host commands run only when the session's command
//! policy allows them by exact name.

pub mod linker;
pub mod process;
pub mod wasi;

pub use linker::{PROCESS_MODULE, create_linker};
pub use wasi::build_wasi_context;
