//! Error types for wasm-bridge.
//!
//! This module defines a hierarchy of error types using `thiserror`:
//! - [`BridgeError`]: Top-level errors surfaced to the embedding host
//! - [`HostFunctionError`]: Errors from host functions called by the guest
//! - [`WasiError`]: WASI environment setup errors
//! - [`HelperFailure`]: Why a guest allocator/deallocator call failed

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Top-level bridge errors.
///
/// Every operation exposed to the embedding host reports failures through this
/// type. Errors raised after a session has been opened are only surfaced once
/// the session has been torn down.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The input is neither a usable byte buffer nor a file path.
    #[error("Invalid input format: {reason}")]
    InvalidInputFormat {
        /// Description of what was wrong with the input.
        reason: String,
    },

    /// The byte buffer does not start with a known magic number.
    #[error("Unknown bytecode format")]
    UnknownBytecodeFormat,

    /// The VM options object could not be parsed.
    #[error("Parse options failed: {reason}")]
    ParseOptionsFailed {
        /// Description of the parse failure.
        reason: String,
    },

    /// The module could not be loaded from its file or buffer.
    #[error("Module cannot be loaded: {reason}")]
    LoadFailed {
        /// Description of the load failure.
        reason: String,
    },

    /// The module failed static validation.
    #[error("Module failed validation: {reason}")]
    ValidateFailed {
        /// Description of the validation failure.
        reason: String,
    },

    /// The module could not be instantiated.
    #[error("Module cannot be instantiated: {reason}")]
    InstantiateFailed {
        /// Description of the instantiation failure.
        reason: String,
    },

    /// The reactor initialization export trapped.
    #[error("Reactor initialization `{export}` failed: {message}")]
    InitReactorFailed {
        /// Name of the initialization export.
        export: String,
        /// Trap message.
        message: String,
    },

    /// An exported function trapped or was called with the wrong signature.
    #[error("Execution of `{function}` failed: {message}")]
    ExecutionFailed {
        /// Name of the exported function.
        function: String,
        /// Trap or engine message.
        message: String,
    },

    /// The guest does not export the requested function.
    #[error("Export not found: {name}")]
    MissingExport {
        /// Name of the missing export.
        name: String,
    },

    /// A read or write fell outside the guest's linear memory.
    #[error("Bad memory access: {length} bytes at offset {offset}")]
    BadMemoryAccess {
        /// Guest address of the access.
        offset: u32,
        /// Number of bytes accessed.
        length: u32,
    },

    /// The guest allocator could not provide memory for an argument.
    #[error("Failed to call allocator `{export}`: {cause}")]
    AllocationFailed {
        /// Name of the allocator export.
        export: String,
        /// Why the call failed.
        cause: HelperFailure,
    },

    /// The guest deallocator could not release result memory.
    #[error("Failed to call deallocator `{export}`: {cause}")]
    DeallocationFailed {
        /// Name of the deallocator export.
        export: String,
        /// Why the call failed.
        cause: HelperFailure,
    },

    /// AOT compilation failed.
    #[error("Compilation failed: {reason}")]
    CompileFailed {
        /// Diagnostic from the compiler.
        reason: String,
    },

    /// A host argument cannot be passed to the guest.
    #[error("Unsupported argument type: {found}")]
    UnsupportedArgumentType {
        /// Description of the offending value.
        found: String,
    },

    /// An integer return kind name was not recognized.
    #[error("Unknown integer return kind: {name}")]
    UnknownIntegerReturnKind {
        /// The unrecognized name.
        name: String,
    },

    /// A cache file could not be created, written or read.
    #[error("Cache I/O error at '{}': {source}", path.display())]
    CacheIo {
        /// The cache path involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Invalid configuration was provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },

    /// WASI environment setup failed.
    #[error("WASI error: {0}")]
    Wasi(#[from] WasiError),

    /// A host function returned an error.
    #[error("Host function error: {0}")]
    HostFunction(#[from] HostFunctionError),
}

/// Why a call to a guest memory helper (allocator or deallocator) failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HelperFailure {
    /// The guest module does not export the helper.
    NotExported,
    /// The helper trapped or returned an unexpected value.
    Trapped(String),
}

impl fmt::Display for HelperFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotExported => write!(f, "not exported by the guest module"),
            Self::Trapped(message) => write!(f, "guest trapped: {message}"),
        }
    }
}

impl HelperFailure {
    /// Classify the error returned by a helper call.
    pub fn from_call_error(error: &BridgeError) -> Self {
        match error {
            BridgeError::MissingExport { .. } => Self::NotExported,
            other => Self::Trapped(other.to_string()),
        }
    }
}

/// Errors from host function implementations.
#[derive(Error, Debug)]
pub enum HostFunctionError {
    /// The guest tried to run a command that is not allowed.
    #[error("Permission denied: command '{command}' is not allowed")]
    PermissionDenied {
        /// The denied command.
        command: String,
    },

    /// The guest passed an invalid pointer or length.
    #[error("Invalid guest pointer: {length} bytes at {offset}")]
    InvalidPointer {
        /// Guest address.
        offset: i64,
        /// Requested length.
        length: i64,
    },

    /// The guest module does not export a linear memory.
    #[error("Memory export not found in guest module")]
    MissingMemory,

    /// Spawning or waiting on a host command failed.
    #[error("Command '{command}' failed: {reason}")]
    CommandFailed {
        /// The command that was run.
        command: String,
        /// Description of the failure.
        reason: String,
    },
}

/// WASI-related errors.
#[derive(Error, Debug)]
pub enum WasiError {
    /// A preopened directory could not be opened on the host.
    #[error("WASI preopen '{guest_path}' -> '{host_path}' failed: {reason}")]
    PreopenFailed {
        /// Path as seen by the guest.
        guest_path: String,
        /// Path on the host.
        host_path: String,
        /// Description of the failure.
        reason: String,
    },

    /// The WASI functions could not be added to the linker.
    #[error("WASI linking failed: {reason}")]
    LinkFailed {
        /// Description of the failure.
        reason: String,
    },
}

impl BridgeError {
    /// Create a new `InvalidInputFormat` error.
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInputFormat {
            reason: reason.into(),
        }
    }

    /// Create a new `ParseOptionsFailed` error.
    pub fn parse_options(reason: impl Into<String>) -> Self {
        Self::ParseOptionsFailed {
            reason: reason.into(),
        }
    }

    /// Create a new `LoadFailed` error.
    pub fn load_failed(reason: impl Into<String>) -> Self {
        Self::LoadFailed {
            reason: reason.into(),
        }
    }

    /// Create a new `ValidateFailed` error.
    pub fn validate_failed(reason: impl Into<String>) -> Self {
        Self::ValidateFailed {
            reason: reason.into(),
        }
    }

    /// Create a new `InstantiateFailed` error.
    pub fn instantiate_failed(reason: impl Into<String>) -> Self {
        Self::InstantiateFailed {
            reason: reason.into(),
        }
    }

    /// Create a new `ExecutionFailed` error.
    pub fn execution_failed(function: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            function: function.into(),
            message: message.into(),
        }
    }

    /// Create a new `MissingExport` error.
    pub fn missing_export(name: impl Into<String>) -> Self {
        Self::MissingExport { name: name.into() }
    }

    /// Create a new `CompileFailed` error.
    pub fn compile_failed(reason: impl Into<String>) -> Self {
        Self::CompileFailed {
            reason: reason.into(),
        }
    }

    /// Create a new `UnsupportedArgumentType` error.
    pub fn unsupported_argument(found: impl Into<String>) -> Self {
        Self::UnsupportedArgumentType {
            found: found.into(),
        }
    }

    /// Create a new `CacheIo` error.
    pub fn cache_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::CacheIo {
            path: path.into(),
            source,
        }
    }

    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error was detected before any engine resource
    /// was allocated (input classification or option parsing).
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidInputFormat { .. }
                | Self::UnknownBytecodeFormat
                | Self::ParseOptionsFailed { .. }
                | Self::UnsupportedArgumentType { .. }
                | Self::UnknownIntegerReturnKind { .. }
        )
    }

    /// Returns `true` if the guest module lacks an export the bridge relies on.
    ///
    /// This is a configuration problem of the guest, as opposed to a trap
    /// raised while the guest was running.
    pub fn is_guest_misconfiguration(&self) -> bool {
        match self {
            Self::MissingExport { .. } => true,
            Self::AllocationFailed { cause, .. } | Self::DeallocationFailed { cause, .. } => {
                *cause == HelperFailure::NotExported
            }
            _ => false,
        }
    }
}
