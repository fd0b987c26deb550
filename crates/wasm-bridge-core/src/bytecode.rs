//! Guest input classification.
//!
//! A VM is constructed from either a file path or an in-memory buffer.
//! Buffers are classified by their first four bytes:
//!
//! | Magic         | Kind                            |
//! |---------------|---------------------------------|
//! | `00 61 73 6d` | WebAssembly bytecode            |
//! | `7f 45 4c 46` | ELF object (compiled artifact)  |
//! | `fe ed fa ce` | Mach-O 32-bit                   |
//! | `fe ed fa cf` | Mach-O 64-bit                   |
//! | `ca fe ba be` | Mach-O universal                |
//!
//! Paths are never inspected at classification time; a missing or unreadable
//! file is reported when the module is loaded.

use std::borrow::Cow;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use wasm_bridge_common::BridgeError;

/// WebAssembly binary magic number (`\0asm`).
pub const WASM_MAGIC: [u8; 4] = [0x00, 0x61, 0x73, 0x6d];

const ELF_MAGIC: [u8; 4] = [0x7f, 0x45, 0x4c, 0x46];
const MACHO_32_MAGIC: [u8; 4] = [0xfe, 0xed, 0xfa, 0xce];
const MACHO_64_MAGIC: [u8; 4] = [0xfe, 0xed, 0xfa, 0xcf];
const MACHO_UNIVERSAL_MAGIC: [u8; 4] = [0xca, 0xfe, 0xba, 0xbe];

/// Container format of a natively compiled object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeFormat {
    /// ELF object.
    Elf,
    /// 32-bit Mach-O object.
    MachO32,
    /// 64-bit Mach-O object.
    MachO64,
    /// Mach-O universal (fat) binary.
    MachOUniversal,
}

/// How a guest input is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// A buffer with no recognized magic number.
    Invalid,
    /// A file path, resolved at load time.
    FilePath,
    /// WebAssembly bytecode.
    GuestBytecode,
    /// A natively compiled object.
    CompiledObject(NativeFormat),
}

/// Classify a buffer by its magic number.
///
/// # Errors
///
/// Returns [`BridgeError::InvalidInputFormat`] if the buffer is shorter than
/// four bytes.
pub fn classify(bytes: &[u8]) -> Result<InputKind, BridgeError> {
    let Some(magic) = bytes.first_chunk::<4>() else {
        return Err(BridgeError::invalid_input(format!(
            "buffer of {} bytes is shorter than a 4-byte magic number",
            bytes.len()
        )));
    };

    Ok(match *magic {
        WASM_MAGIC => InputKind::GuestBytecode,
        ELF_MAGIC => InputKind::CompiledObject(NativeFormat::Elf),
        MACHO_32_MAGIC => InputKind::CompiledObject(NativeFormat::MachO32),
        MACHO_64_MAGIC => InputKind::CompiledObject(NativeFormat::MachO64),
        MACHO_UNIVERSAL_MAGIC => InputKind::CompiledObject(NativeFormat::MachOUniversal),
        _ => InputKind::Invalid,
    })
}

/// Classify the contents of a file by its magic number.
///
/// Files shorter than four bytes are reported as [`InputKind::Invalid`]
/// rather than as an error, since they may still be module text.
pub fn classify_file(path: &Path) -> Result<InputKind, BridgeError> {
    let load_failed = |e: std::io::Error| BridgeError::load_failed(format!("{}: {e}", path.display()));

    let mut magic = Vec::with_capacity(4);
    File::open(path)
        .map_err(load_failed)?
        .take(4)
        .read_to_end(&mut magic)
        .map_err(load_failed)?;

    if magic.len() < 4 {
        return Ok(InputKind::Invalid);
    }
    classify(&magic)
}

/// A guest module supplied by the embedding host.
///
/// The [`InputKind`] is derived from the input and cannot be set directly.
/// The only mutation is [`BytecodeInput::rewrite_to_file`], used when a
/// compiled artifact on disk supersedes the in-memory bytes.
#[derive(Debug, Clone)]
pub struct BytecodeInput {
    bytes: Option<Vec<u8>>,
    path: Option<PathBuf>,
    kind: InputKind,
}

impl BytecodeInput {
    /// Create an input from an in-memory buffer.
    ///
    /// Buffers without a recognized magic number are accepted and classified
    /// as [`InputKind::Invalid`]; use [`BytecodeInput::is_valid_data`] to
    /// reject them.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidInputFormat`] if the buffer is shorter
    /// than four bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, BridgeError> {
        let kind = classify(&bytes)?;
        Ok(Self {
            bytes: Some(bytes),
            path: None,
            kind,
        })
    }

    /// Create an input referring to a file.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            bytes: None,
            path: Some(path.into()),
            kind: InputKind::FilePath,
        }
    }

    /// The classified kind.
    pub fn kind(&self) -> InputKind {
        self.kind
    }

    /// Returns `true` if this input refers to a file.
    pub fn is_file(&self) -> bool {
        self.kind == InputKind::FilePath
    }

    /// Returns `true` if this input is in-memory WebAssembly bytecode.
    pub fn is_wasm(&self) -> bool {
        self.kind == InputKind::GuestBytecode
    }

    /// Returns `true` if this input is an in-memory compiled object.
    pub fn is_compiled(&self) -> bool {
        matches!(self.kind, InputKind::CompiledObject(_))
    }

    /// Returns `true` if this input was classified from a buffer and holds
    /// either bytecode or a compiled object.
    pub fn is_valid_data(&self) -> bool {
        self.bytes.is_some() && (self.is_wasm() || self.is_compiled())
    }

    /// The in-memory bytes.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidInputFormat`] if this input has no bytes.
    pub fn bytes(&self) -> Result<&[u8], BridgeError> {
        self.bytes
            .as_deref()
            .ok_or_else(|| BridgeError::invalid_input("input has no in-memory bytes"))
    }

    /// The file path, if this input refers to a file.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Read the module source: the in-memory bytes, or the file contents.
    pub fn read_source(&self) -> Result<Cow<'_, [u8]>, BridgeError> {
        match (&self.bytes, &self.path) {
            (Some(bytes), _) => Ok(Cow::Borrowed(bytes)),
            (None, Some(path)) => std::fs::read(path)
                .map(Cow::Owned)
                .map_err(|e| BridgeError::load_failed(format!("{}: {e}", path.display()))),
            (None, None) => Err(BridgeError::invalid_input("input has neither bytes nor a path")),
        }
    }

    /// Replace the input with a file on disk.
    ///
    /// The in-memory bytes are dropped; the input is now a file path.
    pub fn rewrite_to_file(&mut self, path: impl Into<PathBuf>) {
        self.bytes = None;
        self.path = Some(path.into());
        self.kind = InputKind::FilePath;
    }
}
