//! Host-to-guest argument marshalling.
//!
//! The guest calling convention only carries 32-bit values. Wider values and
//! variable-length data are staged as follows:
//!
//! - A 32-bit number is passed as one word.
//! - A 64-bit number is split into (low, high) words. The first one processed
//!   also reserves the return slot: if no argument has been emitted yet, the
//!   address the guest writes its 64-bit result to is pushed first.
//! - Text and bytes are copied into memory obtained from the guest allocator
//!   and passed as (address, length).
//!
//! Allocator calls happen once per non-scalar argument, in argument order,
//! before the target function runs.

use std::fmt;
use std::str::FromStr;

use tracing::trace;

use wasm_bridge_common::{BridgeError, GuestAbiConfig, HelperFailure};

use crate::abi::{from_guest_word, split_u64, to_guest_word};

/// Access to a running guest for marshalling and result extraction.
pub trait GuestInstance {
    /// Call an exported function with 32-bit arguments.
    ///
    /// Returns the single `i32` result, or `None` for functions with no
    /// results.
    fn call(&mut self, name: &str, args: &[i32]) -> Result<Option<i32>, BridgeError>;

    /// Read `length` bytes of linear memory at `offset`.
    fn read_memory(&self, offset: u32, length: u32) -> Result<Vec<u8>, BridgeError>;

    /// Write `bytes` into linear memory at `offset`.
    fn write_memory(&mut self, offset: u32, bytes: &[u8]) -> Result<(), BridgeError>;
}

/// A host value to pass to the guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentDescriptor {
    /// A 32-bit number.
    Number(i32),
    /// A 64-bit number, passed as two words.
    WideNumber(u64),
    /// UTF-8 text, staged in guest memory.
    Text(String),
    /// Raw bytes, staged in guest memory.
    Bytes(Vec<u8>),
}

/// Width numeric host arguments are passed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberWidth {
    /// One 32-bit word.
    Narrow,
    /// Two 32-bit words.
    Wide,
}

/// Integer return kinds of run-style calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntKind {
    /// Signed 32-bit.
    I32,
    /// Unsigned 32-bit.
    U32,
    /// Signed 64-bit, returned through memory.
    I64,
    /// Unsigned 64-bit, returned through memory.
    U64,
}

impl IntKind {
    /// Width numeric arguments take for calls returning this kind.
    pub fn width(self) -> NumberWidth {
        match self {
            Self::I32 | Self::U32 => NumberWidth::Narrow,
            Self::I64 | Self::U64 => NumberWidth::Wide,
        }
    }
}

impl FromStr for IntKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "i32" => Ok(Self::I32),
            "u32" => Ok(Self::U32),
            "i64" => Ok(Self::I64),
            "u64" => Ok(Self::U64),
            other => Err(BridgeError::UnknownIntegerReturnKind {
                name: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for IntKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::I32 => "i32",
            Self::U32 => "u32",
            Self::I64 => "i64",
            Self::U64 => "u64",
        })
    }
}

/// Convert host arguments into guest call arguments.
///
/// `prefix` holds arguments already fixed by the call style, such as the
/// result record address of text-returning calls. Marshalled arguments are
/// appended after it.
pub fn marshal_arguments<G>(
    guest: &mut G,
    abi: &GuestAbiConfig,
    args: &[ArgumentDescriptor],
    prefix: Vec<i32>,
) -> Result<Vec<i32>, BridgeError>
where
    G: GuestInstance + ?Sized,
{
    let mut out = prefix;

    for arg in args {
        match arg {
            ArgumentDescriptor::Number(value) => out.push(*value),
            ArgumentDescriptor::WideNumber(value) => {
                if out.is_empty() {
                    out.push(to_guest_word(abi.wide_return_offset));
                }
                let (low, high) = split_u64(*value);
                out.push(to_guest_word(low));
                out.push(to_guest_word(high));
            }
            ArgumentDescriptor::Text(text) => {
                let (address, length) = stage_bytes(guest, abi, text.as_bytes())?;
                out.push(to_guest_word(address));
                out.push(to_guest_word(length));
            }
            ArgumentDescriptor::Bytes(bytes) => {
                let (address, length) = stage_bytes(guest, abi, bytes)?;
                out.push(to_guest_word(address));
                out.push(to_guest_word(length));
            }
        }
    }

    Ok(out)
}

/// Copy `bytes` into freshly allocated guest memory.
fn stage_bytes<G>(
    guest: &mut G,
    abi: &GuestAbiConfig,
    bytes: &[u8],
) -> Result<(u32, u32), BridgeError>
where
    G: GuestInstance + ?Sized,
{
    let length = u32::try_from(bytes.len()).map_err(|_| {
        BridgeError::unsupported_argument(format!(
            "{} bytes exceed the 32-bit guest address space",
            bytes.len()
        ))
    })?;

    let allocation_failed = |cause| BridgeError::AllocationFailed {
        export: abi.allocator.clone(),
        cause,
    };

    let address = match guest.call(&abi.allocator, &[to_guest_word(length)]) {
        Ok(Some(address)) => from_guest_word(address),
        Ok(None) => {
            return Err(allocation_failed(HelperFailure::Trapped(
                "allocator returned no address".to_string(),
            )));
        }
        Err(e) => return Err(allocation_failed(HelperFailure::from_call_error(&e))),
    };

    guest.write_memory(address, bytes)?;
    trace!(address, length, "Staged argument in guest memory");
    Ok((address, length))
}
