//! In-memory guest double for marshalling tests.

use std::collections::BTreeSet;

use wasm_bridge_common::BridgeError;

use crate::abi::{ResultRecord, from_guest_word, to_guest_word};
use crate::marshal::GuestInstance;

const PAGE: usize = 65_536;
const HEAP_BASE: u32 = 1024;

/// A guest with one page of memory, a bump allocator and a few exports:
///
/// - `__wbindgen_malloc(len) -> ptr`
/// - `__wbindgen_free(ptr, len)`
/// - `echo(retptr, ptr, len)`: writes `(ptr, len)` at `retptr`
/// - `wide_echo(retptr, low, high)`: writes the 64-bit value at `retptr`
/// - `add(a, b) -> a + b`
/// - `trap()`
pub(crate) struct MockGuest {
    pub memory: Vec<u8>,
    pub next_free: u32,
    pub alloc_calls: usize,
    pub free_calls: Vec<(u32, u32)>,
    pub calls: Vec<(String, Vec<i32>)>,
    pub free_traps: bool,
    exports: BTreeSet<&'static str>,
}

impl MockGuest {
    pub fn new() -> Self {
        Self {
            memory: vec![0; PAGE],
            next_free: HEAP_BASE,
            alloc_calls: 0,
            free_calls: Vec::new(),
            calls: Vec::new(),
            free_traps: false,
            exports: [
                "__wbindgen_malloc",
                "__wbindgen_free",
                "echo",
                "wide_echo",
                "add",
                "trap",
            ]
            .into_iter()
            .collect(),
        }
    }

    pub fn without(mut self, export: &str) -> Self {
        self.exports.remove(export);
        self
    }

    fn word(args: &[i32], index: usize) -> u32 {
        args.get(index).copied().map_or(0, from_guest_word)
    }
}

impl GuestInstance for MockGuest {
    fn call(&mut self, name: &str, args: &[i32]) -> Result<Option<i32>, BridgeError> {
        if !self.exports.contains(name) {
            return Err(BridgeError::missing_export(name));
        }
        self.calls.push((name.to_string(), args.to_vec()));

        match name {
            "__wbindgen_malloc" => {
                self.alloc_calls += 1;
                let ptr = self.next_free;
                self.next_free += Self::word(args, 0);
                Ok(Some(to_guest_word(ptr)))
            }
            "__wbindgen_free" => {
                if self.free_traps {
                    return Err(BridgeError::execution_failed(name, "unreachable"));
                }
                self.free_calls
                    .push((Self::word(args, 0), Self::word(args, 1)));
                Ok(None)
            }
            "echo" => {
                let record = ResultRecord {
                    pointer: Self::word(args, 1),
                    length: Self::word(args, 2),
                };
                self.write_memory(Self::word(args, 0), &record.encode())?;
                Ok(None)
            }
            "wide_echo" => {
                let retptr = Self::word(args, 0);
                let mut bytes = [0u8; 8];
                bytes[..4].copy_from_slice(&Self::word(args, 1).to_le_bytes());
                bytes[4..].copy_from_slice(&Self::word(args, 2).to_le_bytes());
                self.write_memory(retptr, &bytes)?;
                Ok(None)
            }
            "add" => Ok(Some(
                args.first()
                    .copied()
                    .unwrap_or(0)
                    .wrapping_add(args.get(1).copied().unwrap_or(0)),
            )),
            _ => Err(BridgeError::execution_failed(name, "wasm trap: unreachable")),
        }
    }

    fn read_memory(&self, offset: u32, length: u32) -> Result<Vec<u8>, BridgeError> {
        let start = offset as usize;
        let end = start + length as usize;
        self.memory
            .get(start..end)
            .map(<[u8]>::to_vec)
            .ok_or(BridgeError::BadMemoryAccess { offset, length })
    }

    fn write_memory(&mut self, offset: u32, bytes: &[u8]) -> Result<(), BridgeError> {
        let start = offset as usize;
        let end = start + bytes.len();
        let length = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
        self.memory
            .get_mut(start..end)
            .ok_or(BridgeError::BadMemoryAccess { offset, length })?
            .copy_from_slice(bytes);
        Ok(())
    }
}
