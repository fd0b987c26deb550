//! Guest-to-host result extraction.

use tracing::{trace, warn};

use wasm_bridge_common::{BridgeError, GuestAbiConfig, HelperFailure};

use crate::abi::{RESULT_RECORD_LEN, ResultRecord, decode_u64_le, to_guest_word};
use crate::marshal::GuestInstance;

#[allow(clippy::cast_possible_truncation)]
const RECORD_LEN: u32 = RESULT_RECORD_LEN as u32;

/// Data read back from the guest.
///
/// Releasing the guest buffer is independent of reading it: a failed
/// release is reported in `release` while `data` stays valid.
#[derive(Debug)]
pub struct Extracted {
    /// Bytes the guest returned.
    pub data: Vec<u8>,
    /// Outcome of freeing the guest buffer.
    pub release: Result<(), BridgeError>,
}

/// Read the [`ResultRecord`] at the configured address, copy out the data it
/// points to and free it with the guest deallocator.
pub fn extract_result<G>(guest: &mut G, abi: &GuestAbiConfig) -> Result<Extracted, BridgeError>
where
    G: GuestInstance + ?Sized,
{
    let raw = guest.read_memory(abi.result_offset, RECORD_LEN)?;
    let bytes: [u8; RESULT_RECORD_LEN] =
        raw.try_into().map_err(|_| BridgeError::BadMemoryAccess {
            offset: abi.result_offset,
            length: RECORD_LEN,
        })?;
    let record = ResultRecord::decode(bytes);
    trace!(pointer = record.pointer, length = record.length, "Result record read");

    let data = guest.read_memory(record.pointer, record.length)?;
    let release = release(guest, abi, record.pointer, record.length);
    if let Err(e) = &release {
        warn!(error = %e, "Result extracted but guest buffer was not released");
    }

    Ok(Extracted { data, release })
}

/// Free `(pointer, length)` with the guest deallocator.
pub fn release<G>(
    guest: &mut G,
    abi: &GuestAbiConfig,
    pointer: u32,
    length: u32,
) -> Result<(), BridgeError>
where
    G: GuestInstance + ?Sized,
{
    guest
        .call(
            &abi.deallocator,
            &[to_guest_word(pointer), to_guest_word(length)],
        )
        .map(|_| ())
        .map_err(|e| BridgeError::DeallocationFailed {
            export: abi.deallocator.clone(),
            cause: HelperFailure::from_call_error(&e),
        })
}

/// Read the 64-bit value the guest wrote to the wide-return slot.
pub fn read_wide_return<G>(guest: &G, abi: &GuestAbiConfig) -> Result<u64, BridgeError>
where
    G: GuestInstance + ?Sized,
{
    let raw = guest.read_memory(abi.wide_return_offset, 8)?;
    let bytes: [u8; 8] = raw.try_into().map_err(|_| BridgeError::BadMemoryAccess {
        offset: abi.wide_return_offset,
        length: 8,
    })?;
    Ok(decode_u64_le(bytes))
}
