//! Fixed-layout records shared with the guest.

/// Size in bytes of an encoded [`ResultRecord`].
pub const RESULT_RECORD_LEN: usize = 8;

/// Location of variable-length data the guest returned.
///
/// Encoded as two little-endian `u32`s: data pointer then data length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultRecord {
    /// Guest address of the data.
    pub pointer: u32,
    /// Length of the data in bytes.
    pub length: u32,
}

impl ResultRecord {
    /// Encode into the guest layout.
    pub fn encode(self) -> [u8; RESULT_RECORD_LEN] {
        let mut out = [0u8; RESULT_RECORD_LEN];
        out[..4].copy_from_slice(&self.pointer.to_le_bytes());
        out[4..].copy_from_slice(&self.length.to_le_bytes());
        out
    }

    /// Decode from the guest layout.
    pub fn decode(bytes: [u8; RESULT_RECORD_LEN]) -> Self {
        let [p0, p1, p2, p3, l0, l1, l2, l3] = bytes;
        Self {
            pointer: u32::from_le_bytes([p0, p1, p2, p3]),
            length: u32::from_le_bytes([l0, l1, l2, l3]),
        }
    }
}

/// Split a 64-bit value into its (low, high) 32-bit words.
#[allow(clippy::cast_possible_truncation)]
pub fn split_u64(value: u64) -> (u32, u32) {
    let low = value as u32;
    let high = (value >> 32) as u32;
    (low, high)
}

/// Recombine (low, high) 32-bit words into a 64-bit value.
pub fn join_u64(low: u32, high: u32) -> u64 {
    u64::from(low) | (u64::from(high) << 32)
}

/// Reinterpret an unsigned word as a guest `i32` value.
#[allow(clippy::cast_possible_wrap)]
pub fn to_guest_word(value: u32) -> i32 {
    value as i32
}

/// Reinterpret a guest `i32` value as an unsigned word.
#[allow(clippy::cast_sign_loss)]
pub fn from_guest_word(value: i32) -> u32 {
    value as u32
}

/// Decode a 64-bit value the guest wrote as little-endian low then high word.
pub fn decode_u64_le(bytes: [u8; 8]) -> u64 {
    let [a, b, c, d, e, f, g, h] = bytes;
    join_u64(
        u32::from_le_bytes([a, b, c, d]),
        u32::from_le_bytes([e, f, g, h]),
    )
}
