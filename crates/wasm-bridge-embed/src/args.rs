//! Conversion of host values into [`ArgumentDescriptor`]s.
//!
//! Host values arrive as JSON: numbers, strings, and arrays of bytes. How a
//! number is passed depends on the call style. Calls returning 64-bit
//! integers take 64-bit arguments; every other call takes 32-bit ones.

use serde_json::Value;

use wasm_bridge_common::BridgeError;
use wasm_bridge_core::{ArgumentDescriptor, NumberWidth};

/// Convert one host value.
///
/// # Errors
///
/// Returns [`BridgeError::UnsupportedArgumentType`] for booleans, nulls,
/// objects, non-byte arrays, fractional numbers and numbers that do not fit
/// the requested width.
pub fn to_descriptor(value: &Value, width: NumberWidth) -> Result<ArgumentDescriptor, BridgeError> {
    match value {
        Value::Number(number) => number_descriptor(number, width),
        Value::String(text) => Ok(ArgumentDescriptor::Text(text.clone())),
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_u64().and_then(|n| u8::try_from(n).ok()))
            .collect::<Option<Vec<u8>>>()
            .map(ArgumentDescriptor::Bytes)
            .ok_or_else(|| BridgeError::unsupported_argument("array of non-byte values")),
        Value::Bool(_) => Err(BridgeError::unsupported_argument("boolean")),
        Value::Null => Err(BridgeError::unsupported_argument("null")),
        Value::Object(_) => Err(BridgeError::unsupported_argument("object")),
    }
}

/// Convert a list of host values.
pub fn to_descriptors(
    values: &[Value],
    width: NumberWidth,
) -> Result<Vec<ArgumentDescriptor>, BridgeError> {
    values.iter().map(|v| to_descriptor(v, width)).collect()
}

fn number_descriptor(
    number: &serde_json::Number,
    width: NumberWidth,
) -> Result<ArgumentDescriptor, BridgeError> {
    let out_of_range = || BridgeError::unsupported_argument(format!("number {number} out of range"));

    match width {
        NumberWidth::Narrow => {
            // Accept both the signed and unsigned 32-bit range; the guest sees
            // the same bit pattern either way.
            let value = number
                .as_i64()
                .filter(|n| (i64::from(i32::MIN)..=i64::from(u32::MAX)).contains(n))
                .ok_or_else(out_of_range)?;
            #[allow(clippy::cast_possible_truncation)]
            Ok(ArgumentDescriptor::Number(value as i32))
        }
        NumberWidth::Wide => {
            if let Some(value) = number.as_u64() {
                Ok(ArgumentDescriptor::WideNumber(value))
            } else if let Some(value) = number.as_i64() {
                #[allow(clippy::cast_sign_loss)]
                Ok(ArgumentDescriptor::WideNumber(value as u64))
            } else {
                Err(out_of_range())
            }
        }
    }
}

/// Parse a command-line argument as a JSON literal, falling back to text.
///
/// `42` is a number, `"42"` and `hello` are text, `[1,2,3]` is bytes.
pub fn parse_cli_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
