//! JSON lines codec using `serde_json`.
//!
//! Every value is written compact and followed by a single `\n`. Compact JSON
//! never contains a raw newline (string newlines are escaped), so the first
//! `\n` always ends the current value. The same framing carries the option
//! envelope during negotiation.

use crate::error::Result;

/// Value terminator.
pub const DELIMITER: u8 = b'\n';

/// Newline-delimited JSON codec.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a value as one JSON line (including the trailing `\n`).
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    pub fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        let mut line = serde_json::to_vec(value)?;
        line.push(DELIMITER);
        Ok(line)
    }

    /// Decode one JSON value. Surrounding whitespace, including the
    /// terminator, is accepted.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Length of the first line in `buf`, terminator included.
    #[inline]
    pub fn value_len(buf: &[u8]) -> Option<usize> {
        buf.iter().position(|&b| b == DELIMITER).map(|i| i + 1)
    }
}
