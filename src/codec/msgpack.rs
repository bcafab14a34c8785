//! MsgPack codec using `rmp-serde`.
//!
//! Structs are always encoded with `to_vec_named` so that headers and bodies
//! are maps keyed by field name rather than positional arrays. Peers in other
//! languages decode them without knowing our field order.
//!
//! MessagePack values carry their own length information, so consecutive
//! values on the stream need no extra framing. [`MsgPackCodec::value_len`]
//! walks one value's markers to find where it ends.
//!
//! # Example
//!
//! ```
//! use wirerpc::codec::MsgPackCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Args {
//!     num1: i32,
//!     num2: i32,
//! }
//!
//! let args = Args { num1: 3, num2: 4 };
//! let encoded = MsgPackCodec::encode(&args).unwrap();
//! assert_eq!(MsgPackCodec::value_len(&encoded).unwrap(), Some(encoded.len()));
//! let decoded: Args = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, args);
//! ```

use crate::error::{Result, RpcError};

/// Read a big-endian length field of `width` bytes at `pos`, advancing `pos`.
/// Returns `Ok(None)` from the enclosing function if the field is truncated.
macro_rules! try_len {
    ($buf:expr, $pos:ident, $width:expr) => {{
        let end = $pos + $width;
        let Some(field) = $buf.get($pos..end) else {
            return Ok(None);
        };
        $pos = end;
        field.iter().fold(0usize, |acc, b| (acc << 8) | usize::from(*b))
    }};
}

/// MessagePack codec for headers and bodies.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map format).
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Length of the first complete MsgPack value in `buf`.
    ///
    /// Walks markers and length fields only; nothing is decoded. Returns
    /// `Ok(None)` when `buf` holds only a prefix of a value.
    ///
    /// # Errors
    ///
    /// Returns error on the reserved `0xc1` marker.
    pub fn value_len(buf: &[u8]) -> Result<Option<usize>> {
        let mut pos = 0usize;
        // Values still to be walked, including nested array/map items.
        let mut pending = 1usize;

        while pending > 0 {
            let Some(&marker) = buf.get(pos) else {
                return Ok(None);
            };
            pos += 1;
            pending -= 1;

            let (skip, items) = match marker {
                // positive/negative fixint, nil, false, true
                0x00..=0x7f | 0xe0..=0xff | 0xc0 | 0xc2 | 0xc3 => (0, 0),
                0x80..=0x8f => (0, 2 * usize::from(marker & 0x0f)),
                0x90..=0x9f => (0, usize::from(marker & 0x0f)),
                0xa0..=0xbf => (usize::from(marker & 0x1f), 0),
                0xc1 => {
                    return Err(RpcError::Protocol(
                        "reserved MsgPack marker 0xc1".to_string(),
                    ))
                }
                // bin / str
                0xc4 | 0xd9 => (try_len!(buf, pos, 1), 0),
                0xc5 | 0xda => (try_len!(buf, pos, 2), 0),
                0xc6 | 0xdb => (try_len!(buf, pos, 4), 0),
                // ext: length + type byte
                0xc7 => (try_len!(buf, pos, 1) + 1, 0),
                0xc8 => (try_len!(buf, pos, 2) + 1, 0),
                0xc9 => (try_len!(buf, pos, 4) + 1, 0),
                // float32/64, uint8..64, int8..64
                0xca => (4, 0),
                0xcb => (8, 0),
                0xcc | 0xd0 => (1, 0),
                0xcd | 0xd1 => (2, 0),
                0xce | 0xd2 => (4, 0),
                0xcf | 0xd3 => (8, 0),
                // fixext 1/2/4/8/16: type byte + data
                0xd4 => (2, 0),
                0xd5 => (3, 0),
                0xd6 => (5, 0),
                0xd7 => (9, 0),
                0xd8 => (17, 0),
                0xdc => (0, try_len!(buf, pos, 2)),
                0xdd => (0, try_len!(buf, pos, 4)),
                0xde => (0, 2 * try_len!(buf, pos, 2)),
                0xdf => (0, try_len!(buf, pos, 4).saturating_mul(2)),
            };

            pos = pos.saturating_add(skip);
            if pos > buf.len() {
                return Ok(None);
            }
            pending = pending.saturating_add(items);
        }

        Ok(Some(pos))
    }
}
