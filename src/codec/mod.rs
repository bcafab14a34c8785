//! Codec module - serialization of headers and bodies.
//!
//! Two codecs are available, selected per connection by the tag carried in
//! the option envelope:
//!
//! - [`MsgPackCodec`] - MessagePack via `rmp-serde` (`application/msgpack`, default)
//! - [`JsonCodec`] - newline-delimited JSON via `serde_json` (`application/json`)
//!
//! # Design
//!
//! Codecs are marker structs with static methods. [`CodecType`] is the
//! negotiated tag and dispatches to them with a `match`; there are no trait
//! objects. Both encodings are self-delimiting, so a stream of
//! `[header][body][header][body]...` needs no outer length prefix.
//!
//! # Example
//!
//! ```
//! use wirerpc::codec::CodecType;
//!
//! let codec: CodecType = "application/json".parse().unwrap();
//! let encoded = codec.encode(&42u32).unwrap();
//! assert_eq!(codec.value_len(&encoded).unwrap(), Some(encoded.len()));
//! let decoded: u32 = codec.decode(&encoded).unwrap();
//! assert_eq!(decoded, 42);
//! ```

mod json;
mod msgpack;

use std::fmt;
use std::str::FromStr;

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;

use crate::error::{Result, RpcError};

/// Tag of the MessagePack codec.
pub const MSGPACK_TYPE: &str = "application/msgpack";

/// Tag of the JSON lines codec.
pub const JSON_TYPE: &str = "application/json";

/// Negotiated serialization for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodecType {
    /// MessagePack, structs as maps.
    #[default]
    MsgPack,
    /// Compact JSON, one value per line.
    Json,
}

impl CodecType {
    /// All known codecs.
    pub const ALL: [CodecType; 2] = [CodecType::MsgPack, CodecType::Json];

    /// Wire tag for this codec.
    pub fn tag(self) -> &'static str {
        match self {
            CodecType::MsgPack => MSGPACK_TYPE,
            CodecType::Json => JSON_TYPE,
        }
    }

    /// Look up a codec by its wire tag.
    pub fn from_tag(tag: &str) -> Option<CodecType> {
        Self::ALL.into_iter().find(|c| c.tag() == tag)
    }

    /// Encode one value.
    pub fn encode<T: serde::Serialize + ?Sized>(self, value: &T) -> Result<Vec<u8>> {
        match self {
            CodecType::MsgPack => MsgPackCodec::encode(value),
            CodecType::Json => JsonCodec::encode(value),
        }
    }

    /// Decode one value.
    pub fn decode<T: serde::de::DeserializeOwned>(self, bytes: &[u8]) -> Result<T> {
        match self {
            CodecType::MsgPack => MsgPackCodec::decode(bytes),
            CodecType::Json => JsonCodec::decode(bytes),
        }
    }

    /// Length of the first complete value in `buf`, or `None` if more bytes
    /// are needed.
    pub fn value_len(self, buf: &[u8]) -> Result<Option<usize>> {
        match self {
            CodecType::MsgPack => MsgPackCodec::value_len(buf),
            CodecType::Json => Ok(JsonCodec::value_len(buf)),
        }
    }
}

impl FromStr for CodecType {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self> {
        CodecType::from_tag(s).ok_or_else(|| RpcError::UnknownCodec(s.to_string()))
    }
}

impl fmt::Display for CodecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}
