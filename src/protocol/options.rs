//! Option envelope exchanged once at connection start.
//!
//! The initiator sends exactly one [`Options`] value before any header/body
//! traffic. Because the body codec is not known yet, the envelope always uses
//! JSON lines:
//!
//! ```text
//! {"MagicNumber":3927900,"CodecType":"application/msgpack","ConnectTimeout":10000000000,"HandleTimeout":0}\n
//! ```
//!
//! Durations are integer nanoseconds; zero means unbounded.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use wirerpc::codec::CodecType;
//! use wirerpc::protocol::Options;
//!
//! let opt = Options::default()
//!     .with_codec(CodecType::Json)
//!     .with_handle_timeout(Duration::from_millis(50));
//! assert!(opt.validate().is_ok());
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::CodecType;
use crate::error::{Result, RpcError};

/// Sentinel identifying this protocol.
pub const MAGIC_NUMBER: u32 = 0x3bef5c;

/// Default bound on dial plus handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection options, immutable once sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Options {
    /// Must equal [`MAGIC_NUMBER`].
    pub magic_number: u32,
    /// Tag selecting the body codec (see [`crate::codec`]).
    pub codec_type: String,
    /// Bound on connect plus handshake; zero = no limit.
    #[serde(with = "nanos", default)]
    pub connect_timeout: Duration,
    /// Bound on one server-side method invocation; zero = no limit.
    #[serde(with = "nanos", default)]
    pub handle_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            magic_number: MAGIC_NUMBER,
            codec_type: CodecType::default().tag().to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handle_timeout: Duration::ZERO,
        }
    }
}

impl Options {
    /// Select the body codec.
    pub fn with_codec(mut self, codec: CodecType) -> Self {
        self.codec_type = codec.tag().to_string();
        self
    }

    /// Set the connect timeout (zero disables it).
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the per-request handle timeout (zero disables it).
    pub fn with_handle_timeout(mut self, timeout: Duration) -> Self {
        self.handle_timeout = timeout;
        self
    }

    /// Check the magic number and resolve the codec tag.
    ///
    /// # Errors
    ///
    /// `InvalidMagicNumber` or `UnknownCodec`.
    pub fn validate(&self) -> Result<CodecType> {
        if self.magic_number != MAGIC_NUMBER {
            return Err(RpcError::InvalidMagicNumber(self.magic_number));
        }
        self.codec_type.parse()
    }
}

/// `Duration` as integer nanoseconds.
mod nanos {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let nanos = u64::try_from(value.as_nanos()).unwrap_or(u64::MAX);
        serializer.serialize_u64(nanos)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_nanos)
    }
}
