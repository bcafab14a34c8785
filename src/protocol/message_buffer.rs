//! Message buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management. Bytes from the
//! socket are appended as they arrive; a complete message is split off the
//! front as soon as the codec reports where the current value ends. Because
//! the framing comes from the serialization itself, the buffer asks the
//! [`CodecType`] for the value length instead of reading a length prefix.
//!
//! # Example
//!
//! ```
//! use wirerpc::codec::CodecType;
//! use wirerpc::protocol::MessageBuffer;
//!
//! let mut buffer = MessageBuffer::new();
//! let encoded = CodecType::MsgPack.encode(&"hello").unwrap();
//!
//! buffer.extend(&encoded[..2]);
//! assert!(buffer.try_extract(CodecType::MsgPack).unwrap().is_none());
//!
//! buffer.extend(&encoded[2..]);
//! let message = buffer.try_extract(CodecType::MsgPack).unwrap().unwrap();
//! assert_eq!(&message[..], &encoded[..]);
//! ```

use bytes::{Bytes, BytesMut};

use crate::codec::CodecType;
use crate::error::{Result, RpcError};

/// Default maximum size of one encoded value (1 GB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1_073_741_824;

/// Initial buffer capacity.
const INITIAL_CAPACITY: usize = 64 * 1024;

/// Buffer for accumulating incoming bytes and extracting complete values.
pub struct MessageBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Maximum allowed size of a single value.
    max_message_size: usize,
}

impl MessageBuffer {
    /// Create a new buffer with default settings.
    ///
    /// Default capacity: 64KB, max message: 1GB.
    pub fn new() -> Self {
        Self::with_max_message_size(DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Create a new buffer with a custom max message size.
    pub fn with_max_message_size(max_message_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
            max_message_size,
        }
    }

    /// Append data without extracting anything.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Writable tail for socket reads (`AsyncReadExt::read_buf`).
    pub(crate) fn spare(&mut self) -> &mut BytesMut {
        if self.buffer.capacity() == self.buffer.len() {
            self.buffer.reserve(INITIAL_CAPACITY);
        }
        &mut self.buffer
    }

    /// Try to split one complete value off the front of the buffer.
    ///
    /// Returns:
    /// - `Ok(Some(bytes))` if a complete value was extracted
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` on malformed data or a value over the size limit
    pub fn try_extract(&mut self, codec: CodecType) -> Result<Option<Bytes>> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        match codec.value_len(&self.buffer)? {
            Some(len) if len > self.max_message_size => Err(self.too_large(len)),
            Some(len) => Ok(Some(self.buffer.split_to(len).freeze())),
            None if self.buffer.len() > self.max_message_size => {
                Err(self.too_large(self.buffer.len()))
            }
            None => Ok(None),
        }
    }

    fn too_large(&self, len: usize) -> RpcError {
        RpcError::Protocol(format!(
            "Message size {} exceeds maximum {}",
            len, self.max_message_size
        ))
    }

    /// Maximum allowed size of a single value.
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Change the size limit. Applies to the next extraction, including a
    /// value already partly buffered.
    pub fn set_max_message_size(&mut self, max_message_size: usize) {
        self.max_message_size = max_message_size;
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::new()
    }
}
