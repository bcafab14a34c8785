//! Read side of a connection.
//!
//! [`MessageReader`] pulls bytes from the socket into a [`MessageBuffer`] and
//! hands out one complete encoded value at a time. It is used raw for the
//! option envelope and then wrapped in a [`CodecReader`] once the codec is
//! known, so no byte read ahead during negotiation is lost.
//!
//! Both reads are cancel safe: partially received values stay in the buffer.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::codec::CodecType;
use crate::error::{Result, RpcError};
use crate::protocol::{Header, MessageBuffer};

/// Buffered reader of self-delimited values.
pub struct MessageReader<R> {
    reader: R,
    buffer: MessageBuffer,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    /// Wrap a read half with the default message size limit.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: MessageBuffer::new(),
        }
    }

    /// Wrap a read half with a custom message size limit.
    pub fn with_max_message_size(reader: R, max_message_size: usize) -> Self {
        Self {
            reader,
            buffer: MessageBuffer::with_max_message_size(max_message_size),
        }
    }

    /// Current message size limit.
    pub fn max_message_size(&self) -> usize {
        self.buffer.max_message_size()
    }

    /// Change the message size limit for the following reads.
    pub fn set_max_message_size(&mut self, max_message_size: usize) {
        self.buffer.set_max_message_size(max_message_size);
    }

    /// Read the next complete value.
    ///
    /// Returns `Ok(None)` if the stream ended cleanly between values, and an
    /// `UnexpectedEof` I/O error if it ended inside one.
    pub async fn next_value(&mut self, codec: CodecType) -> Result<Option<Bytes>> {
        loop {
            if let Some(value) = self.buffer.try_extract(codec)? {
                return Ok(Some(value));
            }

            let n = self.reader.read_buf(self.buffer.spare()).await?;
            if n == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(RpcError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("stream ended inside a value ({} bytes buffered)", self.buffer.len()),
                )));
            }
        }
    }
}

/// Header/body reader for a negotiated codec.
pub struct CodecReader<R> {
    inner: MessageReader<R>,
    codec: CodecType,
}

impl<R: AsyncRead + Unpin> CodecReader<R> {
    /// Continue reading `inner` with `codec`.
    pub fn new(inner: MessageReader<R>, codec: CodecType) -> Self {
        Self { inner, codec }
    }

    /// The negotiated codec.
    #[inline]
    pub fn codec(&self) -> CodecType {
        self.codec
    }

    /// Read and decode the next header.
    ///
    /// Returns `Ok(None)` on a clean end of stream.
    pub async fn read_header(&mut self) -> Result<Option<Header>> {
        match self.inner.next_value(self.codec).await? {
            Some(bytes) => Ok(Some(self.codec.decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Read the raw encoded body that follows a header.
    ///
    /// The whole value is always consumed, so the stream stays aligned even
    /// when the caller later fails to decode it or discards it.
    pub async fn read_body(&mut self) -> Result<Bytes> {
        self.inner
            .next_value(self.codec)
            .await?
            .ok_or(RpcError::ConnectionClosed)
    }

    /// Decode a body returned by [`read_body`](Self::read_body).
    pub fn decode_body<T: serde::de::DeserializeOwned>(&self, body: &[u8]) -> Result<T> {
        self.codec.decode(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncWriteExt};

    #[tokio::test]
    async fn test_reads_header_and_body() {
        let (mut tx, rx) = duplex(4096);
        let codec = CodecType::MsgPack;

        tx.write_all(&codec.encode(&Header::new("Foo.Sum", 1)).unwrap())
            .await
            .unwrap();
        tx.write_all(&codec.encode(&7i64).unwrap()).await.unwrap();
        drop(tx);

        let mut reader = CodecReader::new(MessageReader::new(rx), codec);
        let header = reader.read_header().await.unwrap().unwrap();
        assert_eq!(header.service_method, "Foo.Sum");

        let body = reader.read_body().await.unwrap();
        let reply: i64 = reader.decode_body(&body).unwrap();
        assert_eq!(reply, 7);

        assert!(reader.read_header().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_value_split_across_writes() {
        let (mut tx, rx) = duplex(4096);
        let codec = CodecType::Json;
        let encoded = codec.encode(&Header::new("Foo.Sum", 2)).unwrap();

        let writer = tokio::spawn(async move {
            for chunk in encoded.chunks(3) {
                tx.write_all(chunk).await.unwrap();
                tokio::task::yield_now().await;
            }
        });

        let mut reader = CodecReader::new(MessageReader::new(rx), codec);
        let header = reader.read_header().await.unwrap().unwrap();
        assert_eq!(header.seq, 2);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_eof_inside_value_is_error() {
        let (mut tx, rx) = duplex(4096);
        let encoded = CodecType::MsgPack.encode(&Header::new("Foo.Sum", 3)).unwrap();
        tx.write_all(&encoded[..encoded.len() - 1]).await.unwrap();
        drop(tx);

        let mut reader = MessageReader::new(rx);
        let err = reader.next_value(CodecType::MsgPack).await.unwrap_err();
        assert!(err.is_unexpected_eof());
    }

    #[tokio::test]
    async fn test_missing_body_is_connection_closed() {
        let (mut tx, rx) = duplex(4096);
        let codec = CodecType::MsgPack;
        tx.write_all(&codec.encode(&Header::new("Foo.Sum", 4)).unwrap())
            .await
            .unwrap();
        drop(tx);

        let mut reader = CodecReader::new(MessageReader::new(rx), codec);
        reader.read_header().await.unwrap().unwrap();
        assert!(matches!(
            reader.read_body().await,
            Err(RpcError::ConnectionClosed)
        ));
    }
}
