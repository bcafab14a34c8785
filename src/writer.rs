//! Write side of a connection.
//!
//! A response or request is one header value followed by one body value.
//! [`CodecWriter::write`] encodes both completely before touching the socket,
//! then sends them with scatter/gather I/O and flushes once, so a message is
//! either written whole or fails as a unit.
//!
//! `CodecWriter` is not synchronized. Its owner serializes writers: the
//! client holds it behind the send lock, the server behind one lock per
//! connection.
//!
//! ```text
//! Handler 1 ─┐
//! Handler 2 ─┼─► Mutex<CodecWriter> ─► socket
//! Handler N ─┘
//! ```

use std::io::IoSlice;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::codec::CodecType;
use crate::error::{Result, RpcError};
use crate::protocol::Header;

/// Header/body writer for a negotiated codec.
pub struct CodecWriter<W> {
    writer: W,
    codec: CodecType,
}

impl<W: AsyncWrite + Unpin> CodecWriter<W> {
    /// Wrap a write half.
    pub fn new(writer: W, codec: CodecType) -> Self {
        Self { writer, codec }
    }

    /// The negotiated codec.
    #[inline]
    pub fn codec(&self) -> CodecType {
        self.codec
    }

    /// Encode and write one header followed by one body.
    ///
    /// Encoding errors are returned before anything reaches the socket.
    pub async fn write<T: serde::Serialize + ?Sized>(
        &mut self,
        header: &Header,
        body: &T,
    ) -> Result<()> {
        let body = self.codec.encode(body)?;
        self.write_encoded(header, &body).await
    }

    /// Write one header followed by a body already encoded with this codec.
    pub async fn write_encoded(&mut self, header: &Header, body: &[u8]) -> Result<()> {
        let header = self.codec.encode(header)?;
        write_parts(&mut self.writer, &[header.as_slice(), body]).await
    }

    /// Shut down the write half.
    pub async fn close(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// Write all parts using scatter/gather I/O (write_vectored), then flush.
///
/// The common case is a single `write_vectored` call; partial writes are
/// resumed from the exact byte where the kernel stopped.
async fn write_parts<W>(writer: &mut W, parts: &[&[u8]]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = parts.iter().map(|p| p.len()).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = remaining_slices(parts, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(RpcError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data left after `skip_bytes` were written.
fn remaining_slices<'a>(parts: &[&'a [u8]], skip_bytes: usize) -> Vec<IoSlice<'a>> {
    let mut slices = Vec::with_capacity(parts.len());
    let mut skipped = 0;

    for part in parts {
        let start = skipped;
        let end = skipped + part.len();

        if skip_bytes < end && !part.is_empty() {
            let start_in_part = skip_bytes.saturating_sub(start);
            slices.push(IoSlice::new(&part[start_in_part..]));
        }
        skipped = end;
    }

    slices
}
