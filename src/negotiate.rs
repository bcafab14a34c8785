//! One-time option handshake.
//!
//! The initiator writes a single [`Options`] JSON line; the acceptor reads it
//! with the same [`MessageReader`] that will later carry headers and bodies,
//! validates it, and picks the codec. Nothing is sent back: on failure the
//! acceptor simply drops the connection.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::codec::{CodecType, JsonCodec};
use crate::error::{Result, RpcError};
use crate::protocol::Options;
use crate::reader::MessageReader;

/// Largest option envelope the acceptor buffers.
pub const MAX_OPTIONS_SIZE: usize = 4096;

/// Send the option envelope (initiator side).
///
/// # Errors
///
/// Returns error if the codec tag is unknown (nothing is written then) or the
/// write fails.
pub async fn send_options<W>(writer: &mut W, options: &Options) -> Result<CodecType>
where
    W: AsyncWrite + Unpin,
{
    let codec = options.validate()?;
    let line = JsonCodec::encode(options)?;
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(codec)
}

/// Receive and validate the option envelope (acceptor side).
///
/// The envelope is read under a limit of [`MAX_OPTIONS_SIZE`]; the reader's
/// own limit is restored afterwards for data traffic.
///
/// # Errors
///
/// `ConnectionClosed` if the stream ends first, `Protocol` for an envelope
/// over the limit, a decode error for a malformed envelope,
/// `InvalidMagicNumber` or `UnknownCodec`.
pub async fn accept_options<R>(reader: &mut MessageReader<R>) -> Result<(Options, CodecType)>
where
    R: AsyncRead + Unpin,
{
    let limit = reader.max_message_size();
    reader.set_max_message_size(limit.min(MAX_OPTIONS_SIZE));
    let line = reader.next_value(CodecType::Json).await;
    reader.set_max_message_size(limit);

    let line = line?.ok_or(RpcError::ConnectionClosed)?;
    let options: Options = JsonCodec::decode(&line)?;
    let codec = options.validate()?;
    Ok((options, codec))
}
