//! RPC client: sequence numbers, pending calls and the receive loop.
//!
//! A [`Client`] owns one connection. Any number of tasks may issue calls
//! concurrently; requests are serialized by a send lock and responses are
//! matched back to their callers by sequence number in a background task.
//!
//! # Lifecycle
//!
//! 1. Send the option envelope
//! 2. Spawn the receive loop on the read half
//! 3. `go`/`call` write `[Header][Args]` under the send lock
//! 4. The receive loop completes pending calls as responses arrive
//!
//! The client is Active until either [`Client::close`] is called (Closing) or
//! the receive loop stops on a read error (ShutDown). Both are terminal: new
//! calls fail with [`RpcError::Shutdown`] and every pending call is completed
//! with an error.
//!
//! # Example
//!
//! ```no_run
//! use wirerpc::{Client, Options};
//!
//! #[tokio::main]
//! async fn main() -> wirerpc::Result<()> {
//!     let client = Client::dial("127.0.0.1:9999", Options::default()).await?;
//!     let sum: i32 = client.call("Foo.Sum", &(3, 4)).await?;
//!     assert_eq!(sum, 7);
//!     client.close().await
//! }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, watch};

use crate::call::{Call, PendingCall, DEFAULT_DONE_CAPACITY};
use crate::codec::CodecType;
use crate::error::{Result, RpcError};
use crate::negotiate::send_options;
use crate::protocol::{Header, Options};
use crate::reader::{CodecReader, MessageReader};
use crate::writer::CodecWriter;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// An RPC client bound to one connection.
///
/// Share it between tasks with `Arc<Client>`. Dropping the client stops the
/// receive loop; pending calls are then completed with `Shutdown`.
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    codec: CodecType,
    /// Send lock: one request on the wire at a time.
    sending: tokio::sync::Mutex<CodecWriter<BoxedWriter>>,
    state: Mutex<ClientState>,
    /// Flipped to `true` by `close` or drop. Watched by the receive loop and
    /// by a write in progress.
    closed: watch::Sender<bool>,
}

struct ClientState {
    seq: u64,
    pending: HashMap<u64, PendingCall>,
    /// Set by the user via `close`.
    closing: bool,
    /// Set when the receive loop stops.
    shutdown: bool,
}

impl Client {
    /// Start a client over an established byte stream.
    ///
    /// Sends the option envelope and spawns the receive loop.
    ///
    /// # Errors
    ///
    /// `UnknownCodec`/`InvalidMagicNumber` for bad options (nothing is
    /// written), or the I/O error of the handshake write.
    pub async fn new<S>(stream: S, options: Options) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let codec = match send_options(&mut write_half, &options).await {
            Ok(codec) => codec,
            Err(e) => {
                tracing::warn!("rpc client: options error: {}", e);
                return Err(e);
            }
        };

        let (closed, closed_rx) = watch::channel(false);
        let writer: BoxedWriter = Box::new(write_half);
        let inner = Arc::new(ClientInner {
            codec,
            sending: tokio::sync::Mutex::new(CodecWriter::new(writer, codec)),
            state: Mutex::new(ClientState {
                seq: 1,
                pending: HashMap::new(),
                closing: false,
                shutdown: false,
            }),
            closed,
        });

        let reader = CodecReader::new(MessageReader::new(read_half), codec);
        tokio::spawn(receive_loop(Arc::clone(&inner), reader, closed_rx));

        Ok(Self { inner })
    }

    /// Connect over TCP and start a client.
    ///
    /// Connect plus handshake is bounded by `options.connect_timeout`
    /// (zero = no bound).
    ///
    /// # Errors
    ///
    /// `ConnectTimeout` when the bound is exceeded, otherwise the connect or
    /// handshake error.
    pub async fn dial<A: ToSocketAddrs>(addr: A, options: Options) -> Result<Self> {
        options.validate()?;
        let connect_timeout = options.connect_timeout;
        let connect = async move {
            let stream = TcpStream::connect(addr).await?;
            stream.set_nodelay(true)?;
            Self::new(stream, options).await
        };

        if connect_timeout.is_zero() {
            return connect.await;
        }
        tokio::time::timeout(connect_timeout, connect)
            .await
            .map_err(|_| RpcError::ConnectTimeout(connect_timeout))?
    }

    /// The negotiated codec.
    pub fn codec(&self) -> CodecType {
        self.inner.codec
    }

    /// Whether the client still accepts calls.
    pub fn is_available(&self) -> bool {
        let state = self.inner.state();
        !state.closing && !state.shutdown
    }

    /// Number of calls waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.state().pending.len()
    }

    /// Start a call; its outcome is delivered on `done`.
    ///
    /// Returns once the request is written. A call on a closed client is
    /// completed immediately with `Shutdown`. Delivery waits for room on
    /// `done`, so a caller that stops draining a full channel stalls the
    /// receive loop for every call on this client.
    pub async fn go<A, R>(&self, service_method: &str, args: &A, done: mpsc::Sender<Call<R>>)
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        self.send(service_method, args, done).await;
    }

    /// [`go`](Self::go) with a fresh done channel of capacity 10.
    pub async fn go_buffered<A, R>(&self, service_method: &str, args: &A) -> mpsc::Receiver<Call<R>>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        let (done, rx) = mpsc::channel(DEFAULT_DONE_CAPACITY);
        self.send(service_method, args, done).await;
        rx
    }

    /// Call a method and wait for its reply.
    ///
    /// # Errors
    ///
    /// `Remote` for errors reported by the server, `Shutdown` or
    /// `ConnectionLost` if the connection goes away first, or a local
    /// encode/decode/write error.
    pub async fn call<A, R>(&self, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        let (done, mut rx) = mpsc::channel(1);
        self.send(service_method, args, done).await;
        match rx.recv().await {
            Some(call) => call.result,
            None => Err(RpcError::Shutdown),
        }
    }

    /// Like [`call`](Self::call), but stop waiting after `timeout`.
    ///
    /// Only the wait for the reply is bounded; the request write is cut short
    /// by `close` alone. A reply arriving later is discarded.
    ///
    /// # Errors
    ///
    /// `CallTimeout` on expiry, otherwise as [`call`](Self::call).
    pub async fn call_timeout<A, R>(
        &self,
        service_method: &str,
        args: &A,
        timeout: Duration,
    ) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        let (done, mut rx) = mpsc::channel(1);
        let seq = self.send(service_method, args, done).await;

        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(call)) => call.result,
            Ok(None) => Err(RpcError::Shutdown),
            Err(_) => {
                if let Some(seq) = seq {
                    self.inner.remove_call(seq);
                }
                Err(RpcError::CallTimeout(timeout))
            }
        }
    }

    /// Close the connection.
    ///
    /// Does not wait for in-flight calls; they complete with `Shutdown`.
    /// A write stuck on a peer that stopped reading is abandoned, and the
    /// write half is then shut down in the background.
    ///
    /// # Errors
    ///
    /// `Shutdown` if the client is already closing, or the error of shutting
    /// down the write half when the send lock was free.
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.inner.state();
            if state.closing {
                return Err(RpcError::Shutdown);
            }
            state.closing = true;
        }
        self.inner.closed.send_replace(true);

        match self.inner.sending.try_lock() {
            Ok(mut writer) => writer.close().await,
            Err(_) => {
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move {
                    if let Err(e) = inner.sending.lock().await.close().await {
                        tracing::debug!("rpc client: shutdown of write half failed: {}", e);
                    }
                });
                Ok(())
            }
        }
    }

    /// Register and write one request. Returns the assigned sequence number,
    /// or `None` if the call was completed without being sent.
    async fn send<A, R>(
        &self,
        service_method: &str,
        args: &A,
        done: mpsc::Sender<Call<R>>,
    ) -> Option<u64>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        let call = PendingCall::new(service_method, self.inner.codec, done);
        let mut writer = self.inner.sending.lock().await;

        let seq = match self.inner.register_call(call) {
            Ok(seq) => seq,
            Err(call) => {
                drop(writer);
                call.complete(0, Err(RpcError::Shutdown)).await;
                return None;
            }
        };

        let header = Header::new(service_method, seq);
        let written = tokio::select! {
            result = writer.write(&header, args) => result,
            _ = closed_signal(self.inner.closed.subscribe()) => Err(RpcError::Shutdown),
        };
        if let Err(e) = written {
            drop(writer);
            tracing::debug!("rpc client: write of {} (seq {}) failed: {}", service_method, seq, e);
            // The receive loop may have completed it already.
            if let Some(call) = self.inner.remove_call(seq) {
                call.complete(seq, Err(e)).await;
            }
            return None;
        }
        Some(seq)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.inner.closed.send_replace(true);
    }
}

impl ClientInner {
    fn state(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Assign the next sequence number and park the call. Hands the call
    /// back if the client no longer accepts calls.
    fn register_call(&self, call: PendingCall) -> std::result::Result<u64, PendingCall> {
        let mut state = self.state();
        if state.closing || state.shutdown {
            return Err(call);
        }
        let seq = state.seq;
        state.seq += 1;
        state.pending.insert(seq, call);
        Ok(seq)
    }

    fn remove_call(&self, seq: u64) -> Option<PendingCall> {
        self.state().pending.remove(&seq)
    }

    /// Mark the client shut down and fail every pending call.
    async fn terminate_calls(&self, err: &RpcError) {
        let pending = {
            let mut state = self.state();
            state.shutdown = true;
            std::mem::take(&mut state.pending)
        };
        if !pending.is_empty() {
            tracing::debug!("rpc client: failing {} pending calls: {}", pending.len(), err);
        }
        for (seq, call) in pending {
            let err = match err {
                RpcError::Shutdown => RpcError::Shutdown,
                other => RpcError::ConnectionLost(other.to_string()),
            };
            call.complete(seq, Err(err)).await;
        }
    }
}

/// Resolves once the client is closed or dropped.
async fn closed_signal(mut closed: watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}

/// Read one response: header plus raw body.
async fn read_response<R>(reader: &mut CodecReader<R>) -> Result<Option<(Header, Bytes)>>
where
    R: AsyncRead + Unpin,
{
    let header = match reader.read_header().await? {
        Some(header) => header,
        None => return Ok(None),
    };
    let body = reader.read_body().await?;
    Ok(Some((header, body)))
}

async fn receive_loop<R>(
    inner: Arc<ClientInner>,
    mut reader: CodecReader<R>,
    closed: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin,
{
    let closed = closed_signal(closed);
    tokio::pin!(closed);

    let err = loop {
        let response = tokio::select! {
            _ = &mut closed => break RpcError::Shutdown,
            response = read_response(&mut reader) => response,
        };

        let (header, body) = match response {
            Ok(Some(response)) => response,
            Ok(None) => break RpcError::ConnectionClosed,
            Err(e) => break e,
        };

        match inner.remove_call(header.seq) {
            // Nobody waits for it (write failed or the caller gave up);
            // the body is already consumed.
            None => {
                tracing::debug!("rpc client: discarding response for seq {}", header.seq);
            }
            Some(call) if header.is_error() => {
                call.complete(header.seq, Err(RpcError::Remote(header.error))).await;
            }
            Some(call) => call.complete(header.seq, Ok(body)).await,
        }
    };

    if !matches!(err, RpcError::Shutdown | RpcError::ConnectionClosed) {
        tracing::warn!("rpc client: receive loop stopped: {}", err);
    }
    inner.terminate_calls(&err).await;
}
