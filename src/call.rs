//! Completed calls and the client's pending-call entries.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use crate::codec::CodecType;
use crate::error::Result;

/// Default capacity of the channel created by
/// [`Client::go_buffered`](crate::Client::go_buffered).
pub const DEFAULT_DONE_CAPACITY: usize = 10;

/// Outcome of one call, delivered once on its done channel.
#[derive(Debug)]
pub struct Call<R> {
    /// Sequence number assigned by the client (0 if the call was rejected
    /// before one was assigned).
    pub seq: u64,
    /// `"Service.Method"` that was called.
    pub service_method: String,
    /// The decoded reply or the reason there is none.
    pub result: Result<R>,
}

impl<R> Call<R> {
    /// Unwrap into the reply.
    pub fn into_result(self) -> Result<R> {
        self.result
    }

    /// Whether the call produced a reply.
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Boxed future returned by a completion.
type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

type Completion = Box<dyn FnOnce(u64, Result<Bytes>) -> BoxFuture + Send + 'static>;

/// A call waiting for its response.
///
/// Holds a type-erased completion that decodes the raw reply body into the
/// caller's reply type and delivers the [`Call`]. Consuming `complete`
/// guarantees a call is completed at most once.
///
/// Delivery waits for room on the done channel, so a caller that does not
/// drain its channel holds up the receive loop. The result is dropped only
/// when the receiver is gone.
pub(crate) struct PendingCall {
    complete: Completion,
}

impl PendingCall {
    pub(crate) fn new<R>(service_method: &str, codec: CodecType, done: mpsc::Sender<Call<R>>) -> Self
    where
        R: DeserializeOwned + Send + 'static,
    {
        let service_method = service_method.to_string();
        Self {
            complete: Box::new(move |seq, body| {
                let result = body.and_then(|body| codec.decode::<R>(&body));
                let call = Call {
                    seq,
                    service_method,
                    result,
                };
                Box::pin(async move {
                    if let Err(mpsc::error::SendError(call)) = done.send(call).await {
                        tracing::debug!(
                            "rpc client: caller gone, dropping result of {} (seq {})",
                            call.service_method,
                            call.seq
                        );
                    }
                })
            }),
        }
    }

    /// Deliver the raw reply body (or the error) for call `seq`.
    pub(crate) async fn complete(self, seq: u64, body: Result<Bytes>) {
        (self.complete)(seq, body).await
    }
}
