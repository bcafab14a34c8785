//! Type-erased method descriptors.
//!
//! A method is registered as a typed function `Fn(&T, A, &mut R) -> Result<(), E>`.
//! [`TypedMethod`] wraps it behind the object-safe [`Handler`] trait so the
//! server can decode the argument from raw body bytes without knowing `A`,
//! and run the call later on a blocking thread.

use std::fmt::Display;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::CodecType;
use crate::error::{Result, RpcError};

/// A decoded request ready to run. Returns the encoded reply.
pub type Invocation = Box<dyn FnOnce() -> Result<Vec<u8>> + Send + 'static>;

/// Object-safe view of a registered method.
pub trait Handler: Send + Sync + 'static {
    /// Decode the argument from `body` and bind it to an invocation.
    fn prepare(&self, codec: CodecType, body: &[u8]) -> Result<Invocation>;
}

/// Wrapper that decodes the argument and allocates the reply before calling
/// the method.
pub struct TypedMethod<T, F, A, R, E> {
    receiver: Arc<T>,
    method: Arc<F>,
    _phantom: PhantomData<fn(A) -> (R, E)>,
}

impl<T, F, A, R, E> TypedMethod<T, F, A, R, E>
where
    T: Send + Sync + 'static,
    F: Fn(&T, A, &mut R) -> std::result::Result<(), E> + Send + Sync + 'static,
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Default + 'static,
    E: Display + 'static,
{
    /// Bind `method` to `receiver`.
    pub fn new(receiver: Arc<T>, method: F) -> Self {
        Self {
            receiver,
            method: Arc::new(method),
            _phantom: PhantomData,
        }
    }
}

impl<T, F, A, R, E> Handler for TypedMethod<T, F, A, R, E>
where
    T: Send + Sync + 'static,
    F: Fn(&T, A, &mut R) -> std::result::Result<(), E> + Send + Sync + 'static,
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Default + 'static,
    E: Display + 'static,
{
    fn prepare(&self, codec: CodecType, body: &[u8]) -> Result<Invocation> {
        let arg: A = codec.decode(body)?;
        let receiver = Arc::clone(&self.receiver);
        let method = Arc::clone(&self.method);

        Ok(Box::new(move || {
            let mut reply = R::default();
            (*method)(&receiver, arg, &mut reply)
                .map_err(|e| RpcError::Application(e.to_string()))?;
            codec.encode(&reply)
        }))
    }
}

/// A registered method and its call counter.
pub struct MethodType {
    name: String,
    arg_type: &'static str,
    reply_type: &'static str,
    num_calls: AtomicU64,
    handler: Box<dyn Handler>,
}

impl MethodType {
    pub(crate) fn new<A, R>(name: String, handler: Box<dyn Handler>) -> Self {
        Self {
            name,
            arg_type: std::any::type_name::<A>(),
            reply_type: std::any::type_name::<R>(),
            num_calls: AtomicU64::new(0),
            handler,
        }
    }

    /// Method name as registered.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rust type name of the argument.
    pub fn arg_type(&self) -> &'static str {
        self.arg_type
    }

    /// Rust type name of the reply.
    pub fn reply_type(&self) -> &'static str {
        self.reply_type
    }

    /// Number of invocations started so far.
    pub fn num_calls(&self) -> u64 {
        self.num_calls.load(Ordering::Relaxed)
    }

    /// Decode the argument and return an invocation that counts itself when
    /// it runs.
    pub fn prepare(self: &Arc<Self>, codec: CodecType, body: &[u8]) -> Result<Invocation> {
        let invocation = self.handler.prepare(codec, body)?;
        let method = Arc::clone(self);
        Ok(Box::new(move || {
            method.num_calls.fetch_add(1, Ordering::Relaxed);
            invocation()
        }))
    }
}

impl std::fmt::Debug for MethodType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodType")
            .field("name", &self.name)
            .field("arg_type", &self.arg_type)
            .field("reply_type", &self.reply_type)
            .field("num_calls", &self.num_calls())
            .finish()
    }
}
