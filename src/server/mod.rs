//! Server: service registry, accept loop and per-connection dispatch.
//!
//! Each connection runs one dispatch loop:
//!
//! 1. Read the option envelope and pick the codec
//! 2. Read `[Header][Body]` pairs until the peer closes
//! 3. Resolve `Service.Method`, decode the argument, spawn the request
//! 4. Wait for every spawned request, then close the connection
//!
//! Requests on one connection run concurrently, bounded by
//! [`ServerConfig::max_concurrent_requests`]. When the bound is reached the
//! loop stops reading until a method finishes. Responses share one writer
//! per connection behind an async mutex, so each response is written whole.
//!
//! # Example
//!
//! ```no_run
//! use wirerpc::{Server, ServiceBuilder};
//!
//! struct Foo;
//!
//! impl Foo {
//!     fn sum(&self, args: (i32, i32), reply: &mut i32) -> Result<(), String> {
//!         *reply = args.0 + args.1;
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> wirerpc::Result<()> {
//!     let server = Server::new();
//!     server.register(ServiceBuilder::new("Foo", Foo).method("Sum", Foo::sum).build()?)?;
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
//!     server.accept(listener).await
//! }
//! ```

mod timeout;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, WriteHalf};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

use crate::error::{Result, RpcError};
use crate::negotiate::accept_options;
use crate::protocol::{Header, DEFAULT_MAX_MESSAGE_SIZE};
use crate::reader::{CodecReader, MessageReader};
use crate::service::{Invocation, MethodType, Service, ServiceStats};
use crate::writer::CodecWriter;

/// Default bound on concurrently running requests per connection.
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 256;

/// Server tuning.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Requests of one connection allowed to run at the same time.
    pub max_concurrent_requests: usize,
    /// Largest accepted encoded value (header or body).
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// Builder for [`Server`].
#[derive(Debug, Default)]
pub struct ServerBuilder {
    config: ServerConfig,
}

impl ServerBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-connection concurrency bound.
    ///
    /// Default: 256
    pub fn max_concurrent_requests(mut self, limit: usize) -> Self {
        self.config.max_concurrent_requests = limit.max(1);
        self
    }

    /// Set the maximum size of one encoded value.
    ///
    /// Default: 1 GB
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    /// Build the server.
    pub fn build(self) -> Server {
        Server {
            inner: Arc::new(ServerInner {
                config: self.config,
                services: RwLock::new(HashMap::new()),
            }),
        }
    }
}

struct ServerInner {
    config: ServerConfig,
    services: RwLock<HashMap<String, Arc<Service>>>,
}

/// RPC server. Cheap to clone; clones share the registry.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

type SharedWriter<S> = Arc<Mutex<CodecWriter<WriteHalf<S>>>>;

impl Server {
    /// Create a server with default settings.
    pub fn new() -> Self {
        ServerBuilder::new().build()
    }

    /// Create a server builder.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Current configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Make `service` callable.
    ///
    /// # Errors
    ///
    /// `DuplicateService` if a service of the same name is registered; the
    /// first registration stays in place.
    pub fn register(&self, service: Service) -> Result<()> {
        let mut services = self
            .inner
            .services
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if services.contains_key(service.name()) {
            return Err(RpcError::DuplicateService(service.name().to_string()));
        }
        tracing::info!(
            "rpc server: registered service {} ({} methods)",
            service.name(),
            service.len()
        );
        services.insert(service.name().to_string(), Arc::new(service));
        Ok(())
    }

    /// Snapshot of every registered service, sorted by name.
    pub fn service_stats(&self) -> Vec<ServiceStats> {
        let services = self
            .inner
            .services
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut stats: Vec<ServiceStats> = services.values().map(|s| s.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Accept connections until the listener fails, serving each on its own
    /// task.
    ///
    /// # Errors
    ///
    /// The accept error that ended the loop.
    pub async fn accept(&self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::error!("rpc server: accept error: {}", e);
                    return Err(e.into());
                }
            };
            tracing::debug!("rpc server: connection from {}", peer);

            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.serve_conn(stream).await {
                    tracing::debug!("rpc server: connection {} ended: {}", peer, e);
                }
            });
        }
    }

    /// Serve one connection until the peer closes it.
    ///
    /// Returns after every request read from the connection has been
    /// answered (or timed out) and the write half is shut down.
    ///
    /// # Errors
    ///
    /// Negotiation failures and unreadable headers. Errors of individual
    /// requests are sent to the peer instead.
    pub async fn serve_conn<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader =
            MessageReader::with_max_message_size(read_half, self.inner.config.max_message_size);

        let (options, codec) = match accept_options(&mut reader).await {
            Ok(negotiated) => negotiated,
            Err(e) => {
                tracing::warn!("rpc server: options error: {}", e);
                return Err(e);
            }
        };

        let reader = CodecReader::new(reader, codec);
        let writer = Arc::new(Mutex::new(CodecWriter::new(write_half, codec)));
        self.dispatch(reader, writer, options.handle_timeout).await
    }

    async fn dispatch<S>(
        &self,
        mut reader: CodecReader<tokio::io::ReadHalf<S>>,
        writer: SharedWriter<S>,
        handle_timeout: Duration,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.inner.config.max_concurrent_requests));
        let mut requests = JoinSet::new();

        let result = loop {
            let header = match reader.read_header().await {
                Ok(Some(header)) => header,
                Ok(None) => break Ok(()),
                Err(e) => {
                    if !e.is_unexpected_eof() {
                        tracing::warn!("rpc server: read header error: {}", e);
                    }
                    break Err(e);
                }
            };
            let body = match reader.read_body().await {
                Ok(body) => body,
                Err(e) => break Err(e),
            };

            let invocation = match self
                .find_method(&header.service_method)
                .and_then(|method| method.prepare(reader.codec(), &body))
            {
                Ok(invocation) => invocation,
                Err(e) => {
                    tracing::debug!("rpc server: request {} rejected: {}", header.seq, e);
                    send_error(&writer, header, e).await;
                    continue;
                }
            };

            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break Ok(()),
            };
            requests.spawn(handle_request(
                Arc::clone(&writer),
                header,
                invocation,
                permit,
                handle_timeout,
            ));

            while requests.try_join_next().is_some() {}
        };

        while requests.join_next().await.is_some() {}
        if let Err(e) = writer.lock().await.close().await {
            tracing::debug!("rpc server: close error: {}", e);
        }
        result
    }

    /// Resolve `"Service.Method"`, splitting on the last dot.
    fn find_method(&self, service_method: &str) -> Result<Arc<MethodType>> {
        let (service_name, method_name) = service_method
            .rsplit_once('.')
            .ok_or_else(|| RpcError::IllFormedMethod(service_method.to_string()))?;

        let services = self
            .inner
            .services
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let service = services
            .get(service_name)
            .ok_or_else(|| RpcError::ServiceNotFound(service_name.to_string()))?;
        service
            .method(method_name)
            .cloned()
            .ok_or_else(|| RpcError::MethodNotFound(method_name.to_string()))
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

/// Run one request and write its single response.
async fn handle_request<S>(
    writer: SharedWriter<S>,
    header: Header,
    invocation: Invocation,
    permit: OwnedSemaphorePermit,
    handle_timeout: Duration,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    match timeout::invoke(&header.service_method, invocation, permit, handle_timeout).await {
        Ok(reply) => {
            let mut writer = writer.lock().await;
            if let Err(e) = writer.write_encoded(&header, &reply).await {
                tracing::warn!("rpc server: write response error: {}", e);
            }
        }
        Err(e) => {
            tracing::debug!("rpc server: request {} failed: {}", header.seq, e);
            send_error(&writer, header, e).await;
        }
    }
}

async fn send_error<S>(writer: &SharedWriter<S>, header: Header, error: RpcError)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let header = header.with_error(error.to_string());
    let mut writer = writer.lock().await;
    if let Err(e) = writer.write(&header, &()).await {
        tracing::warn!("rpc server: write response error: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecType;
    use crate::negotiate::send_options;
    use crate::protocol::Options;
    use crate::service::ServiceBuilder;
    use tokio::io::duplex;

    struct Foo;

    impl Foo {
        fn sum(&self, args: (i32, i32), reply: &mut i32) -> std::result::Result<(), String> {
            *reply = args.0 + args.1;
            Ok(())
        }
    }

    fn foo_service() -> Service {
        ServiceBuilder::new("Foo", Foo)
            .method("Sum", Foo::sum)
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_configuration() {
        let server = Server::builder()
            .max_concurrent_requests(8)
            .max_message_size(1024)
            .build();
        assert_eq!(server.config().max_concurrent_requests, 8);
        assert_eq!(server.config().max_message_size, 1024);

        let server = Server::default();
        assert_eq!(server.config().max_concurrent_requests, 256);
    }

    #[test]
    fn test_duplicate_service() {
        let server = Server::new();
        server.register(foo_service()).unwrap();
        let err = server.register(foo_service()).unwrap_err();
        assert_eq!(err.to_string(), "rpc: service already defined: Foo");
        assert_eq!(server.service_stats().len(), 1);
    }

    #[test]
    fn test_find_method() {
        let server = Server::new();
        server.register(foo_service()).unwrap();

        assert_eq!(server.find_method("Foo.Sum").unwrap().name(), "Sum");
        assert_eq!(
            server.find_method("FooSum").unwrap_err().to_string(),
            "rpc server: service/method request ill-formed: FooSum"
        );
        assert_eq!(
            server.find_method("Bar.Sum").unwrap_err().to_string(),
            "rpc server: can't find service Bar"
        );
        assert_eq!(
            server.find_method("Foo.Mul").unwrap_err().to_string(),
            "rpc server: can't find method Mul"
        );
        // Split happens on the last dot.
        assert_eq!(
            server.find_method("a.Foo.Sum").unwrap_err().to_string(),
            "rpc server: can't find service a.Foo"
        );
    }

    #[tokio::test]
    async fn test_serve_conn_round_trip() {
        let server = Server::new();
        server.register(foo_service()).unwrap();

        let (client, conn) = duplex(4096);
        let task = tokio::spawn({
            let server = server.clone();
            async move { server.serve_conn(conn).await }
        });

        let (read_half, mut write_half) = tokio::io::split(client);
        let codec = send_options(&mut write_half, &Options::default())
            .await
            .unwrap();
        let mut writer = CodecWriter::new(write_half, codec);
        let mut reader = CodecReader::new(MessageReader::new(read_half), codec);

        writer.write(&Header::new("Foo.Sum", 1), &(3, 4)).await.unwrap();
        let header = reader.read_header().await.unwrap().unwrap();
        assert_eq!(header.seq, 1);
        assert!(!header.is_error());
        let body = reader.read_body().await.unwrap();
        assert_eq!(reader.decode_body::<i32>(&body).unwrap(), 7);

        writer.close().await.unwrap();
        task.await.unwrap().unwrap();
        assert!(reader.read_header().await.unwrap().is_none());
        assert_eq!(server.service_stats()[0].methods[0].num_calls, 1);
    }

    #[tokio::test]
    async fn test_bad_argument_keeps_connection() {
        let server = Server::new();
        server.register(foo_service()).unwrap();

        let (client, conn) = duplex(4096);
        let task = tokio::spawn({
            let server = server.clone();
            async move { server.serve_conn(conn).await }
        });

        let (read_half, mut write_half) = tokio::io::split(client);
        let codec = send_options(&mut write_half, &Options::default().with_codec(CodecType::Json))
            .await
            .unwrap();
        let mut writer = CodecWriter::new(write_half, codec);
        let mut reader = CodecReader::new(MessageReader::new(read_half), codec);

        writer.write(&Header::new("Foo.Sum", 1), &"three").await.unwrap();
        let header = reader.read_header().await.unwrap().unwrap();
        assert_eq!(header.seq, 1);
        assert!(header.is_error());
        reader.read_body().await.unwrap();

        writer.write(&Header::new("Foo.Sum", 2), &(1, 1)).await.unwrap();
        let header = reader.read_header().await.unwrap().unwrap();
        assert_eq!(header.seq, 2);
        let body = reader.read_body().await.unwrap();
        assert_eq!(reader.decode_body::<i32>(&body).unwrap(), 2);

        writer.close().await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_negotiation_failure_closes() {
        let server = Server::new();
        let (client, conn) = duplex(4096);
        let task = tokio::spawn(async move { server.serve_conn(conn).await });

        let (read_half, mut write_half) = tokio::io::split(client);
        let options = Options {
            magic_number: 0xdead,
            ..Options::default()
        };
        tokio::io::AsyncWriteExt::write_all(
            &mut write_half,
            &crate::codec::JsonCodec::encode(&options).unwrap(),
        )
        .await
        .unwrap();

        assert!(matches!(
            task.await.unwrap(),
            Err(RpcError::InvalidMagicNumber(0xdead))
        ));
        // Nothing is sent back.
        let mut reader = MessageReader::new(read_half);
        assert!(reader.next_value(CodecType::Json).await.unwrap().is_none());
    }
}
