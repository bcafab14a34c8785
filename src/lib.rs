//! # wirerpc
//!
//! A small RPC framework over any reliable ordered byte stream.
//!
//! ## Architecture
//!
//! - **Negotiation**: the initiator sends one JSON line with a magic number,
//!   the body codec and timeouts
//! - **Data plane**: `[Header][Body]` pairs in the negotiated codec
//!   (MessagePack or JSON lines), matched by sequence number
//! - **Server**: services of typed methods, one dispatch loop per
//!   connection, concurrent requests, per-request handle timeout
//! - **Client**: many concurrent calls over one connection, completed by a
//!   background receive loop
//!
//! ## Example
//!
//! ```no_run
//! use wirerpc::{Client, Options, Server, ServiceBuilder};
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
//!     let addr = listener.local_addr()?;
//!     tokio::spawn(async move { server.accept(listener).await });
//!
//!     let client = Client::dial(addr, Options::default()).await?;
//!     let sum: i32 = client.call("Foo.Sum", &(3, 4)).await?;
//!     assert_eq!(sum, 7);
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod error;
pub mod negotiate;
pub mod protocol;
pub mod reader;
pub mod service;
pub mod writer;

mod call;
mod client;
mod server;

pub use call::{Call, DEFAULT_DONE_CAPACITY};
pub use client::Client;
pub use codec::CodecType;
pub use error::{Result, RpcError};
pub use protocol::{Header, Options};
pub use server::{Server, ServerBuilder, ServerConfig, DEFAULT_MAX_CONCURRENT_REQUESTS};
pub use service::{Service, ServiceBuilder, ServiceStats};
