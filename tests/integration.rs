//! Integration tests for wirerpc.
//!
//! These tests run real clients against real servers, over TCP and over
//! in-memory duplex streams.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use wirerpc::{Call, CodecType, Client, Options, RpcError, Server, ServiceBuilder};

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
struct Args {
    num1: i32,
    num2: i32,
}

struct Foo;

impl Foo {
    fn sum(&self, args: Args, reply: &mut i32) -> Result<(), String> {
        *reply = args.num1 + args.num2;
        Ok(())
    }

    fn sleep(&self, millis: u64, reply: &mut u64) -> Result<(), String> {
        std::thread::sleep(Duration::from_millis(millis));
        *reply = millis;
        Ok(())
    }

    fn div(&self, args: Args, reply: &mut i32) -> Result<(), String> {
        if args.num2 == 0 {
            return Err("divide by zero".to_string());
        }
        *reply = args.num1 / args.num2;
        Ok(())
    }
}

fn foo_server(server: Server) -> Server {
    let service = ServiceBuilder::new("Foo", Foo)
        .method("Sum", Foo::sum)
        .method("Sleep", Foo::sleep)
        .method("Div", Foo::div)
        .build()
        .unwrap();
    server.register(service).unwrap();
    server
}

async fn start(server: Server) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { server.accept(listener).await });
    addr
}

/// Test a plain call over TCP.
#[tokio::test]
async fn test_sum_over_tcp() {
    let addr = start(foo_server(Server::new())).await;
    let client = Client::dial(addr, Options::default()).await.unwrap();

    let reply: i32 = client
        .call("Foo.Sum", &Args { num1: 3, num2: 4 })
        .await
        .unwrap();
    assert_eq!(reply, 7);
    assert!(client.is_available());
}

/// Test that concurrent calls get distinct, increasing sequence numbers and
/// their own replies.
#[tokio::test]
async fn test_concurrent_calls() {
    let addr = start(foo_server(Server::new())).await;
    let client = Arc::new(Client::dial(addr, Options::default()).await.unwrap());

    let mut tasks = Vec::new();
    for i in 0..20 {
        let client = Arc::clone(&client);
        tasks.push(tokio::spawn(async move {
            let reply: i32 = client
                .call("Foo.Sum", &Args { num1: i, num2: i * i })
                .await
                .unwrap();
            assert_eq!(reply, i + i * i);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let (done, mut rx) = mpsc::channel::<Call<i32>>(20);
    for i in 0..20 {
        client
            .go("Foo.Sum", &Args { num1: i, num2: 1 }, done.clone())
            .await;
    }
    drop(done);

    let mut seqs = HashSet::new();
    while let Some(call) = rx.recv().await {
        let reply: i32 = call.result.unwrap();
        assert!(reply >= 1);
        assert!(seqs.insert(call.seq));
    }
    // The first 20 calls used 1..=20.
    assert_eq!(seqs, (21..=40).collect::<HashSet<u64>>());
}

/// Test the server-side handle timeout.
#[tokio::test]
async fn test_handle_timeout() {
    let addr = start(foo_server(Server::new())).await;
    let options = Options::default().with_handle_timeout(Duration::from_millis(50));
    let client = Client::dial(addr, options).await.unwrap();

    let started = Instant::now();
    let err = client.call::<_, u64>("Foo.Sleep", &300u64).await.unwrap_err();
    // The error arrives at the deadline, not when the method returns.
    assert!(started.elapsed() < Duration::from_millis(250));
    assert!(matches!(err, RpcError::Remote(_)));
    assert!(err.to_string().contains("handle timeout"));

    // Fast calls on the same connection still work.
    let reply: u64 = client.call("Foo.Sleep", &1u64).await.unwrap();
    assert_eq!(reply, 1);
}

/// Test the client-side call timeout.
#[tokio::test]
async fn test_call_timeout() {
    let addr = start(foo_server(Server::new())).await;
    let client = Client::dial(addr, Options::default()).await.unwrap();

    let err = client
        .call_timeout::<_, u64>("Foo.Sleep", &300u64, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("timeout"));

    let reply: i32 = client
        .call_timeout("Foo.Sum", &Args { num1: 1, num2: 1 }, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(reply, 2);
}

/// Test resolution errors; the connection survives each of them.
#[tokio::test]
async fn test_unknown_service_and_method() {
    let addr = start(foo_server(Server::new())).await;
    let client = Client::dial(addr, Options::default()).await.unwrap();
    let args = Args { num1: 1, num2: 2 };

    let err = client.call::<_, i32>("Bar.Sum", &args).await.unwrap_err();
    assert_eq!(err.to_string(), "rpc server: can't find service Bar");

    let err = client.call::<_, i32>("Foo.Mul", &args).await.unwrap_err();
    assert_eq!(err.to_string(), "rpc server: can't find method Mul");

    let err = client.call::<_, i32>("FooSum", &args).await.unwrap_err();
    assert!(err.to_string().contains("ill-formed"));

    let reply: i32 = client.call("Foo.Sum", &args).await.unwrap();
    assert_eq!(reply, 3);
}

/// Test that method errors and argument mismatches come back as errors.
#[tokio::test]
async fn test_method_errors() {
    let addr = start(foo_server(Server::new())).await;
    let client = Client::dial(addr, Options::default()).await.unwrap();

    let err = client
        .call::<_, i32>("Foo.Div", &Args { num1: 1, num2: 0 })
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Remote(ref msg) if msg == "divide by zero"));

    let err = client.call::<_, i32>("Foo.Sum", "one and two").await.unwrap_err();
    assert!(matches!(err, RpcError::Remote(_)));

    let reply: i32 = client
        .call("Foo.Div", &Args { num1: 9, num2: 3 })
        .await
        .unwrap();
    assert_eq!(reply, 3);
}

/// Test the JSON codec end to end.
#[tokio::test]
async fn test_json_codec() {
    let addr = start(foo_server(Server::new())).await;
    let options = Options::default().with_codec(CodecType::Json);
    let client = Client::dial(addr, options).await.unwrap();
    assert_eq!(client.codec(), CodecType::Json);

    let reply: i32 = client
        .call("Foo.Sum", &Args { num1: 20, num2: 22 })
        .await
        .unwrap();
    assert_eq!(reply, 42);
}

/// Test that a wrong magic number gets the connection closed without reply.
#[tokio::test]
async fn test_bad_magic_number() {
    let addr = start(foo_server(Server::new())).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream
        .write_all(b"{\"MagicNumber\":1234,\"CodecType\":\"application/msgpack\"}\n")
        .await
        .unwrap();

    let mut buf = Vec::new();
    let n = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);
}

/// Test close and calls after close.
#[tokio::test]
async fn test_close() {
    let addr = start(foo_server(Server::new())).await;
    let client = Client::dial(addr, Options::default()).await.unwrap();

    client.close().await.unwrap();
    assert!(!client.is_available());
    assert!(matches!(client.close().await, Err(RpcError::Shutdown)));

    let err = client
        .call::<_, i32>("Foo.Sum", &Args { num1: 1, num2: 2 })
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "connection is shut down");
}

/// Test that in-flight calls fail when the client closes.
#[tokio::test]
async fn test_close_completes_pending() {
    let addr = start(foo_server(Server::new())).await;
    let client = Client::dial(addr, Options::default()).await.unwrap();

    let mut slow = client.go_buffered::<_, u64>("Foo.Sleep", &200u64).await;
    client.close().await.unwrap();

    let call = slow.recv().await.unwrap();
    assert!(matches!(call.result, Err(RpcError::Shutdown)));
}

/// Test that the per-connection bound serializes requests.
#[tokio::test]
async fn test_concurrency_bound() {
    let server = foo_server(Server::builder().max_concurrent_requests(1).build());
    let addr = start(server).await;
    let client = Client::dial(addr, Options::default()).await.unwrap();

    let started = Instant::now();
    let mut first = client.go_buffered::<_, u64>("Foo.Sleep", &100u64).await;
    let mut second = client.go_buffered::<_, u64>("Foo.Sleep", &100u64).await;

    assert_eq!(first.recv().await.unwrap().result.unwrap(), 100);
    assert_eq!(second.recv().await.unwrap().result.unwrap(), 100);
    assert!(started.elapsed() >= Duration::from_millis(200));
}

/// Test call counters reported by the server.
#[tokio::test]
async fn test_service_stats() {
    let server = foo_server(Server::new());
    let addr = start(server.clone()).await;
    let client = Client::dial(addr, Options::default()).await.unwrap();

    for i in 0..3 {
        let _: i32 = client
            .call("Foo.Sum", &Args { num1: i, num2: i })
            .await
            .unwrap();
    }

    let stats = server.service_stats();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].name, "Foo");
    let sum = stats[0].methods.iter().find(|m| m.name == "Sum").unwrap();
    assert_eq!(sum.num_calls, 3);
    assert!(sum.arg_type.ends_with("Args"));
    assert_eq!(sum.reply_type, "i32");

    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json[0]["name"], "Foo");
}

/// Test duplicate service registration.
#[tokio::test]
async fn test_duplicate_registration() {
    let server = foo_server(Server::new());
    let again = ServiceBuilder::new("Foo", Foo)
        .method("Sum", Foo::sum)
        .build()
        .unwrap();

    let err = server.register(again).unwrap_err();
    assert!(matches!(err, RpcError::DuplicateService(ref name) if name == "Foo"));

    // The first registration is still served.
    let addr = start(server).await;
    let client = Client::dial(addr, Options::default()).await.unwrap();
    let reply: i32 = client.call("Foo.Div", &Args { num1: 8, num2: 2 }).await.unwrap();
    assert_eq!(reply, 4);
}

/// Test client and server over an in-memory stream.
#[tokio::test]
async fn test_over_duplex() {
    let server = foo_server(Server::new());
    let (client_side, server_side) = tokio::io::duplex(64 * 1024);
    let serving = tokio::spawn(async move { server.serve_conn(server_side).await });

    let client = Client::new(client_side, Options::default()).await.unwrap();
    let reply: i32 = client
        .call("Foo.Sum", &Args { num1: 5, num2: 6 })
        .await
        .unwrap();
    assert_eq!(reply, 11);

    client.close().await.unwrap();
    serving.await.unwrap().unwrap();
}
