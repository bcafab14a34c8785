//! Sum demo - server and client in one process.
//!
//! This example demonstrates:
//! - Registering a service with typed methods
//! - Many concurrent calls over one connection
//! - The server-side handle timeout
//! - Reading per-method call counters
//!
//! # Running
//!
//! ```text
//! RUST_LOG=wirerpc=debug cargo run --example sum
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use wirerpc::{Client, Options, Server, ServiceBuilder};

/// Arguments of `Foo.Sum`.
#[derive(Serialize, Deserialize, Debug)]
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
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let server = Server::new();
    server.register(
        ServiceBuilder::new("Foo", Foo)
            .method("Sum", Foo::sum)
            .method("Sleep", Foo::sleep)
            .build()?,
    )?;

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn({
        let server = server.clone();
        async move { server.accept(listener).await }
    });

    let options = Options::default().with_handle_timeout(Duration::from_millis(100));
    let client = Arc::new(Client::dial(addr, options).await?);

    let mut tasks = Vec::new();
    for i in 0..5 {
        let client = Arc::clone(&client);
        tasks.push(tokio::spawn(async move {
            let args = Args { num1: i, num2: i * i };
            match client.call::<_, i32>("Foo.Sum", &args).await {
                Ok(reply) => println!("{} + {} = {}", args.num1, args.num2, reply),
                Err(e) => println!("call Foo.Sum error: {}", e),
            }
        }));
    }
    for task in tasks {
        task.await?;
    }

    match client.call::<_, u64>("Foo.Sleep", &500u64).await {
        Ok(reply) => println!("slept {}ms", reply),
        Err(e) => println!("call Foo.Sleep error: {}", e),
    }

    println!("{}", serde_json::to_string_pretty(&server.service_stats())?);
    client.close().await?;
    Ok(())
}
