//! Plexrpc Server
//!
//! The server side of the framework: a connection dispatcher that accepts
//! connections, performs the codec handshake, reads framed requests and
//! dispatches each one concurrently against a registry of named services.
//!
//! # Example
//!
//! ```no_run
//! use plexrpc_common::CodecRegistry;
//! use plexrpc_server::{Server, Service};
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Serialize, Deserialize, Default)]
//! struct SumArgs {
//!     num: i64,
//!     num2: i64,
//! }
//!
//! # async fn run() -> plexrpc_common::Result<()> {
//! let service = Service::new("Foo").method("Sum", |args: SumArgs, reply: &mut i64| {
//!     *reply = args.num + args.num2;
//!     Ok(())
//! });
//!
//! let server = Arc::new(Server::new(CodecRegistry::default()));
//! server.register(service)?;
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:9721").await?;
//! server.accept(listener).await;
//! # Ok(())
//! # }
//! ```

pub mod server;
pub mod service;

pub use server::Server;
pub use service::{MethodError, MethodResult, MethodType, Service, ServiceMap};
