//! Plexrpc Client
//!
//! The client side of the framework: a call multiplexer that shares one
//! connection among many concurrently outstanding calls, correlated by trace
//! id and completed out of order.
//!
//! # Example
//!
//! ```no_run
//! use plexrpc_client::Client;
//! use plexrpc_common::CodecRegistry;
//! use serde_json::json;
//!
//! # async fn run() -> plexrpc_common::Result<()> {
//! let codecs = CodecRegistry::default();
//! let client = Client::dial("127.0.0.1:9721", None, &codecs).await?;
//!
//! let sum: i64 = client.call("Foo.Sum", json!({"num": 1, "num2": 17})).await?;
//! assert_eq!(sum, 18);
//! # Ok(())
//! # }
//! ```

pub mod call;
pub mod client;

pub use call::Call;
pub use client::Client;
