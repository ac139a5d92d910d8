//! Pluggable codecs framing header+body pairs onto a byte stream.
//!
//! A codec is split into a read half and a write half so the receive loop can
//! keep reading while sends happen concurrently on the same connection. The
//! two halves are produced together by a [`CodecRegistry`] factory from a
//! boxed connection.
//!
//! Bodies are carried as [`serde_json::Value`], the type-erased holder both
//! ends decode into; typed argument and reply values are converted at the
//! client and registry edges. [`CodecReader::skip_body`] consumes a body
//! frame without decoding it, for messages whose payload has no destination.
//!
//! Adding a codec means implementing the two traits and registering a
//! constructor under a new [`CodecKind`]; client and server logic is
//! untouched.

pub mod frame;
pub mod json;
pub mod msgpack;


pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::protocol::error::{PlexError, Result};
use crate::protocol::header::Header;

/// Ordered byte-stream connection a codec can be layered over.
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> Connection for T {}

pub type BoxedConn = Box<dyn Connection>;
pub type BoxedReader = Box<dyn CodecReader>;
pub type BoxedWriter = Box<dyn CodecWriter>;

/// Decoding half of a codec, owned by the receive/serve loop.
#[async_trait]
pub trait CodecReader: Send {
    /// Reads and decodes the next header frame.
    async fn read_header(&mut self) -> Result<Header>;

    /// Reads and decodes the body frame following a header.
    async fn read_body(&mut self) -> Result<Value>;

    /// Reads and discards the body frame following a header.
    ///
    /// Used when the body has no destination (the matching call is already
    /// gone, or the header carries an error); the frame must still be
    /// consumed so the stream framing stays aligned.
    async fn skip_body(&mut self) -> Result<()>;
}

impl fmt::Debug for dyn CodecReader + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CodecReader")
    }
}

/// Encoding half of a codec, shared behind the write-serialization lock.
#[async_trait]
pub trait CodecWriter: Send {
    /// Encodes and writes one header+body pair, flushed as a single unit.
    ///
    /// An encode or write failure mid-message is connection-fatal: the
    /// implementation flushes whatever it buffered, shuts the connection
    /// down, and never retries a partial write.
    async fn write(&mut self, header: &Header, body: &Value) -> Result<()>;

    /// Flushes pending output and shuts the connection down.
    async fn close(&mut self) -> Result<()>;
}

impl fmt::Debug for dyn CodecWriter + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CodecWriter")
    }
}

/// Tag selecting a codec during the handshake.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CodecKind {
    /// MessagePack, the default binary codec
    #[serde(rename = "application/msgpack")]
    MsgPack,
    /// JSON, the textual codec
    #[serde(rename = "application/json")]
    Json,
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecKind::MsgPack => f.write_str("application/msgpack"),
            CodecKind::Json => f.write_str("application/json"),
        }
    }
}

/// Constructor wrapping a connection in a codec's split halves.
pub type CodecFactory = fn(BoxedConn) -> (BoxedReader, BoxedWriter);

/// Registry of codec constructors keyed by [`CodecKind`].
///
/// Built explicitly at startup and passed to the client and server
/// constructors; there is no process-global codec table.
///
/// # Example
///
/// ```
/// use plexrpc_common::codec::{CodecKind, CodecRegistry, MsgPackCodec};
///
/// let mut codecs = CodecRegistry::empty();
/// codecs.register(CodecKind::MsgPack, MsgPackCodec::open);
/// assert!(codecs.contains(CodecKind::MsgPack));
/// assert!(!codecs.contains(CodecKind::Json));
/// ```
pub struct CodecRegistry {
    factories: HashMap<CodecKind, CodecFactory>,
}

impl CodecRegistry {
    /// Creates a registry with no codecs registered.
    pub fn empty() -> Self {
        CodecRegistry {
            factories: HashMap::new(),
        }
    }

    /// Registers a codec constructor, replacing any previous one for `kind`.
    pub fn register(&mut self, kind: CodecKind, factory: CodecFactory) {
        self.factories.insert(kind, factory);
    }

    /// Whether a constructor is registered for `kind`.
    pub fn contains(&self, kind: CodecKind) -> bool {
        self.factories.contains_key(&kind)
    }

    /// Wraps `conn` in the codec registered for `kind`.
    ///
    /// On an unknown kind the connection is dropped (and thereby closed) and
    /// an [`PlexError::UnknownCodec`] is returned.
    pub fn open(&self, kind: CodecKind, conn: BoxedConn) -> Result<(BoxedReader, BoxedWriter)> {
        match self.factories.get(&kind) {
            Some(factory) => Ok(factory(conn)),
            None => Err(PlexError::UnknownCodec(kind.to_string())),
        }
    }
}

impl Default for CodecRegistry {
    /// Registry with both built-in codecs.
    fn default() -> Self {
        let mut registry = CodecRegistry::empty();
        registry.register(CodecKind::MsgPack, MsgPackCodec::open);
        registry.register(CodecKind::Json, JsonCodec::open);
        registry
    }
}
