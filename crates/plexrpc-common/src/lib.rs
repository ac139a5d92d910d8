//! Plexrpc Protocol and Codec Layer
//!
//! This crate provides the shared protocol definitions, wire framing and
//! pluggable codecs used by the plexrpc client and server:
//!
//! - **Protocol layer**: the per-message [`Header`](protocol::Header), the
//!   per-connection handshake [`Options`](protocol::Options) and the common
//!   error type.
//! - **Codec layer**: length-prefixed frame I/O, the split
//!   [`CodecReader`](codec::CodecReader)/[`CodecWriter`](codec::CodecWriter)
//!   abstraction and the concrete MessagePack and JSON codecs.
//!
//! # Wire Protocol
//!
//! Every unit on the wire is a frame: `[4-byte length as u32 big-endian] +
//! [payload]`. A connection starts with a single JSON-encoded `Options` frame
//! (the handshake, sent before any codec is negotiated). After that, each
//! logical message is a header frame followed by a body frame, both encoded
//! by the negotiated codec.

pub mod codec;
pub mod protocol;

pub use codec::{BoxedConn, BoxedReader, BoxedWriter, CodecKind, CodecReader, CodecRegistry, CodecWriter};
pub use protocol::{Header, Options, PlexError, Result, MAGIC_NUMBER};
