//! Core protocol types: message header, handshake record and errors.

pub mod error;
pub mod handshake;
pub mod header;


pub use error::{PlexError, Result};
pub use handshake::{parse_options, read_options, write_options, Options, MAGIC_NUMBER};
pub use header::Header;
