use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::codec::frame;
use crate::codec::CodecKind;
use crate::protocol::error::{PlexError, Result};

/// Protocol version sentinel carried in every handshake.
pub const MAGIC_NUMBER: u32 = 0x1991;

/// Per-connection handshake record.
///
/// Sent exactly once by the connecting side, JSON-encoded in a single frame,
/// before any codec-framed traffic begins. JSON is used because the codec is
/// precisely what is being negotiated, so neither side can frame with it yet.
/// The accepting side rejects the connection if the magic number does not
/// match [`MAGIC_NUMBER`] or the codec type has no registered factory.
///
/// # Example
///
/// ```
/// use plexrpc_common::{CodecKind, Options};
///
/// let opts = Options::default();
/// assert_eq!(opts.codec_type, CodecKind::MsgPack);
///
/// let opts = Options::with_codec(CodecKind::Json);
/// assert_eq!(opts.codec_type, CodecKind::Json);
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Options {
    pub magic_number: u32,
    pub codec_type: CodecKind,
}

impl Options {
    /// Handshake options selecting the given codec.
    pub fn with_codec(codec_type: CodecKind) -> Self {
        Options {
            magic_number: MAGIC_NUMBER,
            codec_type,
        }
    }
}

impl Default for Options {
    fn default() -> Self {
        Options::with_codec(CodecKind::MsgPack)
    }
}

/// Normalizes client-supplied options.
///
/// `None` yields the defaults; explicit options always get the magic number
/// forced to the protocol constant so a caller cannot accidentally dial with
/// a stale or mistyped sentinel.
pub fn parse_options(opts: Option<Options>) -> Options {
    match opts {
        None => Options::default(),
        Some(mut opts) => {
            opts.magic_number = MAGIC_NUMBER;
            opts
        }
    }
}

/// Writes the handshake frame and flushes it.
pub async fn write_options<W>(conn: &mut W, opts: &Options) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = serde_json::to_vec(opts)
        .map_err(|e| PlexError::Handshake(format!("encoding options: {e}")))?;
    frame::write_frame(conn, &bytes).await?;
    conn.flush().await?;
    Ok(())
}

/// Reads and decodes the handshake frame.
///
/// A malformed frame (including an unrecognized codec tag) is a handshake
/// error; the caller is expected to drop the connection without answering.
pub async fn read_options<R>(conn: &mut R) -> Result<Options>
where
    R: AsyncRead + Unpin,
{
    let bytes = frame::read_frame(conn).await?;
    serde_json::from_slice(&bytes)
        .map_err(|e| PlexError::Handshake(format!("malformed options: {e}")))
}
