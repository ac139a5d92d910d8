//! Length-prefixed frame I/O.
//!
//! Wire format: `[4-byte length as u32 big-endian] + [payload]`. Everything
//! on a plexrpc connection, handshake included, travels in these frames.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::error::{PlexError, Result};

/// Maximum frame payload (100 MB), bounding allocation on the read side.
pub const MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// Writes one frame. The caller is responsible for flushing.
pub async fn write_frame<W>(writer: &mut W, data: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = data.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(data).await?;
    Ok(())
}

/// Reads one frame payload.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(PlexError::FrameTooLarge(len, MAX_FRAME_SIZE));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;

    Ok(buf)
}

/// Reads one frame and discards its payload, keeping the stream aligned.
pub async fn skip_frame<R>(reader: &mut R) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    read_frame(reader).await.map(drop)
}
