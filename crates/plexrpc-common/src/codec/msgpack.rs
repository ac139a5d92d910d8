//! MessagePack codec, the default binary encoding.

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncWriteExt, BufWriter, ReadHalf, WriteHalf};

use crate::codec::frame;
use crate::codec::{BoxedConn, BoxedReader, BoxedWriter, CodecReader, CodecWriter};
use crate::protocol::error::{PlexError, Result};
use crate::protocol::header::Header;

/// Generic binary object codec backed by `rmp-serde`.
///
/// MessagePack is self-describing, so arbitrary [`Value`] bodies round-trip
/// without schema knowledge on either side.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Splits `conn` into a MessagePack reader/writer pair.
    ///
    /// The writer buffers header and body so each [`CodecWriter::write`]
    /// flushes the pair as one unit; the reader decodes straight off the
    /// connection.
    pub fn open(conn: BoxedConn) -> (BoxedReader, BoxedWriter) {
        let (read_half, write_half) = tokio::io::split(conn);
        (
            Box::new(MsgPackReader { conn: read_half }),
            Box::new(MsgPackWriter {
                buf: BufWriter::new(write_half),
            }),
        )
    }
}

struct MsgPackReader {
    conn: ReadHalf<BoxedConn>,
}

#[async_trait]
impl CodecReader for MsgPackReader {
    async fn read_header(&mut self) -> Result<Header> {
        let bytes = frame::read_frame(&mut self.conn).await?;
        rmp_serde::from_slice(&bytes).map_err(|e| PlexError::Decode(format!("header: {e}")))
    }

    async fn read_body(&mut self) -> Result<Value> {
        let bytes = frame::read_frame(&mut self.conn).await?;
        rmp_serde::from_slice(&bytes).map_err(|e| PlexError::Decode(format!("body: {e}")))
    }

    async fn skip_body(&mut self) -> Result<()> {
        frame::skip_frame(&mut self.conn).await
    }
}

struct MsgPackWriter {
    buf: BufWriter<WriteHalf<BoxedConn>>,
}

impl MsgPackWriter {
    async fn write_frames(&mut self, header: &Header, body: &Value) -> Result<()> {
        let header_bytes =
            rmp_serde::to_vec(header).map_err(|e| PlexError::Encode(format!("header: {e}")))?;
        let body_bytes =
            rmp_serde::to_vec(body).map_err(|e| PlexError::Encode(format!("body: {e}")))?;
        frame::write_frame(&mut self.buf, &header_bytes).await?;
        frame::write_frame(&mut self.buf, &body_bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl CodecWriter for MsgPackWriter {
    async fn write(&mut self, header: &Header, body: &Value) -> Result<()> {
        if let Err(err) = self.write_frames(header, body).await {
            tracing::warn!("write failed, dropping connection: {err}");
            // A partial message is unrecoverable for the peer: push out what
            // was buffered and drop the link.
            let _ = self.buf.flush().await;
            let _ = self.buf.shutdown().await;
            return Err(err);
        }
        self.buf.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.buf.flush().await?;
        self.buf.shutdown().await?;
        Ok(())
    }
}
