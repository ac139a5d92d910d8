//! JSON codec, the textual alternative to MessagePack.

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncWriteExt, BufWriter, ReadHalf, WriteHalf};

use crate::codec::frame;
use crate::codec::{BoxedConn, BoxedReader, BoxedWriter, CodecReader, CodecWriter};
use crate::protocol::error::{PlexError, Result};
use crate::protocol::header::Header;

pub struct JsonCodec;

impl JsonCodec {
    /// Splits `conn` into a JSON reader/writer pair.
    pub fn open(conn: BoxedConn) -> (BoxedReader, BoxedWriter) {
        let (read_half, write_half) = tokio::io::split(conn);
        (
            Box::new(JsonReader { conn: read_half }),
            Box::new(JsonWriter {
                buf: BufWriter::new(write_half),
            }),
        )
    }
}

struct JsonReader {
    conn: ReadHalf<BoxedConn>,
}

#[async_trait]
impl CodecReader for JsonReader {
    async fn read_header(&mut self) -> Result<Header> {
        let bytes = frame::read_frame(&mut self.conn).await?;
        serde_json::from_slice(&bytes).map_err(|e| PlexError::Decode(format!("header: {e}")))
    }

    async fn read_body(&mut self) -> Result<Value> {
        let bytes = frame::read_frame(&mut self.conn).await?;
        serde_json::from_slice(&bytes).map_err(|e| PlexError::Decode(format!("body: {e}")))
    }

    async fn skip_body(&mut self) -> Result<()> {
        frame::skip_frame(&mut self.conn).await
    }
}

struct JsonWriter {
    buf: BufWriter<WriteHalf<BoxedConn>>,
}

impl JsonWriter {
    async fn write_frames(&mut self, header: &Header, body: &Value) -> Result<()> {
        let header_bytes =
            serde_json::to_vec(header).map_err(|e| PlexError::Encode(format!("header: {e}")))?;
        let body_bytes =
            serde_json::to_vec(body).map_err(|e| PlexError::Encode(format!("body: {e}")))?;
        frame::write_frame(&mut self.buf, &header_bytes).await?;
        frame::write_frame(&mut self.buf, &body_bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl CodecWriter for JsonWriter {
    async fn write(&mut self, header: &Header, body: &Value) -> Result<()> {
        if let Err(err) = self.write_frames(header, body).await {
            tracing::warn!("write failed, dropping connection: {err}");
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
