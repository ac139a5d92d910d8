//! Connection dispatcher: accept loop, handshake, per-connection serve loop
//! and concurrent request handling.

use serde_json::Value;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use plexrpc_common::codec::{BoxedConn, BoxedReader, BoxedWriter};
use plexrpc_common::protocol::{handshake, Header, MAGIC_NUMBER};
use plexrpc_common::{CodecRegistry, Result};

use crate::service::{Service, ServiceMap};

/// The plexrpc server: a codec registry plus a service registry.
///
/// One task serves each accepted connection and one task runs each request,
/// so a slow method never blocks requests queued behind it on the same
/// connection. Response writes are serialized per connection.
///
/// The server is shared across connection tasks behind an `Arc`; see the
/// crate-level example.
pub struct Server {
    services: ServiceMap,
    codecs: CodecRegistry,
}

impl Server {
    pub fn new(codecs: CodecRegistry) -> Self {
        Server {
            services: ServiceMap::new(),
            codecs,
        }
    }

    /// Registers a service for dispatch.
    pub fn register(&self, service: Service) -> Result<()> {
        self.services.register(service)
    }

    /// Accepts connections until the listener fails.
    ///
    /// Each accepted connection is served independently and concurrently. An
    /// accept error ends the loop; the listener is presumed closed.
    pub async fn accept(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    tracing::debug!("connection established from {peer}");
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        server.serve_conn(Box::new(stream)).await;
                    });
                }
                Err(e) => {
                    tracing::warn!("accept failed, stopping: {e}");
                    return;
                }
            }
        }
    }

    /// Performs the handshake on `conn`, then serves requests over the
    /// negotiated codec.
    ///
    /// Handshake failures happen before a protocol capable of framing errors
    /// exists, so the connection is dropped without a response: a malformed
    /// options frame, a magic number mismatch, or a codec with no registered
    /// constructor all end here.
    pub async fn serve_conn(self: Arc<Self>, mut conn: BoxedConn) {
        let opts = match handshake::read_options(&mut conn).await {
            Ok(opts) => opts,
            Err(e) => {
                tracing::warn!("handshake failed: {e}");
                return;
            }
        };
        if opts.magic_number != MAGIC_NUMBER {
            tracing::warn!(
                "rejecting connection with magic number {:#x}",
                opts.magic_number
            );
            return;
        }
        let (reader, writer) = match self.codecs.open(opts.codec_type, conn) {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!("handshake failed: {e}");
                return;
            }
        };
        self.serve_codec(reader, writer).await;
    }

    /// Reads requests until the stream ends, dispatching each concurrently.
    ///
    /// A header read failure (including clean EOF) terminates the loop:
    /// framing is unrecoverable past that point. A body that arrives intact
    /// but fails to decode only fails that request; it is answered inline
    /// with the error in its header, and the loop continues. The codec is
    /// closed only after every dispatched handler has finished writing.
    pub async fn serve_codec(self: Arc<Self>, mut reader: BoxedReader, writer: BoxedWriter) {
        let writer = Arc::new(Mutex::new(writer));
        let mut handlers = JoinSet::new();

        loop {
            let header = match reader.read_header().await {
                Ok(header) => header,
                Err(e) => {
                    tracing::debug!("request stream ended: {e}");
                    break;
                }
            };
            let body = match reader.read_body().await {
                Ok(body) => body,
                Err(e) if e.is_connection_fatal() => {
                    tracing::warn!("request body read failed: {e}");
                    break;
                }
                Err(e) => {
                    tracing::debug!("undecodable request body for {}: {e}", header.trace_id);
                    let mut header = header;
                    header.error = e.to_string();
                    send_response(&writer, &header, &Value::Null).await;
                    continue;
                }
            };

            let server = Arc::clone(&self);
            let writer = Arc::clone(&writer);
            handlers.spawn(async move {
                server.handle_request(writer, header, body).await;
            });
        }

        while handlers.join_next().await.is_some() {}
        if let Err(e) = writer.lock().await.close().await {
            tracing::debug!("codec close: {e}");
        };
    }

    /// Resolves and invokes one request, then writes its response.
    ///
    /// The response header echoes the trace id; on any failure (unknown
    /// method, undecodable arguments, or the method's own error) the header
    /// carries the error text and the body is a null placeholder.
    async fn handle_request(self: Arc<Self>, writer: Arc<Mutex<BoxedWriter>>, mut header: Header, body: Value) {
        let mut reply = Value::Null;
        match self.services.find(&header.method) {
            Ok((service, method)) => {
                reply = method.new_replyv();
                if let Err(e) = service.call(&method, body, &mut reply) {
                    tracing::debug!("{} failed: {e}", header.method);
                    header.error = e.to_string();
                    reply = Value::Null;
                }
            }
            Err(e) => {
                tracing::debug!("cannot resolve {}: {e}", header.method);
                header.error = e.to_string();
            }
        }
        send_response(&writer, &header, &reply).await;
    }
}

/// Writes one response under the per-connection write lock, so concurrent
/// handlers never interleave their header/body frames.
async fn send_response(writer: &Arc<Mutex<BoxedWriter>>, header: &Header, body: &Value) {
    let mut writer = writer.lock().await;
    if let Err(e) = writer.write(header, body).await {
        tracing::warn!("failed to write response for {}: {e}", header.trace_id);
    }
}
