//! The call multiplexer: trace-id registration, the serialized send path,
//! the background receive loop and connection teardown.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use uuid::Uuid;

use plexrpc_common::codec::{BoxedConn, BoxedReader, BoxedWriter};
use plexrpc_common::protocol::{handshake, parse_options, Header, Options};
use plexrpc_common::{CodecRegistry, PlexError, Result};

use crate::call::Call;

/// Opaque correlation token: a dash-free UUIDv4.
fn trace_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// State guarded by the client's mutex: the pending-call table and the
/// one-way closing/shutdown flags.
struct ClientState {
    pending: HashMap<String, Call>,
    next_trace_id: String,
    /// User called `close`; no new calls, in-flight calls still completing
    closing: bool,
    /// Connection failure observed; every pending call was force-completed
    shutdown: bool,
}

struct Inner {
    /// Send-serialization lock: header+body writes for different calls never
    /// interleave on the wire
    writer: Mutex<BoxedWriter>,
    state: StdMutex<ClientState>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn remove_call(&self, trace_id: &str) -> Option<Call> {
        self.state().pending.remove(trace_id)
    }
}

/// A multiplexing RPC client over one connection.
///
/// Many logical calls share the connection concurrently; each is registered
/// under a unique trace id and completed individually, in whatever order
/// responses arrive. Cloning is cheap and every clone drives the same
/// connection.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

impl Client {
    /// Connects to `addr` and sets the client up over the new connection.
    ///
    /// `opts` of `None` selects the defaults; explicit options get the magic
    /// number normalized. The codec is taken from `codecs` by the options'
    /// codec type.
    pub async fn dial(addr: &str, opts: Option<Options>, codecs: &CodecRegistry) -> Result<Client> {
        let stream = TcpStream::connect(addr).await?;
        Client::new(Box::new(stream), opts, codecs).await
    }

    /// Sets a client up over an already-established connection.
    ///
    /// Writes the handshake frame, wraps the connection in the negotiated
    /// codec and spawns the background receive loop. An unknown codec type
    /// fails before anything is written.
    pub async fn new(
        mut conn: BoxedConn,
        opts: Option<Options>,
        codecs: &CodecRegistry,
    ) -> Result<Client> {
        let opts = parse_options(opts);
        if !codecs.contains(opts.codec_type) {
            return Err(PlexError::UnknownCodec(opts.codec_type.to_string()));
        }
        if let Err(e) = handshake::write_options(&mut conn, &opts).await {
            tracing::warn!("failed to send handshake: {e}");
            let _ = conn.shutdown().await;
            return Err(e);
        }
        let (reader, writer) = codecs.open(opts.codec_type, conn)?;
        Ok(Client::with_codec(reader, writer))
    }

    fn with_codec(reader: BoxedReader, writer: BoxedWriter) -> Client {
        let inner = Arc::new(Inner {
            writer: Mutex::new(writer),
            state: StdMutex::new(ClientState {
                pending: HashMap::new(),
                next_trace_id: trace_token(),
                closing: false,
                shutdown: false,
            }),
        });
        tokio::spawn(receive_loop(reader, Arc::clone(&inner)));
        Client { inner }
    }

    /// Whether the client still accepts new calls.
    pub fn is_available(&self) -> bool {
        let state = self.inner.state();
        !state.closing && !state.shutdown
    }

    /// Closes the client.
    ///
    /// In-flight calls keep completing; new calls fail with
    /// [`PlexError::Shutdown`]. Closing twice is an error.
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.inner.state();
            if state.closing {
                return Err(PlexError::Shutdown);
            }
            state.closing = true;
        }
        self.inner.writer.lock().await.close().await
    }

    /// Issues a call synchronously: registers it, waits for the single
    /// completion and returns the decoded reply or the call's error.
    pub async fn call<A, R>(&self, method: &str, args: A) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let (done, completed) = flume::bounded(1);
        self.do_call(method, serde_json::to_value(args)?, done).await;
        let call = completed
            .recv_async()
            .await
            .map_err(|_| PlexError::Shutdown)?;
        let reply = call.into_result()?;
        serde_json::from_value(reply).map_err(|e| PlexError::Decode(format!("reply: {e}")))
    }

    /// Issues a call asynchronously.
    ///
    /// Every outcome, including a failed registration, is delivered as a
    /// [`Call`] through `done`; one sink may serve many calls. Returns the
    /// assigned trace id, or `None` when the call failed before touching the
    /// wire. The pending table owns the call until it completes.
    ///
    /// # Panics
    ///
    /// Panics if `done` is unbuffered (rendezvous capacity): the receive loop
    /// must never block indefinitely trying to signal completion. The check
    /// runs before any registration.
    pub async fn do_call(
        &self,
        method: &str,
        args: Value,
        done: flume::Sender<Call>,
    ) -> Option<String> {
        if done.capacity() == Some(0) {
            panic!("do_call: done channel is unbuffered");
        }
        self.send(Call::new(method, args, done)).await
    }

    /// The send path: serialize the wire write, register the call, write
    /// header+payload.
    async fn send(&self, call: Call) -> Option<String> {
        let mut writer = self.inner.writer.lock().await;

        let method = call.method.clone();
        let args = call.args.clone();
        let trace_id = match self.register_call(call) {
            Ok(trace_id) => trace_id,
            Err(failed) => {
                failed.complete().await;
                return None;
            }
        };

        let header = Header::request(method, trace_id.clone());
        if let Err(e) = writer.write(&header, &args).await {
            // the receive loop can no longer match this call; fail it here
            if let Some(mut call) = self.inner.remove_call(&trace_id) {
                call.error = Some(e);
                call.complete().await;
            }
            return None;
        }
        Some(trace_id)
    }

    /// Registers `call` in the pending table under the client's current trace
    /// id and rolls the generator forward. Fails the call back to the caller
    /// when the client is closing or shut down.
    fn register_call(&self, mut call: Call) -> std::result::Result<String, Call> {
        let mut state = self.inner.state();
        if state.closing || state.shutdown {
            call.error = Some(PlexError::Shutdown);
            return Err(call);
        }
        let trace_id = std::mem::replace(&mut state.next_trace_id, trace_token());
        call.trace_id = trace_id.clone();
        state.pending.insert(trace_id.clone(), call);
        Ok(trace_id)
    }
}

/// Background receive path: demultiplexes response frames back to waiting
/// calls until the connection dies, then tears everything down.
async fn receive_loop(mut reader: BoxedReader, inner: Arc<Inner>) {
    let terminal = loop {
        let header = match reader.read_header().await {
            Ok(header) => header,
            Err(e) => break e,
        };
        match inner.remove_call(&header.trace_id) {
            None => {
                // call already gone, e.g. failed locally after a write error;
                // the body must still be consumed to keep framing aligned
                if let Err(e) = reader.skip_body().await {
                    break e;
                }
            }
            Some(mut call) if header.is_error() => {
                let aligned = reader.skip_body().await;
                call.error = Some(PlexError::Remote(header.error));
                call.complete().await;
                if let Err(e) = aligned {
                    break e;
                }
            }
            Some(mut call) => match reader.read_body().await {
                Ok(reply) => {
                    call.reply = Some(reply);
                    call.complete().await;
                }
                Err(e) if e.is_connection_fatal() => {
                    let terminal = PlexError::Connection(e.to_string());
                    call.error = Some(e);
                    call.complete().await;
                    break terminal;
                }
                Err(e) => {
                    // decode failure is scoped to this call; framing is intact
                    call.error = Some(e);
                    call.complete().await;
                }
            },
        }
    };
    terminate_calls(&inner, terminal).await;
}

/// Teardown, run exactly once when the receive loop exits: marks the client
/// shut down and force-completes every pending call, so no call is ever left
/// unsignaled.
async fn terminate_calls(inner: &Arc<Inner>, terminal: PlexError) {
    // send lock first, to avoid racing an in-flight send
    let _writer = inner.writer.lock().await;
    let (drained, closing) = {
        let mut state = inner.state();
        state.shutdown = true;
        let drained: Vec<Call> = state.pending.drain().map(|(_, call)| call).collect();
        (drained, state.closing)
    };
    if !drained.is_empty() {
        tracing::debug!("terminating {} pending calls: {terminal}", drained.len());
    }
    let message = terminal.to_string();
    for mut call in drained {
        call.error = Some(if closing {
            PlexError::Shutdown
        } else {
            PlexError::Connection(message.clone())
        });
        call.complete().await;
    }
}

#[cfg(test)]
mod tests {
    use super::trace_token;
    use std::collections::HashSet;

    #[test]
    fn trace_tokens_are_opaque_and_unique() {
        let tokens: HashSet<String> = (0..256).map(|_| trace_token()).collect();
        assert_eq!(tokens.len(), 256);
        for token in &tokens {
            assert_eq!(token.len(), 32);
            assert!(!token.contains('-'));
        }
    }
}
