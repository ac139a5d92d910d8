use serde_json::Value;
use std::fmt;

use plexrpc_common::{PlexError, Result};

/// One in-flight logical RPC.
///
/// Created by the caller, owned by the client's pending table while
/// outstanding, mutated exactly once (by the receive path on a matching
/// response, or by teardown on connection failure) and then delivered through
/// its completion sink. A call is never reused.
pub struct Call {
    /// Correlation token, assigned at registration
    pub trace_id: String,
    /// `"Type.Method"` target
    pub method: String,
    /// Request payload
    pub args: Value,
    /// Decoded response payload, populated on success
    pub reply: Option<Value>,
    /// `None` on success
    pub error: Option<PlexError>,
    pub(crate) done: flume::Sender<Call>,
}

impl Call {
    pub(crate) fn new(method: impl Into<String>, args: Value, done: flume::Sender<Call>) -> Self {
        Call {
            trace_id: String::new(),
            method: method.into(),
            args,
            reply: None,
            error: None,
            done,
        }
    }

    /// Signals completion by handing the call to its sink.
    ///
    /// The receiver may be gone (the caller dropped the sink); that only
    /// means nobody is waiting for this outcome anymore.
    pub(crate) async fn complete(self) {
        let done = self.done.clone();
        if done.send_async(self).await.is_err() {
            tracing::debug!("call completion dropped, receiver is gone");
        }
    }

    /// Consumes the completed call, yielding its reply or error.
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.reply.unwrap_or(Value::Null)),
        }
    }
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("trace_id", &self.trace_id)
            .field("method", &self.method)
            .field("reply", &self.reply)
            .field("error", &self.error)
            .finish()
    }
}
