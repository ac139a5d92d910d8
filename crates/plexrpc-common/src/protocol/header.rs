use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Per-message header, sent as its own frame immediately before the body.
///
/// Requests carry the `"Type.Method"` name of the target method; responses
/// echo it back together with the trace id, so a client can match a response
/// to the call that produced it. `error` is empty on success; a non-empty
/// value means the body is a placeholder and the text is the failure.
///
/// # Example
///
/// ```
/// use plexrpc_common::Header;
///
/// let header = Header::request("Foo.Sum", "a1b2c3");
/// assert_eq!(header.method, "Foo.Sum");
/// assert!(!header.is_error());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Header {
    /// Method name, `"Type.Method"` on requests, echoed on responses
    pub method: String,
    /// Correlates a response frame with its request frame; unique among the
    /// calls concurrently pending on one connection
    pub trace_id: String,
    /// Open extension map, carried but not currently consumed
    #[serde(default)]
    pub meta_data: HashMap<String, Value>,
    /// Empty means success; otherwise the failure carried by this message
    #[serde(default)]
    pub error: String,
}

impl Header {
    /// Creates a request header with an empty error field.
    pub fn request(method: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Header {
            method: method.into(),
            trace_id: trace_id.into(),
            meta_data: HashMap::new(),
            error: String::new(),
        }
    }

    /// Whether this header carries a failure.
    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }
}
