use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlexError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("handshake error: {0}")]
    Handshake(String),

    #[error("unknown codec type: {0}")]
    UnknownCodec(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("frame too large: {0} bytes (max {1} bytes)")]
    FrameTooLarge(usize, usize),

    #[error("connection is shut down")]
    Shutdown,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("service error: {0}")]
    Service(String),

    #[error("remote error: {0}")]
    Remote(String),
}

impl PlexError {
    /// Whether the error invalidates the connection as a whole.
    ///
    /// Errors raised while moving raw frames (socket failures, oversized
    /// frames) leave the stream in an unknown position and terminate the
    /// serve/receive loop on whichever side observes them. Decode errors do
    /// not: the frame was fully consumed, so the stream stays aligned and the
    /// failure is scoped to the one request or call it belongs to.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            PlexError::Io(_) | PlexError::FrameTooLarge(..) | PlexError::Connection(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PlexError>;
