//! Protocol error types.
//!
//! Decode failures are always connection-local and non-fatal: the session
//! logs them, tells the client, and keeps reading.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while decoding or encoding wire data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Inbound frame is not valid JSON, not UTF-8, or has the wrong shape.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Inbound frame exceeds [`crate::MAX_FRAME_BYTES`].
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Size of the rejected frame
        size: usize,
        /// Configured maximum
        max: usize,
    },

    /// `type` field named a kind that does not exist.
    #[error("unknown message kind: {0:?}")]
    UnknownKind(String),

    /// Channel string did not match `broadcast`, `user:<id>` or `group:<id>`.
    #[error("invalid channel name: {0:?}")]
    InvalidChannel(String),

    /// Outbound value could not be serialized.
    #[error("encode failed: {0}")]
    Encode(String),
}
