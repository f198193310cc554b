//! Storage error types

/// Errors from a [`super::MessageLog`] backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    /// Local disk or embedded database failure
    #[error("storage I/O error: {0}")]
    Io(String),

    /// A stored record could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The backing service could not be reached
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}
