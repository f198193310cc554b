//! Server error types.

use std::fmt;

use crate::{bridge::BridgeError, directory::DirectoryError, storage::StorageError};

/// Errors that stop the server from starting or running.
///
/// Per-connection failures never surface here; they end one session and are
/// logged.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error (missing Redis URL, missing redb path, etc.).
    ///
    /// Fatal at startup. Fix configuration and restart.
    Config(String),

    /// Listener error (bind address in use, accept failure).
    Transport(String),

    /// Conversation log backend could not be opened.
    Storage(StorageError),

    /// Pub/sub backend could not be reached.
    Bridge(BridgeError),

    /// Directory backend could not be opened.
    Directory(DirectoryError),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Storage(err) => write!(f, "storage backend: {err}"),
            Self::Bridge(err) => write!(f, "pub/sub backend: {err}"),
            Self::Directory(err) => write!(f, "directory backend: {err}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(err) => Some(err),
            Self::Bridge(err) => Some(err),
            Self::Directory(err) => Some(err),
            Self::Config(_) | Self::Transport(_) => None,
        }
    }
}

impl From<StorageError> for ServerError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err)
    }
}

impl From<BridgeError> for ServerError {
    fn from(err: BridgeError) -> Self {
        Self::Bridge(err)
    }
}

impl From<DirectoryError> for ServerError {
    fn from(err: DirectoryError) -> Self {
        Self::Directory(err)
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
