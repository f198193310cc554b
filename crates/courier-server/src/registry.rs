//! Connection registry: user id → the live connection that currently owns it.
//!
//! At most one entry per user. A newer connection for the same user replaces
//! the older entry without closing the older socket; the older session keeps
//! running until it ends on its own, and its eventual unregister must not
//! evict the newer entry. Guarded removal keys on the connection id for that
//! reason.
//!
//! The map is a [`DashMap`], so sessions running on different worker threads
//! register and unregister without a global lock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use courier_proto::UserId;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::auth::Identity;

/// Handle to one live connection.
///
/// Cheap to clone. Every clone refers to the same connection and the same
/// shutdown signal.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

#[derive(Debug)]
struct HandleInner {
    connection_id: u64,
    identity: Identity,
    opened_at: DateTime<Utc>,
    shutdown: CancellationToken,
}

impl ConnectionHandle {
    /// Create a handle for a freshly authenticated connection.
    pub fn new(connection_id: u64, identity: Identity, opened_at: DateTime<Utc>) -> Self {
        Self::with_shutdown(connection_id, identity, opened_at, CancellationToken::new())
    }

    /// Create a handle whose close signal is `shutdown`, typically a child of
    /// a server-wide token.
    pub fn with_shutdown(
        connection_id: u64,
        identity: Identity,
        opened_at: DateTime<Utc>,
        shutdown: CancellationToken,
    ) -> Self {
        Self { inner: Arc::new(HandleInner { connection_id, identity, opened_at, shutdown }) }
    }

    /// Process-unique id of this connection.
    pub fn connection_id(&self) -> u64 {
        self.inner.connection_id
    }

    /// Authenticated user owning this connection.
    pub fn user_id(&self) -> &UserId {
        &self.inner.identity.user_id
    }

    /// Full identity established at handshake.
    pub fn identity(&self) -> &Identity {
        &self.inner.identity
    }

    /// When the connection was accepted.
    pub fn opened_at(&self) -> DateTime<Utc> {
        self.inner.opened_at
    }

    /// Ask the owning session to close. Idempotent.
    pub fn close(&self) {
        self.inner.shutdown.cancel();
    }

    /// Whether a close has been requested.
    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown
    }
}

/// Registry of live connections, at most one per user.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<UserId, ConnectionHandle>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handle` as the user's current connection.
    ///
    /// Returns the entry it replaced, if any. The replaced connection is left
    /// open.
    pub fn register(&self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let user_id = handle.user_id().clone();
        let connection_id = handle.connection_id();
        let replaced = self.connections.insert(user_id.clone(), handle);

        if let Some(previous) = &replaced {
            tracing::info!(
                %user_id,
                connection_id,
                replaced_connection_id = previous.connection_id(),
                "connection replaced an existing entry"
            );
        }

        replaced
    }

    /// Remove the user's entry only if it still refers to `handle`.
    ///
    /// Returns `false` when a newer connection has taken over, in which case
    /// nothing is removed.
    pub fn unregister(&self, handle: &ConnectionHandle) -> bool {
        self.connections
            .remove_if(handle.user_id(), |_, current| {
                current.connection_id() == handle.connection_id()
            })
            .is_some()
    }

    /// Current connection for a user.
    pub fn lookup(&self, user_id: &UserId) -> Option<ConnectionHandle> {
        self.connections.get(user_id).map(|entry| entry.value().clone())
    }

    /// Point-in-time copy of every registered connection.
    ///
    /// Used at shutdown to close all sessions.
    pub fn snapshot_all(&self) -> Vec<ConnectionHandle> {
        self.connections.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Number of registered users.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no users are registered.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
