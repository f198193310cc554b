//! Per-connection session state machine.
//!
//! ```text
//! Connecting ──open()──> Open ──(read end | write error | shutdown)──> Closing ──> Closed
//!      └──────────(subscribe failed)──────────────────────────────────────┘
//! ```
//!
//! An open session runs two tasks joined by one cancellation token:
//!
//! - **reader**: decodes client frames and routes them as the authenticated
//!   identity. Rejections become error notices for the relay to write.
//! - **relay**: the only writer. Forwards subscription deliveries and error
//!   notices to the client.
//!
//! Whichever task stops first cancels the other. The closing path then
//! releases the subscription, unregisters (compare-and-remove) and closes the
//! transport, exactly once.

use std::{fmt, sync::Arc};

use courier_proto::{Channel, Notice, SendRequest};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    auth::Identity,
    bridge::{BridgeError, Subscription},
    env::Environment,
    registry::{ConnectionHandle, ConnectionRegistry},
    router::MessageRouter,
    transport::{FrameReader, FrameWriter, TransportError},
};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Authenticated, not yet registered and subscribed
    Connecting,
    /// Registered, subscribed, tasks running
    Open,
    /// Tearing down
    Closing,
    /// Fully released
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Client sent a close frame or hung up
    ClientClosed,
    /// Reading from the client failed
    ReadFailed(TransportError),
    /// Writing to the client failed
    WriteFailed(TransportError),
    /// The subscription could not be created
    SubscribeFailed(String),
    /// The bus ended the subscription
    SubscriptionEnded,
    /// Close was requested through the connection handle
    Shutdown,
    /// A session task panicked
    TaskFailed(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientClosed => f.write_str("client closed"),
            Self::ReadFailed(e) | Self::WriteFailed(e) => write!(f, "{e}"),
            Self::SubscribeFailed(e) => write!(f, "subscribe failed: {e}"),
            Self::SubscriptionEnded => f.write_str("subscription ended"),
            Self::Shutdown => f.write_str("shutdown requested"),
            Self::TaskFailed(e) => write!(f, "session task failed: {e}"),
        }
    }
}

/// Shared services every session in a process uses.
pub struct SessionContext<E: Environment> {
    /// Time and randomness for connection ids
    pub env: E,
    /// Shared router
    pub router: Arc<MessageRouter<E>>,
    /// Live connections in this process
    pub registry: Arc<ConnectionRegistry>,
    /// Parent of every session's close signal
    pub shutdown: CancellationToken,
}

impl<E: Environment> Clone for SessionContext<E> {
    fn clone(&self) -> Self {
        Self {
            env: self.env.clone(),
            router: Arc::clone(&self.router),
            registry: Arc::clone(&self.registry),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<E: Environment> SessionContext<E> {
    /// Bundle a router with a fresh registry.
    pub fn new(env: E, router: MessageRouter<E>) -> Self {
        Self {
            env,
            router: Arc::new(router),
            registry: Arc::new(ConnectionRegistry::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Close every session: the ones in the registry and any superseded ones
    /// still draining.
    pub fn shutdown(&self) {
        let handles = self.registry.snapshot_all();
        info!(sessions = handles.len(), "closing all sessions");
        for handle in handles {
            handle.close();
        }
        self.shutdown.cancel();
    }
}

/// One authenticated client connection.
pub struct ConnectionSession<E: Environment> {
    context: SessionContext<E>,
    handle: ConnectionHandle,
    subscription: Option<Subscription>,
    state: SessionState,
}

impl<E: Environment> ConnectionSession<E> {
    /// Create a session in [`SessionState::Connecting`].
    pub fn new(identity: Identity, context: SessionContext<E>) -> Self {
        let handle = ConnectionHandle::with_shutdown(
            context.env.random_u64(),
            identity,
            context.env.now(),
            context.shutdown.child_token(),
        );
        Self { context, handle, subscription: None, state: SessionState::Connecting }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Handle for this connection. Closing it ends the session.
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Register and subscribe: `Connecting → Open`.
    ///
    /// Subscribes to `broadcast`, `user:<id>` and every group the user belongs
    /// to right now. Later membership changes do not alter the subscription.
    /// On failure the session is already released and `Closed`.
    pub async fn open(&mut self) -> Result<(), BridgeError> {
        if self.state != SessionState::Connecting {
            return Ok(());
        }

        let user_id = self.handle.user_id().clone();
        self.context.registry.register(self.handle.clone());

        let backends = self.context.router.backends();
        let groups = match backends.groups.groups_for_user(&user_id).await {
            Ok(groups) => groups,
            Err(e) => {
                warn!(%user_id, error = %e, "group snapshot failed, subscribing to base channels");
                Vec::new()
            },
        };
        let channels = Channel::for_connection(&user_id, &groups);

        match backends.bridge.subscribe(&channels).await {
            Ok(subscription) => {
                self.subscription = Some(subscription);
                self.transition(SessionState::Open);
                info!(
                    %user_id,
                    connection_id = self.handle.connection_id(),
                    channels = channels.len(),
                    "session open"
                );
                Ok(())
            },
            Err(e) => {
                self.state = SessionState::Closing;
                self.context.registry.unregister(&self.handle);
                self.transition(SessionState::Closed);
                Err(e)
            },
        }
    }

    /// Drive the session until it ends, then release everything.
    ///
    /// Opens the session first if [`ConnectionSession::open`] was not called.
    pub async fn run<R: FrameReader, W: FrameWriter>(
        mut self,
        reader: R,
        mut writer: W,
    ) -> CloseReason {
        if self.state == SessionState::Connecting
            && let Err(e) = self.open().await
        {
            warn!(user_id = %self.handle.user_id(), error = %e, "subscribe failed, closing");
            close_transport(&mut writer, &self.handle).await;
            return CloseReason::SubscribeFailed(e.to_string());
        }
        let Some(subscription) = self.subscription.take() else {
            close_transport(&mut writer, &self.handle).await;
            return CloseReason::Shutdown;
        };

        let shutdown = self.handle.shutdown_token().clone();
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();

        let mut reader_task = tokio::spawn(read_loop(
            reader,
            Arc::clone(&self.context.router),
            self.handle.identity().clone(),
            notice_tx,
            shutdown.clone(),
        ));
        let mut relay_task =
            tokio::spawn(relay_loop(writer, subscription, notice_rx, shutdown.clone()));

        let (reason, relay) = tokio::select! {
            read = &mut reader_task => {
                shutdown.cancel();
                (joined(read), relay_task.await)
            },
            relay = &mut relay_task => {
                shutdown.cancel();
                let relay_reason = relay.as_ref().map(|exit| exit.reason.clone());
                let read = reader_task.await;
                let reason = match relay_reason {
                    Ok(CloseReason::Shutdown) => joined(read),
                    Ok(reason) => reason,
                    Err(e) => CloseReason::TaskFailed(e.to_string()),
                };
                (reason, relay)
            },
        };

        self.close(relay).await;
        info!(
            user_id = %self.handle.user_id(),
            connection_id = self.handle.connection_id(),
            %reason,
            "session closed"
        );
        reason
    }

    async fn close<W: FrameWriter>(
        &mut self,
        relay: Result<RelayExit<W>, tokio::task::JoinError>,
    ) {
        if matches!(self.state, SessionState::Closing | SessionState::Closed) {
            return;
        }
        self.transition(SessionState::Closing);
        self.handle.close();

        match relay {
            Ok(RelayExit { mut writer, subscription, .. }) => {
                subscription.close();
                if !self.context.registry.unregister(&self.handle) {
                    debug!(user_id = %self.handle.user_id(), "registry entry already superseded");
                }
                close_transport(&mut writer, &self.handle).await;
            },
            Err(e) => {
                warn!(error = %e, "relay task failed, transport dropped");
                self.context.registry.unregister(&self.handle);
            },
        }

        self.transition(SessionState::Closed);
    }

    fn transition(&mut self, next: SessionState) {
        debug!(
            connection_id = self.handle.connection_id(),
            from = ?self.state,
            to = ?next,
            "session state change"
        );
        self.state = next;
    }
}

struct RelayExit<W> {
    writer: W,
    subscription: Subscription,
    reason: CloseReason,
}

fn joined(result: Result<CloseReason, tokio::task::JoinError>) -> CloseReason {
    result.unwrap_or_else(|e| CloseReason::TaskFailed(e.to_string()))
}

async fn close_transport<W: FrameWriter>(writer: &mut W, handle: &ConnectionHandle) {
    if let Err(e) = writer.close().await {
        debug!(connection_id = handle.connection_id(), error = %e, "transport close failed");
    }
}

async fn read_loop<R: FrameReader, E: Environment>(
    mut reader: R,
    router: Arc<MessageRouter<E>>,
    identity: Identity,
    notices: mpsc::UnboundedSender<String>,
    shutdown: CancellationToken,
) -> CloseReason {
    loop {
        let frame = tokio::select! {
            () = shutdown.cancelled() => return CloseReason::Shutdown,
            frame = reader.next_frame() => frame,
        };
        let frame = match frame {
            Ok(Some(frame)) => frame,
            Ok(None) => return CloseReason::ClientClosed,
            Err(e) => return CloseReason::ReadFailed(e),
        };

        let request = match SendRequest::decode(&frame.into_bytes()) {
            Ok(request) => request,
            Err(e) => {
                warn!(user_id = %identity.user_id, error = %e, "dropping malformed frame");
                notify(&notices, &Notice::error("malformed_frame", e.to_string()));
                continue;
            },
        };

        match router.route(&identity, request).await {
            Ok(message) => {
                debug!(user_id = %identity.user_id, message_id = %message.id(), "frame routed");
            },
            Err(e) => {
                warn!(user_id = %identity.user_id, code = e.code(), error = %e, "message rejected");
                notify(&notices, &Notice::error(e.code(), e.to_string()));
            },
        }
    }
}

fn notify(notices: &mpsc::UnboundedSender<String>, notice: &Notice) {
    match notice.encode() {
        Ok(frame) => {
            // Relay already gone means the session is closing anyway.
            let _ = notices.send(frame);
        },
        Err(e) => warn!(error = %e, "notice encode failed"),
    }
}

async fn relay_loop<W: FrameWriter>(
    mut writer: W,
    mut subscription: Subscription,
    mut notices: mpsc::UnboundedReceiver<String>,
    shutdown: CancellationToken,
) -> RelayExit<W> {
    let reason = loop {
        tokio::select! {
            () = shutdown.cancelled() => break CloseReason::Shutdown,
            Some(notice) = notices.recv() => {
                if let Err(e) = writer.send_text(&notice).await {
                    break CloseReason::WriteFailed(e);
                }
            },
            delivery = subscription.recv() => {
                let Some(delivery) = delivery else {
                    break CloseReason::SubscriptionEnded;
                };
                if let Err(e) = writer.send_text(&delivery.payload).await {
                    break CloseReason::WriteFailed(e);
                }
            },
        }
    };
    RelayExit { writer, subscription, reason }
}
