//! Courier chat relay server.
//!
//! Accepts authenticated WebSocket connections, routes each inbound message
//! through validate → persist → publish, and relays whatever the pub/sub bus
//! delivers back to connected clients. Several relay processes can share one
//! Redis instance; a message routed by one is delivered by all.
//!
//! # Components
//!
//! - [`ConnectionRegistry`]: user id → live connection, at most one per user
//! - [`storage`]: per-conversation history ([`MessageLog`] and backends)
//! - [`bridge`]: channel fan-out ([`PubSub`] and backends)
//! - [`directory`]: user and group lookups
//! - [`MessageRouter`]: validation, persistence and publication
//! - [`ConnectionSession`]: per-connection reader/relay task pair
//! - [`Server`]: TCP accept loop and WebSocket handshake
//! - [`SystemEnv`]: production environment (real time, crypto RNG)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod bridge;
mod config;
pub mod directory;
mod env;
mod error;
mod registry;
mod router;
mod session;
pub mod storage;
mod system_env;
pub mod transport;

use std::{net::SocketAddr, sync::Arc, time::Duration};

pub use auth::{Authenticator, Claims, Identity, JwtAuthenticator};
pub use bridge::{Delivery, LocalBus, PubSub, RedisBus, Subscription};
pub use config::{BusBackend, DEV_JWT_SECRET, DirectoryBackend, ServerConfig, StorageBackend};
pub use directory::{GroupDirectory, MemoryDirectory, RedisDirectory, UserDirectory};
pub use env::Environment;
pub use error::ServerError;
pub use registry::{ConnectionHandle, ConnectionRegistry};
pub use router::{Backends, HistoryQuery, MessageRouter, RouteError, RouterConfig};
pub use session::{CloseReason, ConnectionSession, SessionContext, SessionState};
pub use storage::{ChaoticLog, MemoryLog, MessageLog, RedbLog, RedisLog};
pub use system_env::SystemEnv;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
pub use transport::{FrameReader, FrameWriter, TransportError, WireFrame};

/// Pause after a failed accept, so a persistent error such as `EMFILE` does
/// not spin the accept loop.
const ACCEPT_ERROR_PAUSE: Duration = Duration::from_millis(100);

/// Open the backends named by `config`.
pub async fn open_backends(config: &ServerConfig) -> Result<Backends, ServerError> {
    let log: Arc<dyn MessageLog> = match config.storage {
        StorageBackend::Memory => Arc::new(MemoryLog::new()),
        StorageBackend::Redb => {
            let path = config
                .redb_path
                .as_ref()
                .ok_or_else(|| ServerError::Config("redb path is not set".to_string()))?;
            Arc::new(RedbLog::open(path)?)
        },
        StorageBackend::Redis => Arc::new(RedisLog::connect(config.redis_url()?).await?),
    };

    let bridge: Arc<dyn PubSub> = match config.bus {
        BusBackend::Local => Arc::new(LocalBus::new()),
        BusBackend::Redis => Arc::new(RedisBus::connect(config.redis_url()?).await?),
    };

    let (users, groups): (Arc<dyn UserDirectory>, Arc<dyn GroupDirectory>) = match config.directory
    {
        DirectoryBackend::Seed => {
            let directory = match &config.directory_seed {
                Some(path) => MemoryDirectory::load_seed_file(path)?,
                None => MemoryDirectory::new(),
            };
            let directory = Arc::new(directory);
            (directory.clone(), directory)
        },
        DirectoryBackend::Redis => {
            let directory = Arc::new(RedisDirectory::connect(config.redis_url()?).await?);
            (directory.clone(), directory)
        },
    };

    Ok(Backends { log, bridge, users, groups })
}

/// Stops a running [`Server`].
#[derive(Clone)]
pub struct ShutdownHandle {
    context: SessionContext<SystemEnv>,
}

impl ShutdownHandle {
    /// Stop accepting and close every session.
    pub fn shutdown(&self) {
        self.context.shutdown();
    }
}

/// Production Courier server.
pub struct Server {
    listener: TcpListener,
    context: SessionContext<SystemEnv>,
    authenticator: Arc<dyn Authenticator>,
    sessions: TaskTracker,
}

impl Server {
    /// Validate `config`, open its backends and bind the listener.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let env = SystemEnv::new();
        let backends = open_backends(&config).await?;
        let router = MessageRouter::new(env, backends, config.router.clone());
        let authenticator = Arc::new(JwtAuthenticator::new(config.jwt_secret.as_bytes()));

        Self::with_context(&config.bind_address, SessionContext::new(env, router), authenticator)
            .await
    }

    /// Bind a listener around an already assembled context.
    pub async fn with_context(
        bind_address: &str,
        context: SessionContext<SystemEnv>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(bind_address)
            .await
            .map_err(|e| ServerError::Transport(format!("bind {bind_address}: {e}")))?;

        Ok(Self { listener, context, authenticator, sessions: TaskTracker::new() })
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Shared session services (registry, router).
    pub fn context(&self) -> &SessionContext<SystemEnv> {
        &self.context
    }

    /// Handle that stops this server once it is running.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle { context: self.context.clone() }
    }

    /// Accept connections until shut down.
    ///
    /// Returns once every session started here has run its closing path.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!(addr = %self.local_addr()?, "server accepting connections");

        loop {
            let accepted = tokio::select! {
                () = self.context.shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    let context = self.context.clone();
                    let authenticator = Arc::clone(&self.authenticator);
                    self.sessions.spawn(handle_connection(stream, peer, context, authenticator));
                },
                Err(e) => {
                    tracing::error!(error = %e, "accept error");
                    if !pause_after_accept_error(&self.context.shutdown).await {
                        break;
                    }
                },
            }
        }

        self.sessions.close();
        tracing::info!(sessions = self.sessions.len(), "server stopped accepting connections");
        self.sessions.wait().await;
        tracing::info!("all sessions closed");
        Ok(())
    }
}

/// Sleep for [`ACCEPT_ERROR_PAUSE`]. Returns `false` if shutdown began first.
async fn pause_after_accept_error(shutdown: &CancellationToken) -> bool {
    tokio::select! {
        () = shutdown.cancelled() => false,
        () = tokio::time::sleep(ACCEPT_ERROR_PAUSE) => true,
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    context: SessionContext<SystemEnv>,
    authenticator: Arc<dyn Authenticator>,
) {
    let handshake = tokio::select! {
        () = context.shutdown.cancelled() => return,
        accepted = transport::accept(stream, authenticator.as_ref()) => accepted,
    };
    let (identity, reader, writer) = match handshake {
        Ok(accepted) => accepted,
        Err(TransportError::Unauthorized(e)) => {
            tracing::warn!(%peer, error = %e, "rejected unauthenticated connection");
            return;
        },
        Err(e) => {
            tracing::error!(%peer, error = %e, "handshake failed");
            return;
        },
    };

    tracing::debug!(%peer, user_id = %identity.user_id, "handshake complete");
    ConnectionSession::new(identity, context).run(reader, writer).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn accept_errors_pause_the_loop() {
        let shutdown = CancellationToken::new();
        let start = tokio::time::Instant::now();

        assert!(pause_after_accept_error(&shutdown).await);
        assert!(start.elapsed() >= ACCEPT_ERROR_PAUSE);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cuts_the_pause_short() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let start = tokio::time::Instant::now();

        assert!(!pause_after_accept_error(&shutdown).await);
        assert!(start.elapsed() < ACCEPT_ERROR_PAUSE);
    }
}
