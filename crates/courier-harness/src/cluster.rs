//! Several relay nodes sharing one log, one bus and one directory.
//!
//! Each [`Node`] has its own router and connection registry, exactly like a
//! separate relay process. Messages routed on one node reach subscribers on
//! every other node through the shared bus, which is what the Redis
//! deployment does across machines.

use std::{sync::Arc, time::Duration};

use courier_proto::{GroupId, UserId};
use courier_server::{
    Backends, CloseReason, ConnectionHandle, ConnectionRegistry, ConnectionSession, Identity,
    LocalBus, MemoryDirectory, MemoryLog, MessageLog, MessageRouter, PubSub, RouterConfig,
    SessionContext,
    bridge::BridgeError,
    directory::{DirectorySeed, GroupRecord, UserProfile},
};
use tokio::task::JoinHandle;

use crate::{ClientEnd, SimEnv, channel_transport};

/// Shared infrastructure for a set of nodes.
pub struct Cluster {
    env: SimEnv,
    log: Arc<dyn MessageLog>,
    bus: Arc<dyn PubSub>,
    directory: MemoryDirectory,
}

impl Cluster {
    /// In-memory log and bus, empty directory.
    pub fn new(seed: u64) -> Self {
        Self::with_backends(seed, Arc::new(MemoryLog::new()), Arc::new(LocalBus::new()))
    }

    /// Custom log and bus, empty directory.
    pub fn with_backends(seed: u64, log: Arc<dyn MessageLog>, bus: Arc<dyn PubSub>) -> Self {
        Self { env: SimEnv::with_seed(seed), log, bus, directory: MemoryDirectory::new() }
    }

    /// Replace the directory.
    #[must_use]
    pub fn with_directory(mut self, directory: MemoryDirectory) -> Self {
        self.directory = directory;
        self
    }

    /// Shared environment.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Shared log.
    pub fn log(&self) -> &Arc<dyn MessageLog> {
        &self.log
    }

    /// Shared directory, mutable while nodes run.
    pub fn directory(&self) -> &MemoryDirectory {
        &self.directory
    }

    /// Start a node with the default router configuration.
    pub fn node(&self) -> Node {
        self.node_with_config(RouterConfig::default())
    }

    /// Start a node with a custom router configuration.
    pub fn node_with_config(&self, config: RouterConfig) -> Node {
        let directory = Arc::new(self.directory.clone());
        let backends = Backends {
            log: Arc::clone(&self.log),
            bridge: Arc::clone(&self.bus),
            users: directory.clone(),
            groups: directory,
        };
        let router = MessageRouter::new(self.env.clone(), backends, config);
        Node { context: SessionContext::new(self.env.clone(), router) }
    }
}

/// One simulated relay process.
#[derive(Clone)]
pub struct Node {
    context: SessionContext<SimEnv>,
}

impl Node {
    /// Open a session for `identity` over an in-memory transport.
    ///
    /// Returns once the session is registered and subscribed, so anything
    /// published afterwards reaches it.
    pub async fn connect(&self, identity: Identity) -> Result<Connection, BridgeError> {
        let (client, reader, writer) = channel_transport();
        let mut session = ConnectionSession::new(identity, self.context.clone());
        session.open().await?;

        let handle = session.handle().clone();
        let task = tokio::spawn(session.run(reader, writer));
        Ok(Connection { client, handle, task })
    }

    /// Router shared by this node's sessions.
    pub fn router(&self) -> &MessageRouter<SimEnv> {
        &self.context.router
    }

    /// This node's live connections.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.context.registry
    }

    /// Session services, for driving sessions by hand.
    pub fn context(&self) -> &SessionContext<SimEnv> {
        &self.context
    }

    /// Close every session on this node.
    pub fn shutdown(&self) {
        self.context.shutdown();
    }
}

/// A running session and the test's end of its transport.
pub struct Connection {
    /// Test-side transport end
    pub client: ClientEnd,
    /// Registry handle of the session
    pub handle: ConnectionHandle,
    /// Session task, resolving to why it closed
    pub task: JoinHandle<CloseReason>,
}

impl Connection {
    /// Wait for the session to end. `None` on timeout or task panic.
    pub async fn closed(self, wait: Duration) -> Option<CloseReason> {
        tokio::time::timeout(wait, self.task).await.ok()?.ok()
    }
}

/// Three users and one two-member group.
///
/// `u1` (alice) and `u2` (bob) are members of `g1` (team); `u3` (carol) is
/// not.
#[allow(clippy::expect_used)]
pub fn sample_directory() -> MemoryDirectory {
    let seed = DirectorySeed {
        users: vec![
            UserProfile::new("u1", "alice"),
            UserProfile::new("u2", "bob"),
            UserProfile::new("u3", "carol"),
        ],
        groups: vec![GroupRecord::new(
            GroupId::new("g1"),
            "team",
            vec![UserId::new("u1"), UserId::new("u2")],
        )],
    };
    MemoryDirectory::from_seed(seed).expect("sample ids are key safe")
}

/// Identity for one of the [`sample_directory`] users.
pub fn identity(user_id: &str, username: &str) -> Identity {
    Identity::new(user_id, username)
}
