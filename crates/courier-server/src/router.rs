//! Message routing: validate, persist, then publish.
//!
//! One call to [`MessageRouter::route`] turns an untrusted [`SendRequest`]
//! into a canonical [`Message`]:
//!
//! 1. Validate kind, recipient and (for groups) live membership
//! 2. Stamp a fresh id, the authenticated sender and the current time
//! 3. Append to every derived conversation log
//! 4. Publish the encoded message to its channel
//!
//! Persistence happens-before publish. A failed append stops the call before
//! anything is published; a failed publish is logged and the message stays in
//! history for the recipient to read later.

use std::sync::Arc;

use courier_proto::{
    Channel, ConversationKey, GroupId, Message, MessageKind, SendRequest, Target, UserId,
};
use tracing::{debug, warn};

use crate::{
    auth::Identity,
    bridge::PubSub,
    directory::{DirectoryError, GroupDirectory, UserDirectory},
    env::Environment,
    storage::{MessageLog, StorageError},
};

/// Errors returned to the sending connection.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RouteError {
    /// `type` is not one of `private`, `group`, `broadcast`
    #[error("invalid message type: {0:?}")]
    InvalidMessageKind(String),

    /// The kind needs a recipient the request did not carry
    #[error("{0} message requires a recipient")]
    MissingRecipient(MessageKind),

    /// No such user
    #[error("recipient not found: {0}")]
    RecipientNotFound(String),

    /// No such group
    #[error("group not found: {0}")]
    GroupNotFound(GroupId),

    /// Sender is not a current member of the group
    #[error("user {user} is not a member of group {group}")]
    NotAGroupMember {
        /// Target group
        group: GroupId,
        /// Rejected sender
        user: UserId,
    },

    /// The conversation log rejected the write (or read)
    #[error("persistence failed: {0}")]
    PersistenceFailed(#[source] StorageError),

    /// A directory lookup could not be completed
    #[error("directory lookup failed: {0}")]
    LookupFailed(#[source] DirectoryError),
}

impl RouteError {
    /// Stable snake_case code sent to clients in error notices.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidMessageKind(_) => "invalid_message_type",
            Self::MissingRecipient(_) => "missing_recipient",
            Self::RecipientNotFound(_) => "recipient_not_found",
            Self::GroupNotFound(_) => "group_not_found",
            Self::NotAGroupMember { .. } => "not_a_group_member",
            Self::PersistenceFailed(_) => "persistence_failed",
            Self::LookupFailed(_) => "lookup_failed",
        }
    }
}

/// Which conversation a history read targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryQuery {
    /// The requester's private conversation with `peer`
    Private {
        /// Other participant
        peer: UserId,
    },
    /// A group the requester belongs to
    Group(GroupId),
    /// The broadcast log
    Broadcast,
}

/// Router tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterConfig {
    /// Also publish private messages to the sender's own channel, so the
    /// sender's connection receives exactly one copy.
    pub echo_private_to_sender: bool,
    /// Upper bound applied to every history read.
    pub max_history_limit: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self { echo_private_to_sender: true, max_history_limit: 50 }
    }
}

/// Backends a router (and the sessions around it) depend on.
#[derive(Clone)]
pub struct Backends {
    /// Conversation history
    pub log: Arc<dyn MessageLog>,
    /// Fan-out bus
    pub bridge: Arc<dyn PubSub>,
    /// Recipient resolution
    pub users: Arc<dyn UserDirectory>,
    /// Group existence and membership
    pub groups: Arc<dyn GroupDirectory>,
}

/// Validates, persists and publishes messages.
///
/// Holds no per-connection state; one router is shared by every session in
/// the process.
pub struct MessageRouter<E: Environment> {
    env: E,
    backends: Backends,
    config: RouterConfig,
}

impl<E: Environment> MessageRouter<E> {
    /// Create a router.
    pub fn new(env: E, backends: Backends, config: RouterConfig) -> Self {
        Self { env, backends, config }
    }

    /// Active configuration.
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Backends this router writes to.
    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    /// Route one request on behalf of `sender`.
    ///
    /// Returns the canonical message once it is durably stored. Publish
    /// failures do not fail the call.
    pub async fn route(
        &self,
        sender: &Identity,
        request: SendRequest,
    ) -> Result<Message, RouteError> {
        let target = self.resolve_target(sender, &request).await?;

        let message = Message::new(
            self.env.message_id(),
            target,
            request.content,
            sender.user_id.clone(),
            sender.display_name.clone(),
            self.env.now(),
        );

        self.backends
            .log
            .append(&message.conversation_keys(), &message)
            .await
            .map_err(RouteError::PersistenceFailed)?;

        debug!(
            message_id = %message.id(),
            user_id = %sender.user_id,
            kind = %message.kind(),
            "message persisted"
        );

        self.publish(&message).await;
        Ok(message)
    }

    /// Newest `limit` messages of a conversation visible to `requester`,
    /// oldest first. `limit` is clamped to
    /// [`RouterConfig::max_history_limit`].
    pub async fn history(
        &self,
        requester: &UserId,
        query: HistoryQuery,
        limit: usize,
    ) -> Result<Vec<Message>, RouteError> {
        let limit = limit.min(self.config.max_history_limit);

        let key = match query {
            HistoryQuery::Private { peer } => {
                if !peer.is_key_safe() {
                    return Err(RouteError::RecipientNotFound(peer.into_inner()));
                }
                ConversationKey::Private { owner: requester.clone(), peer }
            },
            HistoryQuery::Group(group) => {
                self.require_member(&group, requester).await?;
                ConversationKey::Group(group)
            },
            HistoryQuery::Broadcast => ConversationKey::Broadcast,
        };

        self.backends.log.range(&key, limit).await.map_err(RouteError::PersistenceFailed)
    }

    async fn resolve_target(
        &self,
        sender: &Identity,
        request: &SendRequest,
    ) -> Result<Target, RouteError> {
        let kind = request
            .message_kind()
            .map_err(|_| RouteError::InvalidMessageKind(request.kind.clone()))?;

        match kind {
            MessageKind::Private => {
                let to = request.recipient_user().ok_or(RouteError::MissingRecipient(kind))?;
                let recipient = self
                    .backends
                    .users
                    .resolve(to)
                    .await
                    .map_err(RouteError::LookupFailed)?
                    .ok_or_else(|| RouteError::RecipientNotFound(to.to_string()))?;
                Ok(Target::Private { to_id: recipient.id })
            },
            MessageKind::Group => {
                let group = request.recipient_group().ok_or(RouteError::MissingRecipient(kind))?;
                self.require_member(group, &sender.user_id).await?;
                Ok(Target::Group { group_id: group.clone() })
            },
            MessageKind::Broadcast => Ok(Target::Broadcast),
        }
    }

    async fn require_member(&self, group: &GroupId, user: &UserId) -> Result<(), RouteError> {
        if !group.is_key_safe() {
            return Err(RouteError::GroupNotFound(group.clone()));
        }
        let members = self
            .backends
            .groups
            .members_of(group)
            .await
            .map_err(RouteError::LookupFailed)?
            .ok_or_else(|| RouteError::GroupNotFound(group.clone()))?;

        if !members.contains(user) {
            return Err(RouteError::NotAGroupMember { group: group.clone(), user: user.clone() });
        }
        Ok(())
    }

    async fn publish(&self, message: &Message) {
        let payload: Arc<str> = match message.encode() {
            Ok(payload) => payload.into(),
            Err(e) => {
                warn!(message_id = %message.id(), error = %e, "encode failed, not published");
                return;
            },
        };

        let mut channels = vec![message.channel()];
        if self.config.echo_private_to_sender
            && let Some(to) = message.to_id()
            && to != message.from_id()
        {
            channels.push(Channel::User(message.from_id().clone()));
        }

        for channel in channels {
            match self.backends.bridge.publish(&channel, Arc::clone(&payload)).await {
                Ok(receivers) => {
                    debug!(message_id = %message.id(), %channel, receivers, "message published");
                },
                Err(e) => {
                    warn!(
                        message_id = %message.id(),
                        %channel,
                        error = %e,
                        "publish failed, message remains in history"
                    );
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        SystemEnv,
        bridge::LocalBus,
        directory::{DirectorySeed, GroupRecord, MemoryDirectory, UserProfile},
        storage::MemoryLog,
    };

    struct Fixture {
        router: MessageRouter<SystemEnv>,
        log: MemoryLog,
        bus: LocalBus,
    }

    fn fixture(config: RouterConfig) -> Fixture {
        let log = MemoryLog::new();
        let bus = LocalBus::new();
        let directory = Arc::new(MemoryDirectory::from_seed(DirectorySeed {
            users: vec![
                UserProfile::new("u1", "alice"),
                UserProfile::new("u2", "bob"),
                UserProfile::new("u3", "carol"),
            ],
            groups: vec![GroupRecord::new("g1", "team", [UserId::new("u1"), UserId::new("u2")])],
        })
        .unwrap());
        let backends = Backends {
            log: Arc::new(log.clone()),
            bridge: Arc::new(bus.clone()),
            users: directory.clone(),
            groups: directory,
        };
        Fixture { router: MessageRouter::new(SystemEnv::new(), backends, config), log, bus }
    }

    fn alice() -> Identity {
        Identity::new("u1", "alice")
    }

    #[tokio::test]
    async fn private_message_is_persisted_for_both_sides() {
        let f = fixture(RouterConfig::default());

        let message = f.router.route(&alice(), SendRequest::private("u2", "hi")).await.unwrap();

        assert_eq!(message.kind(), MessageKind::Private);
        assert_eq!(message.from_user(), "alice");
        assert_eq!(message.to_id(), Some(&UserId::new("u2")));
        for key in message.conversation_keys() {
            assert_eq!(f.log.range(&key, 10).await.unwrap(), vec![message.clone()]);
        }
    }

    #[tokio::test]
    async fn recipient_resolves_by_username() {
        let f = fixture(RouterConfig::default());

        let message = f.router.route(&alice(), SendRequest::private("bob", "hi")).await.unwrap();

        assert_eq!(message.to_id(), Some(&UserId::new("u2")));
    }

    #[tokio::test]
    async fn private_publishes_to_recipient_and_echoes_to_sender() {
        let f = fixture(RouterConfig::default());
        let mut to_bob = f.bus.subscribe(&[Channel::User(UserId::new("u2"))]).await.unwrap();
        let mut to_alice = f.bus.subscribe(&[Channel::User(UserId::new("u1"))]).await.unwrap();

        let message = f.router.route(&alice(), SendRequest::private("u2", "hi")).await.unwrap();

        let encoded = message.encode().unwrap();
        assert_eq!(&*to_bob.recv().await.unwrap().payload, encoded);
        assert_eq!(&*to_alice.recv().await.unwrap().payload, encoded);
    }

    #[tokio::test]
    async fn echo_can_be_disabled() {
        let f = fixture(RouterConfig { echo_private_to_sender: false, ..RouterConfig::default() });
        let mut to_alice = f.bus.subscribe(&[Channel::User(UserId::new("u1"))]).await.unwrap();

        f.router.route(&alice(), SendRequest::private("u2", "hi")).await.unwrap();

        assert!(tokio::time::timeout(std::time::Duration::from_millis(20), to_alice.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn message_to_self_is_published_once() {
        let f = fixture(RouterConfig::default());
        let mut to_alice = f.bus.subscribe(&[Channel::User(UserId::new("u1"))]).await.unwrap();

        let message = f.router.route(&alice(), SendRequest::private("u1", "note")).await.unwrap();

        assert_eq!(message.conversation_keys().len(), 1);
        assert!(to_alice.recv().await.is_some());
        assert!(tokio::time::timeout(std::time::Duration::from_millis(20), to_alice.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn validation_order() {
        let f = fixture(RouterConfig::default());
        let cases = [
            (
                SendRequest { kind: "shout".into(), ..SendRequest::default() },
                "invalid_message_type",
            ),
            (SendRequest { kind: "private".into(), ..SendRequest::default() }, "missing_recipient"),
            (SendRequest::private("nobody", "x"), "recipient_not_found"),
            (SendRequest { kind: "group".into(), ..SendRequest::default() }, "missing_recipient"),
            (SendRequest::group("g9", "x"), "group_not_found"),
        ];

        for (request, code) in cases {
            let err = f.router.route(&alice(), request).await.unwrap_err();
            assert_eq!(err.code(), code);
        }
        assert_eq!(f.log.total_entries(), 0);
    }

    #[tokio::test]
    async fn non_member_group_send_is_rejected_without_side_effects() {
        let f = fixture(RouterConfig::default());
        let g1 = Channel::Group(GroupId::new("g1"));
        let mut listener = f.bus.subscribe(&[g1]).await.unwrap();

        let err = f
            .router
            .route(&Identity::new("u3", "carol"), SendRequest::group("g1", "let me in"))
            .await
            .unwrap_err();

        assert!(matches!(err, RouteError::NotAGroupMember { .. }));
        assert_eq!(f.log.total_entries(), 0);
        assert!(tokio::time::timeout(std::time::Duration::from_millis(20), listener.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn history_clamps_limit_and_checks_membership() {
        let f = fixture(RouterConfig { max_history_limit: 3, ..RouterConfig::default() });
        for n in 0..5 {
            f.router.route(&alice(), SendRequest::group("g1", format!("m{n}"))).await.unwrap();
        }

        let history = f
            .router
            .history(&UserId::new("u2"), HistoryQuery::Group(GroupId::new("g1")), 100)
            .await
            .unwrap();
        let contents: Vec<_> = history.iter().map(Message::content).collect();
        assert_eq!(contents, ["m2", "m3", "m4"]);

        let err = f
            .router
            .history(&UserId::new("u3"), HistoryQuery::Group(GroupId::new("g1")), 10)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not_a_group_member");
    }

    #[tokio::test]
    async fn ids_with_key_separator_never_reach_storage() {
        let f = fixture(RouterConfig::default());

        let err = f.router.route(&alice(), SendRequest::group("g1:x", "hi")).await.unwrap_err();
        assert_eq!(err.code(), "group_not_found");

        let err = f
            .router
            .history(&UserId::new("u1"), HistoryQuery::Private { peer: UserId::new("u2:x") }, 10)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "recipient_not_found");
        assert_eq!(f.log.total_entries(), 0);
    }

    #[tokio::test]
    async fn private_history_is_per_owner() {
        let f = fixture(RouterConfig::default());
        f.router.route(&alice(), SendRequest::private("u2", "hi")).await.unwrap();

        let bob_view = f
            .router
            .history(&UserId::new("u2"), HistoryQuery::Private { peer: UserId::new("u1") }, 10)
            .await
            .unwrap();
        let carol_view = f
            .router
            .history(&UserId::new("u3"), HistoryQuery::Private { peer: UserId::new("u1") }, 10)
            .await
            .unwrap();

        assert_eq!(bob_view.len(), 1);
        assert!(carol_view.is_empty());
    }
}
