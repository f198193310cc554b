//! The canonical message record.
//!
//! A [`Message`] is built exactly once, by the router, after validation. It is
//! then persisted and published unchanged; nothing downstream mutates it.
//!
//! # Wire shape
//!
//! ```json
//! {
//!   "id": "5b0e…",
//!   "type": "private",
//!   "to_id": "u2",
//!   "content": "hi",
//!   "from_id": "u1",
//!   "from_user": "alice",
//!   "timestamp": "2024-05-01T12:00:00Z"
//! }
//! ```
//!
//! `to_id` appears only on private messages and `group_id` only on group
//! messages. Both come from the flattened [`Target`] so the JSON can never
//! carry both.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Channel, ConversationKey, GroupId, ProtocolError, UserId};

/// The three message kinds, without their recipient data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// One-to-one message
    Private,
    /// Message to every member of a group
    Group,
    /// Message to every connected user
    Broadcast,
}

impl MessageKind {
    /// Wire name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Group => "group",
            Self::Broadcast => "broadcast",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(Self::Private),
            "group" => Ok(Self::Group),
            "broadcast" => Ok(Self::Broadcast),
            other => Err(ProtocolError::UnknownKind(other.to_string())),
        }
    }
}

/// Who a message is addressed to.
///
/// Serialized inline into [`Message`] as the `type` tag plus the single
/// recipient field the variant needs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Target {
    /// Deliver to one user
    Private {
        /// Resolved recipient
        to_id: UserId,
    },
    /// Deliver to a group's subscribed members
    Group {
        /// Recipient group
        group_id: GroupId,
    },
    /// Deliver to everyone
    Broadcast,
}

impl Target {
    /// Kind of this target.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Private { .. } => MessageKind::Private,
            Self::Group { .. } => MessageKind::Group,
            Self::Broadcast => MessageKind::Broadcast,
        }
    }
}

/// A validated, immutable chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    id: Uuid,
    #[serde(flatten)]
    target: Target,
    content: String,
    from_id: UserId,
    from_user: String,
    timestamp: DateTime<Utc>,
}

impl Message {
    /// Assemble a message. Only the router should call this, after it has
    /// validated `target` against the directories.
    pub fn new(
        id: Uuid,
        target: Target,
        content: impl Into<String>,
        from_id: UserId,
        from_user: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            target,
            content: content.into(),
            from_id,
            from_user: from_user.into(),
            timestamp,
        }
    }

    /// Unique message id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Addressing information.
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Kind of this message.
    pub fn kind(&self) -> MessageKind {
        self.target.kind()
    }

    /// Message body.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Authenticated sender id.
    pub fn from_id(&self) -> &UserId {
        &self.from_id
    }

    /// Sender display name at send time.
    pub fn from_user(&self) -> &str {
        &self.from_user
    }

    /// Server-side creation time.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Recipient user, for private messages.
    pub fn to_id(&self) -> Option<&UserId> {
        match &self.target {
            Target::Private { to_id } => Some(to_id),
            _ => None,
        }
    }

    /// Recipient group, for group messages.
    pub fn group_id(&self) -> Option<&GroupId> {
        match &self.target {
            Target::Group { group_id } => Some(group_id),
            _ => None,
        }
    }

    /// The channel this message is published on.
    pub fn channel(&self) -> Channel {
        match &self.target {
            Target::Private { to_id } => Channel::User(to_id.clone()),
            Target::Group { group_id } => Channel::Group(group_id.clone()),
            Target::Broadcast => Channel::Broadcast,
        }
    }

    /// Every history log this message is appended to.
    ///
    /// Private messages land in both direction-keyed logs so either
    /// participant's history contains them. A message to oneself yields a
    /// single key.
    pub fn conversation_keys(&self) -> Vec<ConversationKey> {
        match &self.target {
            Target::Private { to_id } => ConversationKey::private_pair(&self.from_id, to_id),
            Target::Group { group_id } => vec![ConversationKey::Group(group_id.clone())],
            Target::Broadcast => vec![ConversationKey::Broadcast],
        }
    }

    /// Serialize to the outbound JSON frame.
    pub fn encode(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Parse a stored or delivered JSON record.
    pub fn decode(raw: &str) -> crate::Result<Self> {
        serde_json::from_str(raw).map_err(|e| ProtocolError::MalformedFrame(e.to_string()))
    }
}
