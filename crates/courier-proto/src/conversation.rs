//! History log keys.
//!
//! Keys are derived purely from the message target and participants, so any
//! process computes the same key for the same conversation. The string form
//! is shared with the Redis schema used by the rest of the system:
//!
//! | Conversation | Storage key |
//! |---|---|
//! | private, seen by `a` with `b` | `private_msg:a:b` |
//! | group `g` | `group_msg:g` |
//! | broadcast | `broadcast` |
//!
//! The string form is only unambiguous for key-safe ids
//! ([`UserId::is_key_safe`]). Backends that are not tied to the Redis schema
//! key on the structured value instead.

use std::fmt;

use crate::{GroupId, UserId};

const PRIVATE_PREFIX: &str = "private_msg:";
const GROUP_PREFIX: &str = "group_msg:";
const BROADCAST_KEY: &str = "broadcast";

/// Identifies one ordered history log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConversationKey {
    /// One participant's view of a private conversation.
    Private {
        /// Whose history this is
        owner: UserId,
        /// The other participant
        peer: UserId,
    },
    /// A group's shared history.
    Group(GroupId),
    /// The global broadcast history.
    Broadcast,
}

impl ConversationKey {
    /// Both direction-keyed logs for a private conversation.
    ///
    /// Order is `[(a, b), (b, a)]`. When `a == b` there is only one log and
    /// only one key is returned, so a message is never stored twice in the
    /// same log.
    pub fn private_pair(a: &UserId, b: &UserId) -> Vec<Self> {
        let forward = Self::Private { owner: a.clone(), peer: b.clone() };
        if a == b {
            return vec![forward];
        }
        vec![forward, Self::Private { owner: b.clone(), peer: a.clone() }]
    }

    /// String key in the shared Redis schema.
    pub fn storage_key(&self) -> String {
        match self {
            Self::Private { owner, peer } => format!("{PRIVATE_PREFIX}{owner}:{peer}"),
            Self::Group(group) => format!("{GROUP_PREFIX}{group}"),
            Self::Broadcast => BROADCAST_KEY.to_string(),
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}
