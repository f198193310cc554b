//! Publish/subscribe channel names.
//!
//! Publishers and subscribers may live in different processes, so the string
//! form is the contract. [`Channel`] renders and parses exactly
//! `broadcast`, `user:<id>` and `group:<id>`.

use std::{fmt, str::FromStr};

use crate::{GroupId, ProtocolError, UserId};

const BROADCAST: &str = "broadcast";
const USER_PREFIX: &str = "user:";
const GROUP_PREFIX: &str = "group:";

/// A named fan-out topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    /// Every connected user
    Broadcast,
    /// One user's private inbox
    User(UserId),
    /// One group's members
    Group(GroupId),
}

impl Channel {
    /// Channels a connection subscribes to when it opens.
    ///
    /// `broadcast`, the user's own channel, then one channel per group in
    /// the given membership snapshot.
    pub fn for_connection<'a>(
        user: &UserId,
        groups: impl IntoIterator<Item = &'a GroupId>,
    ) -> Vec<Self> {
        let mut channels = vec![Self::Broadcast, Self::User(user.clone())];
        channels.extend(groups.into_iter().map(|g| Self::Group(g.clone())));
        channels
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Broadcast => f.write_str(BROADCAST),
            Self::User(user) => write!(f, "{USER_PREFIX}{user}"),
            Self::Group(group) => write!(f, "{GROUP_PREFIX}{group}"),
        }
    }
}

impl FromStr for Channel {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == BROADCAST {
            return Ok(Self::Broadcast);
        }
        if let Some(user) = s.strip_prefix(USER_PREFIX)
            && !user.is_empty()
        {
            return Ok(Self::User(UserId::new(user)));
        }
        if let Some(group) = s.strip_prefix(GROUP_PREFIX)
            && !group.is_empty()
        {
            return Ok(Self::Group(GroupId::new(group)));
        }
        Err(ProtocolError::InvalidChannel(s.to_string()))
    }
}
