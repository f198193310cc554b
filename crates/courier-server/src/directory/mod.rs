//! User and group lookups consumed by the router and sessions.
//!
//! Users and groups are owned by an external service; this crate only reads
//! them. Group membership is read on every send and never cached, so a member
//! removed elsewhere loses send rights on their next message.

mod memory;
mod redis;

use std::collections::HashSet;

use async_trait::async_trait;
use courier_proto::{GroupId, UserId};
use serde::{Deserialize, Serialize};

pub use self::{
    memory::{DirectorySeed, MemoryDirectory},
    redis::RedisDirectory,
};

/// Errors from a directory backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DirectoryError {
    /// The backing service could not be reached
    #[error("directory unavailable: {0}")]
    Unavailable(String),

    /// A record exists but could not be decoded
    #[error("corrupt directory record {key}: {reason}")]
    Corrupt {
        /// Storage key of the bad record
        key: String,
        /// Decoder detail
        reason: String,
    },

    /// A seed file could not be read
    #[error("directory seed error: {0}")]
    Seed(String),

    /// A record carries an id that cannot be embedded in a storage key
    #[error("invalid id in directory record: {0:?}")]
    InvalidId(String),
}

/// Public profile of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Stable user id
    pub id: UserId,
    /// Unique login name
    pub username: String,
}

impl UserProfile {
    /// Build a profile.
    pub fn new(id: impl Into<UserId>, username: impl Into<String>) -> Self {
        Self { id: id.into(), username: username.into() }
    }
}

/// A group and its current member list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    /// Stable group id
    pub id: GroupId,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Member user ids
    #[serde(default)]
    pub members: Vec<UserId>,
}

impl GroupRecord {
    /// Build a group record.
    pub fn new(
        id: impl Into<GroupId>,
        name: impl Into<String>,
        members: impl IntoIterator<Item = UserId>,
    ) -> Self {
        Self { id: id.into(), name: name.into(), members: members.into_iter().collect() }
    }

    /// Whether `user` is listed as a member.
    pub fn is_member(&self, user: &UserId) -> bool {
        self.members.contains(user)
    }
}

/// Reject a user record whose id is not key safe.
fn checked_user(user: UserProfile) -> Result<UserProfile, DirectoryError> {
    if !user.id.is_key_safe() {
        return Err(DirectoryError::InvalidId(user.id.into_inner()));
    }
    Ok(user)
}

/// Reject a group record whose id or any member id is not key safe.
fn checked_group(group: GroupRecord) -> Result<GroupRecord, DirectoryError> {
    if !group.id.is_key_safe() {
        return Err(DirectoryError::InvalidId(group.id.into_inner()));
    }
    if let Some(member) = group.members.iter().find(|member| !member.is_key_safe()) {
        return Err(DirectoryError::InvalidId(member.to_string()));
    }
    Ok(group)
}

/// Resolves private-message recipients.
///
/// Backends never return a user whose id is not key safe.
#[async_trait]
pub trait UserDirectory: Send + Sync + 'static {
    /// Look a user up by id, falling back to username.
    async fn resolve(&self, identifier: &str) -> Result<Option<UserProfile>, DirectoryError>;
}

/// Group existence and membership.
#[async_trait]
pub trait GroupDirectory: Send + Sync + 'static {
    /// Fetch a group record.
    async fn group(&self, id: &GroupId) -> Result<Option<GroupRecord>, DirectoryError>;

    /// Ids of every group `user` belongs to.
    async fn groups_for_user(&self, user: &UserId) -> Result<Vec<GroupId>, DirectoryError>;

    /// Member set of a group. `None` if the group does not exist.
    async fn members_of(&self, id: &GroupId) -> Result<Option<HashSet<UserId>>, DirectoryError> {
        Ok(self.group(id).await?.map(|group| group.members.into_iter().collect()))
    }

    /// Whether `user` is currently a member of `id`. False for unknown groups.
    async fn is_member(&self, id: &GroupId, user: &UserId) -> Result<bool, DirectoryError> {
        Ok(self.group(id).await?.is_some_and(|group| group.is_member(user)))
    }
}
