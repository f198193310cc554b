//! Read-only directory over the user/group service's Redis schema.
//!
//! - `user:<id>`: JSON user record (`id`, `username`, plus fields ignored here)
//! - `username:<name>`: user id
//! - `group:<id>`: JSON group record with a `members` array
//! - `user_groups:<uid>`: set of group ids
//!
//! Records whose ids contain `:` are refused: such an id would make the
//! colon-delimited history keys ambiguous.

use async_trait::async_trait;
use courier_proto::{GroupId, UserId};
use redis::{AsyncCommands, aio::ConnectionManager};
use serde::de::DeserializeOwned;

use super::{
    DirectoryError, GroupDirectory, GroupRecord, UserDirectory, UserProfile, checked_group,
    checked_user,
};

/// Directory backed by the shared Redis instance.
#[derive(Clone)]
pub struct RedisDirectory {
    conn: ConnectionManager,
}

impl RedisDirectory {
    /// Connect to the Redis server at `url`.
    pub async fn connect(url: &str) -> Result<Self, DirectoryError> {
        let client =
            redis::Client::open(url).map_err(|e| DirectoryError::Unavailable(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;
        Ok(Self { conn })
    }

    /// Wrap an existing connection manager.
    pub fn from_manager(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>, DirectoryError> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(|e| DirectoryError::Unavailable(e.to_string()))
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, DirectoryError> {
        let Some(raw) = self.get_string(key).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| DirectoryError::Corrupt { key: key.to_string(), reason: e.to_string() })
    }
}

#[async_trait]
impl UserDirectory for RedisDirectory {
    async fn resolve(&self, identifier: &str) -> Result<Option<UserProfile>, DirectoryError> {
        if let Some(user) = self.get_json::<UserProfile>(&format!("user:{identifier}")).await? {
            return checked_user(user).map(Some);
        }

        let Some(id) = self.get_string(&format!("username:{identifier}")).await? else {
            return Ok(None);
        };
        self.get_json::<UserProfile>(&format!("user:{id}")).await?.map(checked_user).transpose()
    }
}

#[async_trait]
impl GroupDirectory for RedisDirectory {
    async fn group(&self, id: &GroupId) -> Result<Option<GroupRecord>, DirectoryError> {
        self.get_json::<GroupRecord>(&format!("group:{id}")).await?.map(checked_group).transpose()
    }

    async fn groups_for_user(&self, user: &UserId) -> Result<Vec<GroupId>, DirectoryError> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn
            .smembers(format!("user_groups:{user}"))
            .await
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;

        let mut ids: Vec<GroupId> = ids
            .into_iter()
            .map(GroupId::from)
            .filter(|id| {
                let safe = id.is_key_safe();
                if !safe {
                    tracing::warn!(%user, group_id = %id, "skipping group with unsafe id");
                }
                safe
            })
            .collect();
        ids.sort();
        Ok(ids)
    }
}
