//! Redis-backed conversation log shared by every relay process.
//!
//! Conversations are Redis lists named by [`ConversationKey::storage_key`]
//! (`private_msg:<owner>:<peer>`, `group_msg:<group>`, `broadcast`). Each
//! element is a JSON-encoded message.
//!
//! Multi-key appends run as one Lua script. `MULTI`/`EXEC` does not roll back
//! when a single command fails, so the script checks every key's type before
//! pushing to any of them.

use std::sync::Arc;

use async_trait::async_trait;
use courier_proto::{ConversationKey, Message};
use redis::{AsyncCommands, RedisError, Script, aio::ConnectionManager};

use super::{MessageLog, StorageError};

/// KEYS: conversation lists. ARGV[1]: encoded message.
const APPEND_SCRIPT: &str = r"
for _, key in ipairs(KEYS) do
    local kind = redis.call('TYPE', key).ok
    if kind ~= 'none' and kind ~= 'list' then
        return redis.error_reply('WRONGTYPE ' .. key .. ' holds a ' .. kind)
    end
end
for _, key in ipairs(KEYS) do
    redis.call('RPUSH', key, ARGV[1])
end
return #KEYS
";

/// Shared log on a Redis server.
///
/// The connection manager reconnects on its own; clones share it.
#[derive(Clone)]
pub struct RedisLog {
    conn: ConnectionManager,
    append: Arc<Script>,
}

impl RedisLog {
    /// Connect to the Redis server at `url`.
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        let conn = client.get_connection_manager().await.map_err(unavailable)?;
        Ok(Self::from_manager(conn))
    }

    /// Wrap an existing connection manager.
    pub fn from_manager(conn: ConnectionManager) -> Self {
        Self { conn, append: Arc::new(Script::new(APPEND_SCRIPT)) }
    }
}

#[async_trait]
impl MessageLog for RedisLog {
    async fn append(
        &self,
        keys: &[ConversationKey],
        message: &Message,
    ) -> Result<(), StorageError> {
        let payload = message.encode().map_err(|e| StorageError::Serialization(e.to_string()))?;

        let mut invocation = self.append.prepare_invoke();
        for key in keys {
            invocation.key(key.storage_key());
        }
        invocation.arg(payload);

        let mut conn = self.conn.clone();
        invocation.invoke_async::<_, i64>(&mut conn).await.map(drop).map_err(unavailable)
    }

    async fn range(
        &self,
        key: &ConversationKey,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let start = -isize::try_from(limit).unwrap_or(isize::MAX);

        let mut conn = self.conn.clone();
        let raw: Vec<String> =
            conn.lrange(key.storage_key(), start, -1).await.map_err(unavailable)?;

        raw.iter()
            .map(|entry| {
                Message::decode(entry).map_err(|e| StorageError::Serialization(e.to_string()))
            })
            .collect()
    }

    async fn count(&self, key: &ConversationKey) -> Result<u64, StorageError> {
        let mut conn = self.conn.clone();
        conn.llen(key.storage_key()).await.map_err(unavailable)
    }
}

fn unavailable(e: RedisError) -> StorageError {
    StorageError::Unavailable(e.to_string())
}
