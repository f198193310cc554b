#![allow(clippy::disallowed_types, reason = "Lock is never held across an await")]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use courier_proto::{ConversationKey, Message};

use super::{MessageLog, StorageError, suffix_start};

/// In-memory message log for tests and single-process deployments.
///
/// All conversations live behind one mutex, which is what makes multi-key
/// appends atomic. Clones share the same logs.
#[derive(Clone, Default)]
pub struct MemoryLog {
    inner: Arc<Mutex<HashMap<ConversationKey, Vec<Message>>>>,
}

impl MemoryLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of conversations with at least one message.
    pub fn conversation_count(&self) -> usize {
        self.lock().len()
    }

    /// Total stored entries across all conversations.
    ///
    /// A private message between two users counts twice.
    pub fn total_entries(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConversationKey, Vec<Message>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MessageLog for MemoryLog {
    async fn append(
        &self,
        keys: &[ConversationKey],
        message: &Message,
    ) -> Result<(), StorageError> {
        let mut logs = self.lock();
        for key in keys {
            logs.entry(key.clone()).or_default().push(message.clone());
        }
        Ok(())
    }

    async fn range(
        &self,
        key: &ConversationKey,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError> {
        let logs = self.lock();
        let Some(entries) = logs.get(key) else {
            return Ok(Vec::new());
        };

        let start = suffix_start(entries.len() as u64, limit) as usize;
        Ok(entries[start..].to_vec())
    }

    async fn count(&self, key: &ConversationKey) -> Result<u64, StorageError> {
        Ok(self.lock().get(key).map_or(0, |entries| entries.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use courier_proto::{Target, UserId};
    use uuid::Uuid;

    use super::*;

    fn broadcast(n: u128) -> Message {
        Message::new(
            Uuid::from_u128(n),
            Target::Broadcast,
            format!("m{n}"),
            UserId::new("u1"),
            "alice",
            Utc.timestamp_opt(1_700_000_000 + n as i64, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn range_returns_newest_suffix_oldest_first() {
        let log = MemoryLog::new();
        for n in 0..5 {
            log.append(&[ConversationKey::Broadcast], &broadcast(n)).await.unwrap();
        }

        let tail = log.range(&ConversationKey::Broadcast, 2).await.unwrap();
        let contents: Vec<_> = tail.iter().map(Message::content).collect();
        assert_eq!(contents, ["m3", "m4"]);
    }

    #[tokio::test]
    async fn missing_key_reads_empty() {
        let log = MemoryLog::new();
        let key = ConversationKey::Group("nope".into());
        assert!(log.range(&key, 10).await.unwrap().is_empty());
        assert_eq!(log.count(&key).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn multi_key_append_writes_every_key() {
        let log = MemoryLog::new();
        let message = broadcast(1);
        let keys = ConversationKey::private_pair(&UserId::new("a"), &UserId::new("b"));

        log.append(&keys, &message).await.unwrap();

        for key in &keys {
            assert_eq!(log.range(key, 10).await.unwrap(), vec![message.clone()]);
        }
        assert_eq!(log.total_entries(), 2);
        assert_eq!(log.conversation_count(), 2);
    }
}
