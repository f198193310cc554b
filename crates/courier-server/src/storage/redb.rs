//! Redb-backed conversation log.
//!
//! Each append runs in one write transaction across every target key, so a
//! private message lands in both participants' logs or in neither. Redb is a
//! blocking API; calls hop onto the blocking pool.
//!
//! Log keys are built from the parts of a [`ConversationKey`], never from its
//! colon-delimited string form, so ids containing `:` cannot alias another
//! conversation.

use std::{fmt::Display, path::Path, sync::Arc};

use async_trait::async_trait;
use courier_proto::{ConversationKey, Message};
use redb::{Database, ReadableTable, TableDefinition};

use super::{MessageLog, StorageError, suffix_start};

/// Table: messages
/// Key: log key, then position as big-endian u64
/// Value: JSON-encoded message
const MESSAGES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("messages");

/// Table: heads
/// Key: log key
/// Value: number of messages appended so far
const HEADS: TableDefinition<&[u8], u64> = TableDefinition::new("heads");

const TAG_PRIVATE: u8 = 1;
const TAG_GROUP: u8 = 2;
const TAG_BROADCAST: u8 = 3;

/// Durable single-node log backed by Redb.
///
/// Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbLog {
    db: Arc<Database>,
}

impl RedbLog {
    /// Open or create a database at `path`, creating tables as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(io)?;

        let txn = db.begin_write().map_err(io)?;
        {
            txn.open_table(MESSAGES).map_err(io)?;
            txn.open_table(HEADS).map_err(io)?;
        }
        txn.commit().map_err(io)?;

        Ok(Self { db: Arc::new(db) })
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, StorageError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(|e| StorageError::Io(format!("storage task failed: {e}")))?
    }
}

#[async_trait]
impl MessageLog for RedbLog {
    async fn append(
        &self,
        keys: &[ConversationKey],
        message: &Message,
    ) -> Result<(), StorageError> {
        let payload = serde_json::to_vec(message)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let keys: Vec<Vec<u8>> = keys.iter().map(log_key).collect();

        self.blocking(move |db| {
            let txn = db.begin_write().map_err(io)?;
            {
                let mut heads = txn.open_table(HEADS).map_err(io)?;
                let mut messages = txn.open_table(MESSAGES).map_err(io)?;

                for key in &keys {
                    let position = heads.get(key.as_slice()).map_err(io)?.map_or(0, |v| v.value());
                    let entry = entry_key(key, position);
                    messages.insert(entry.as_slice(), payload.as_slice()).map_err(io)?;
                    heads.insert(key.as_slice(), position + 1).map_err(io)?;
                }
            }
            txn.commit().map_err(io)
        })
        .await
    }

    async fn range(
        &self,
        key: &ConversationKey,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let key = log_key(key);

        self.blocking(move |db| {
            let txn = db.begin_read().map_err(io)?;
            let heads = txn.open_table(HEADS).map_err(io)?;
            let messages = txn.open_table(MESSAGES).map_err(io)?;

            let len = heads.get(key.as_slice()).map_err(io)?.map_or(0, |v| v.value());
            let start = entry_key(&key, suffix_start(len, limit));
            let end = entry_key(&key, len);

            let mut out = Vec::with_capacity(limit.min(len as usize));
            for entry in messages.range(start.as_slice()..end.as_slice()).map_err(io)? {
                let (_, value) = entry.map_err(io)?;
                let message = serde_json::from_slice(value.value())
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                out.push(message);
            }
            Ok(out)
        })
        .await
    }

    async fn count(&self, key: &ConversationKey) -> Result<u64, StorageError> {
        let key = log_key(key);

        self.blocking(move |db| {
            let txn = db.begin_read().map_err(io)?;
            let heads = txn.open_table(HEADS).map_err(io)?;
            Ok(heads.get(key.as_slice()).map_err(io)?.map_or(0, |v| v.value()))
        })
        .await
    }
}

fn io(e: impl Display) -> StorageError {
    StorageError::Io(e.to_string())
}

/// Tag byte, then each id as a big-endian u32 length and its bytes. Every
/// tag has a fixed number of parts, so no log key is a prefix of another.
fn log_key(key: &ConversationKey) -> Vec<u8> {
    let mut out = Vec::new();
    match key {
        ConversationKey::Private { owner, peer } => {
            out.push(TAG_PRIVATE);
            push_part(&mut out, owner.as_str());
            push_part(&mut out, peer.as_str());
        },
        ConversationKey::Group(group) => {
            out.push(TAG_GROUP);
            push_part(&mut out, group.as_str());
        },
        ConversationKey::Broadcast => out.push(TAG_BROADCAST),
    }
    out
}

fn push_part(out: &mut Vec<u8>, part: &str) {
    out.extend_from_slice(&(part.len() as u32).to_be_bytes());
    out.extend_from_slice(part.as_bytes());
}

fn entry_key(log: &[u8], position: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(log.len() + 8);
    key.extend_from_slice(log);
    key.extend_from_slice(&position.to_be_bytes());
    key
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use courier_proto::{Target, UserId};
    use tempfile::TempDir;
    use uuid::Uuid;

    use super::*;

    fn private(n: u128, from: &str, to: &str) -> Message {
        Message::new(
            Uuid::from_u128(n),
            Target::Private { to_id: UserId::new(to) },
            format!("m{n}"),
            UserId::new(from),
            from,
            Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        )
    }

    #[test]
    fn entries_sort_by_position() {
        let log = log_key(&ConversationKey::Broadcast);
        assert!(entry_key(&log, 1) < entry_key(&log, 256));
    }

    #[test]
    fn log_keys_keep_id_boundaries() {
        let left = ConversationKey::Private { owner: UserId::new("a:b"), peer: UserId::new("c") };
        let right = ConversationKey::Private { owner: UserId::new("a"), peer: UserId::new("b:c") };

        assert_ne!(log_key(&left), log_key(&right));
        assert_ne!(
            log_key(&ConversationKey::Group("g1".into())),
            log_key(&ConversationKey::Group("g10".into()))
        );
    }

    #[tokio::test]
    async fn colon_ids_do_not_share_history() {
        let dir = TempDir::new().unwrap();
        let log = RedbLog::open(dir.path().join("courier.redb")).unwrap();

        let message = private(1, "a:b", "c");
        log.append(&message.conversation_keys(), &message).await.unwrap();

        let other = ConversationKey::Private { owner: UserId::new("a"), peer: UserId::new("b:c") };
        assert!(log.range(&other, 10).await.unwrap().is_empty());
        assert_eq!(log.count(&other).await.unwrap(), 0);

        let own = ConversationKey::Private { owner: UserId::new("a:b"), peer: UserId::new("c") };
        assert_eq!(log.range(&own, 10).await.unwrap(), vec![message]);
    }

    #[tokio::test]
    async fn private_append_lands_in_both_logs() {
        let dir = TempDir::new().unwrap();
        let log = RedbLog::open(dir.path().join("courier.redb")).unwrap();

        let message = private(1, "a", "b");
        log.append(&message.conversation_keys(), &message).await.unwrap();

        for key in message.conversation_keys() {
            assert_eq!(log.range(&key, 10).await.unwrap(), vec![message.clone()]);
            assert_eq!(log.count(&key).await.unwrap(), 1);
        }
    }

    #[tokio::test]
    async fn history_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("courier.redb");

        {
            let log = RedbLog::open(&path).unwrap();
            for n in 0..3 {
                let message = private(n, "a", "b");
                log.append(&message.conversation_keys(), &message).await.unwrap();
            }
        }

        let log = RedbLog::open(&path).unwrap();
        let key = ConversationKey::Private { owner: UserId::new("b"), peer: UserId::new("a") };
        let tail = log.range(&key, 2).await.unwrap();

        let ids: Vec<_> = tail.iter().map(Message::id).collect();
        assert_eq!(ids, [Uuid::from_u128(1), Uuid::from_u128(2)]);
    }

    #[tokio::test]
    async fn unknown_conversation_is_empty() {
        let dir = TempDir::new().unwrap();
        let log = RedbLog::open(dir.path().join("courier.redb")).unwrap();

        assert!(log.range(&ConversationKey::Broadcast, 5).await.unwrap().is_empty());
        assert_eq!(log.count(&ConversationKey::Broadcast).await.unwrap(), 0);
    }
}
