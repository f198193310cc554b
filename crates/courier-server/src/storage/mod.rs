//! Durable, ordered per-conversation message history.
//!
//! Every accepted message is appended to one or more conversation logs before
//! it is published. Logs are append-only and read back as a bounded suffix,
//! oldest first.
//!
//! Backends:
//! - [`MemoryLog`]: single process, tests and local development
//! - [`RedbLog`]: embedded on-disk store for a single node
//! - [`RedisLog`]: shared lists so every relay process sees the same history
//! - [`ChaoticLog`]: fault-injecting wrapper for chaos tests

mod chaotic;
mod error;
mod memory;
mod redb;
mod redis;

use async_trait::async_trait;
pub use chaotic::ChaoticLog;
use courier_proto::{ConversationKey, Message};
pub use error::StorageError;
pub use memory::MemoryLog;

pub use self::{redb::RedbLog, redis::RedisLog};

/// Append-only conversation log.
///
/// Implementations are shared across sessions behind an `Arc`, so every
/// method takes `&self`.
#[async_trait]
pub trait MessageLog: Send + Sync + 'static {
    /// Append `message` to every log named in `keys`.
    ///
    /// # Invariants
    ///
    /// - Post (success): the message is the newest entry of every key
    /// - Post (failure): no key gained the message
    /// - Appends to one key are totally ordered
    async fn append(
        &self,
        keys: &[ConversationKey],
        message: &Message,
    ) -> Result<(), StorageError>;

    /// The newest `limit` messages of a log, oldest first.
    ///
    /// A key that was never written reads as empty. `limit == 0` returns an
    /// empty vector.
    async fn range(
        &self,
        key: &ConversationKey,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError>;

    /// Number of messages ever appended to a log.
    async fn count(&self, key: &ConversationKey) -> Result<u64, StorageError>;
}

/// Index of the first element of a `limit`-sized suffix of a `len`-long log.
pub(crate) fn suffix_start(len: u64, limit: usize) -> u64 {
    len.saturating_sub(limit as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_start_clamps() {
        assert_eq!(suffix_start(10, 3), 7);
        assert_eq!(suffix_start(2, 5), 0);
        assert_eq!(suffix_start(0, 0), 0);
        assert_eq!(suffix_start(4, 0), 4);
    }
}
