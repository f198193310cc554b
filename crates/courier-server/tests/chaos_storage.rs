//! Chaos property tests for conversation logs.
//!
//! Wraps each backend in `ChaoticLog` and checks the invariants the router
//! depends on:
//! - A multi-key append lands in every key or in none
//! - Each log keeps append order
//! - `range` returns the newest suffix, oldest first

use chrono::{DateTime, TimeZone, Utc};
use courier_proto::{ConversationKey, GroupId, Message, Target, UserId};
use courier_server::storage::{ChaoticLog, MemoryLog, MessageLog, RedbLog, StorageError};
use proptest::prelude::*;
use tempfile::tempdir;
use uuid::Uuid;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap()
}

fn timestamp(i: u64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + i as i64, 0).unwrap()
}

fn private_message(i: u64, from: &str, to: &str) -> Message {
    Message::new(
        Uuid::from_u128(u128::from(i) + 1),
        Target::Private { to_id: UserId::new(to) },
        format!("m{i}"),
        UserId::new(from),
        from,
        timestamp(i),
    )
}

fn group_message(i: u64) -> Message {
    Message::new(
        Uuid::from_u128(u128::from(i) + 1),
        Target::Group { group_id: GroupId::new("g1") },
        format!("g{i}"),
        UserId::new("u1"),
        "alice",
        timestamp(i),
    )
}

/// Append `count` private messages through `log`, returning the ones that
/// were accepted.
async fn append_private(log: &impl MessageLog, count: u64) -> Vec<Message> {
    let mut accepted = Vec::new();
    for i in 0..count {
        let (from, to) = if i % 2 == 0 { ("u1", "u2") } else { ("u2", "u1") };
        let message = private_message(i, from, to);
        match log.append(&message.conversation_keys(), &message).await {
            Ok(()) => accepted.push(message),
            Err(StorageError::Unavailable(_)) => {},
            Err(e) => panic!("unexpected error: {e:?}"),
        }
    }
    accepted
}

async fn check_private_views(log: &impl MessageLog, accepted: &[Message]) {
    let forward = ConversationKey::Private { owner: UserId::new("u1"), peer: UserId::new("u2") };
    let backward = ConversationKey::Private { owner: UserId::new("u2"), peer: UserId::new("u1") };

    let limit = accepted.len() + 5;
    let forward_view = log.range(&forward, limit).await.unwrap();
    let backward_view = log.range(&backward, limit).await.unwrap();

    // ORACLE: both owners see every accepted message, in append order
    assert_eq!(forward_view, accepted);
    assert_eq!(backward_view, accepted);
    assert_eq!(log.count(&forward).await.unwrap(), accepted.len() as u64);
}

#[test]
fn prop_chaos_appends_are_all_or_nothing() {
    proptest!(|(
        failure_rate in 0.0..0.8,
        seed in any::<u64>(),
        count in 1u64..60,
    )| {
        runtime().block_on(async {
            let log = ChaoticLog::with_seed(MemoryLog::new(), failure_rate, seed);
            let accepted = append_private(&log, count).await;

            assert_eq!(log.operation_count() - log.injected_failures(), accepted.len());
            check_private_views(log.inner(), &accepted).await;
        });
    });
}

#[test]
fn prop_chaos_appends_are_all_or_nothing_redb() {
    proptest!(ProptestConfig::with_cases(16), |(
        failure_rate in 0.0..0.8,
        seed in any::<u64>(),
        count in 1u64..30,
    )| {
        let dir = tempdir().unwrap();
        runtime().block_on(async {
            let redb = RedbLog::open(dir.path().join("chaos.redb")).unwrap();
            let log = ChaoticLog::with_seed(redb, failure_rate, seed);
            let accepted = append_private(&log, count).await;

            check_private_views(log.inner(), &accepted).await;
        });
    });
}

#[test]
fn prop_range_returns_newest_suffix() {
    proptest!(|(
        total in 0u64..80,
        limit in 0usize..100,
    )| {
        runtime().block_on(async {
            let log = MemoryLog::new();
            let key = ConversationKey::Group(GroupId::new("g1"));
            let mut all = Vec::new();
            for i in 0..total {
                let message = group_message(i);
                log.append(std::slice::from_ref(&key), &message).await.unwrap();
                all.push(message);
            }

            let page = log.range(&key, limit).await.unwrap();
            let start = all.len().saturating_sub(limit);

            assert_eq!(page, all[start..].to_vec());
            assert!(page.windows(2).all(|w| w[0].timestamp() < w[1].timestamp()));
        });
    });
}

#[test]
fn failing_log_never_touches_inner() {
    runtime().block_on(async {
        let log = ChaoticLog::failing(MemoryLog::new());
        let message = group_message(0);
        let key = ConversationKey::Group(GroupId::new("g1"));

        assert!(log.append(std::slice::from_ref(&key), &message).await.is_err());
        assert!(log.range(&key, 10).await.is_err());
        assert_eq!(log.inner().total_entries(), 0);
        assert_eq!(log.injected_failures(), 2);
    });
}
