//! Fuzz target for MessageRouter under storage failures
//!
//! Routes arbitrary requests from arbitrary senders while the log fails at a
//! fuzzer-chosen rate.
//!
//! # Invariants
//!
//! - The router NEVER panics on storage or validation errors
//! - A message is published only if it was stored
//! - Every accepted private message is in both participants' logs
//! - Non-members never get a group message accepted

#![no_main]

use std::sync::Arc;

use arbitrary::Arbitrary;
use courier_harness::{Cluster, RecordingBus, identity, sample_directory};
use courier_proto::{GroupId, SendRequest, UserId};
use courier_server::{ChaoticLog, MemoryLog, MessageLog};
use libfuzzer_sys::fuzz_target;

const USERS: [(&str, &str); 3] = [("u1", "alice"), ("u2", "bob"), ("u3", "carol")];

#[derive(Debug, Clone, Arbitrary)]
struct Scenario {
    /// Seed for ids and timestamps
    seed: u64,
    /// Seed for ChaoticLog failures
    chaos_seed: u64,
    /// Failure rate 0-9 maps to 0%-90%
    failure_rate_tenth: u8,
    /// Requests to route
    operations: Vec<Operation>,
}

#[derive(Debug, Clone, Arbitrary)]
struct Operation {
    sender: u8,
    kind: Kind,
    content: String,
}

#[derive(Debug, Clone, Arbitrary)]
enum Kind {
    Private { to: String },
    PrivateKnown { to: u8 },
    Group { group: String },
    KnownGroup,
    Broadcast,
    Raw { kind: String },
}

fuzz_target!(|scenario: Scenario| {
    let runtime = tokio::runtime::Builder::new_current_thread().build().expect("runtime");
    runtime.block_on(run(scenario));
});

async fn run(scenario: Scenario) {
    let failure_rate = f64::from(scenario.failure_rate_tenth % 10) / 10.0;
    let memory = MemoryLog::new();
    let log = Arc::new(ChaoticLog::with_seed(memory.clone(), failure_rate, scenario.chaos_seed));
    let bus = RecordingBus::new();
    let cluster = Cluster::with_backends(scenario.seed, log, Arc::new(bus.clone()))
        .with_directory(sample_directory());
    let node = cluster.node();

    let mut accepted = 0usize;
    for operation in scenario.operations.into_iter().take(64) {
        let (user_id, username) = USERS[usize::from(operation.sender) % USERS.len()];
        let sender = identity(user_id, username);
        let request = match operation.kind {
            Kind::Private { to } => SendRequest::private(to, operation.content),
            Kind::PrivateKnown { to } => {
                SendRequest::private(USERS[usize::from(to) % USERS.len()].0, operation.content)
            },
            Kind::Group { group } => SendRequest::group(GroupId::new(group), operation.content),
            Kind::KnownGroup => SendRequest::group("g1", operation.content),
            Kind::Broadcast => SendRequest::broadcast(operation.content),
            Kind::Raw { kind } => SendRequest { kind, ..SendRequest::broadcast(operation.content) },
        };

        match node.router().route(&sender, request).await {
            Ok(message) => {
                accepted += 1;
                assert_eq!(message.from_id(), &UserId::new(user_id));
                if message.group_id().is_some() {
                    assert_ne!(user_id, "u3", "non-member group send accepted");
                }
                for key in message.conversation_keys() {
                    let stored = memory.range(&key, usize::MAX).await.expect("memory log");
                    assert!(stored.contains(&message));
                }
            },
            // Rejections and injected storage failures are both expected.
            Err(_) => {},
        }
    }

    let primary = bus
        .published()
        .iter()
        .filter(|(channel, payload)| {
            courier_proto::Message::decode(payload).is_ok_and(|m| m.channel() == *channel)
        })
        .count();
    assert_eq!(primary, accepted);
}
