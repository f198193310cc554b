//! Deterministic in-process harness for the Courier relay.
//!
//! Runs real sessions, routers and registries against in-memory backends so
//! tests can exercise the full connect → route → persist → publish → deliver
//! path without sockets or Redis:
//!
//! - [`SimEnv`]: seeded randomness and a simulated clock
//! - [`channel_transport`]: an in-memory client connection with fault hooks
//! - [`RecordingBus`] / [`FailingBus`]: observable and breakable fan-out
//! - [`Cluster`]: several relay nodes over one shared log, bus and directory

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cluster;
pub mod fault_bus;
pub mod sim_env;
pub mod sim_transport;

pub use cluster::{Cluster, Connection, Node, identity, sample_directory};
pub use fault_bus::{FailingBus, RecordingBus};
pub use sim_env::{DEFAULT_SEED, SimEnv};
pub use sim_transport::{ChannelReader, ChannelWriter, ClientEnd, ClientEvent, channel_transport};
