//! Courier message model and wire format.
//!
//! Everything here is pure data: no I/O, no runtime. The server, the test
//! harness and the fuzz targets all share these types so the exact JSON shape
//! and the exact channel/key strings are defined in one place.
//!
//! # Shapes
//!
//! - [`Message`]: the canonical persisted record, also the only thing ever
//!   delivered to subscribers. Its recipient lives inside [`Target`], a closed
//!   sum type, so a private message cannot carry a group id and vice versa.
//! - [`SendRequest`]: what a client sends. Untrusted; the sender identity is
//!   never read from it.
//! - [`Channel`]: publish/subscribe topic names (`broadcast`, `user:<id>`,
//!   `group:<id>`).
//! - [`ConversationKey`]: history log keys (`private_msg:<a>:<b>`,
//!   `group_msg:<id>`, `broadcast`).
//! - [`Notice`]: server-to-client control frames (errors).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod channel;
mod conversation;
mod errors;
mod frame;
mod ids;
mod message;
mod notice;

pub use channel::Channel;
pub use conversation::ConversationKey;
pub use errors::{ProtocolError, Result};
pub use frame::{MAX_FRAME_BYTES, SendRequest};
pub use ids::{GroupId, UserId};
pub use message::{Message, MessageKind, Target};
pub use notice::Notice;
