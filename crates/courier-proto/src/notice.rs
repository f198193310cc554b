//! Server-to-client control frames.
//!
//! Notices travel on the same socket as delivered messages but are never
//! persisted or published; they only go to the connection that caused them.

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// A control frame addressed to a single connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
    /// A request from this connection was rejected.
    Error {
        /// Stable snake_case error code
        code: String,
        /// Human-readable detail
        message: String,
    },
}

impl Notice {
    /// Build an error notice.
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error { code: code.into(), message: message.into() }
    }

    /// Serialize to an outbound JSON frame.
    pub fn encode(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_notice_shape() {
        let json = Notice::error("not_a_group_member", "not a member of g1").encode().unwrap();
        insta::assert_snapshot!(
            json,
            @r#"{"type":"error","code":"not_a_group_member","message":"not a member of g1"}"#
        );
    }
}
