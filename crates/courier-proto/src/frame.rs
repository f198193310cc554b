//! Inbound client frames.
//!
//! A client sends one JSON object per WebSocket frame:
//!
//! ```json
//! {"type": "group", "to_group": "g1", "content": "hello"}
//! ```
//!
//! Decoding is deliberately lenient about shape and strict about nothing
//! else: a missing `type` decodes to an empty kind so the router can report
//! it as an invalid kind, empty recipient strings read as absent, and unknown
//! fields (including any `from`/`from_user` a client tries to set) are
//! ignored. Only syntactically broken input is a [`ProtocolError`].

use serde::{Deserialize, Serialize};

use crate::{GroupId, MessageKind, ProtocolError};

/// Largest inbound frame accepted, in bytes.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// A client's request to send a message.
///
/// Untrusted input. Carries no sender fields: the session supplies the
/// authenticated identity separately.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRequest {
    /// Raw kind tag (`private`, `group`, `broadcast`)
    #[serde(rename = "type", default)]
    pub kind: String,

    /// Recipient user id or username (private only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,

    /// Recipient group (group only). `group_id` is accepted as an alias; a
    /// frame carrying both spellings is malformed.
    #[serde(default, alias = "group_id", skip_serializing_if = "Option::is_none")]
    pub to_group: Option<GroupId>,

    /// Message body
    #[serde(default)]
    pub content: String,
}

impl SendRequest {
    /// Build a private request.
    pub fn private(to: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Private.as_str().to_string(),
            to: Some(to.into()),
            to_group: None,
            content: content.into(),
        }
    }

    /// Build a group request.
    pub fn group(group: impl Into<GroupId>, content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Group.as_str().to_string(),
            to: None,
            to_group: Some(group.into()),
            content: content.into(),
        }
    }

    /// Build a broadcast request.
    pub fn broadcast(content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Broadcast.as_str().to_string(),
            to: None,
            to_group: None,
            content: content.into(),
        }
    }

    /// Decode a frame from raw bytes (text or binary WebSocket payload).
    pub fn decode(raw: &[u8]) -> crate::Result<Self> {
        if raw.len() > MAX_FRAME_BYTES {
            return Err(ProtocolError::FrameTooLarge { size: raw.len(), max: MAX_FRAME_BYTES });
        }
        serde_json::from_slice(raw).map_err(|e| ProtocolError::MalformedFrame(e.to_string()))
    }

    /// Encode to JSON (used by clients and tests).
    pub fn encode(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Parsed kind tag.
    pub fn message_kind(&self) -> crate::Result<MessageKind> {
        self.kind.parse()
    }

    /// Private recipient, if present and non-empty.
    pub fn recipient_user(&self) -> Option<&str> {
        self.to.as_deref().filter(|to| !to.is_empty())
    }

    /// Group recipient, if present and non-empty.
    pub fn recipient_group(&self) -> Option<&GroupId> {
        self.to_group.as_ref().filter(|g| !g.as_str().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_private_frame() {
        let req = SendRequest::decode(br#"{"type":"private","to":"u2","content":"hi"}"#).unwrap();

        assert_eq!(req.message_kind().unwrap(), MessageKind::Private);
        assert_eq!(req.recipient_user(), Some("u2"));
        assert_eq!(req.content, "hi");
    }

    #[test]
    fn accepts_group_id_alias() {
        let req = SendRequest::decode(br#"{"type":"group","group_id":"g1","content":"x"}"#).unwrap();
        assert_eq!(req.recipient_group(), Some(&GroupId::new("g1")));
    }

    #[test]
    fn both_group_spellings_is_malformed() {
        let raw = br#"{"type":"group","to_group":"g1","group_id":"g1","content":"x"}"#;
        let err = SendRequest::decode(raw).unwrap_err();
        assert!(matches!(&err, ProtocolError::MalformedFrame(m) if m.contains("to_group")), "{err}");
    }

    #[test]
    fn ignores_client_supplied_sender() {
        let req = SendRequest::decode(
            br#"{"type":"broadcast","content":"x","from":"admin","from_user":"root"}"#,
        )
        .unwrap();

        assert_eq!(req, SendRequest::broadcast("x"));
    }

    #[test]
    fn missing_type_is_not_a_decode_error() {
        let req = SendRequest::decode(br#"{"content":"x"}"#).unwrap();
        assert!(matches!(req.message_kind(), Err(ProtocolError::UnknownKind(k)) if k.is_empty()));
    }

    #[test]
    fn empty_recipients_read_as_absent() {
        let req = SendRequest::decode(br#"{"type":"private","to":"","content":"x"}"#).unwrap();
        assert_eq!(req.recipient_user(), None);
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(SendRequest::decode(b"not json"), Err(ProtocolError::MalformedFrame(_))));
        assert!(matches!(SendRequest::decode(b"[1,2,3]"), Err(ProtocolError::MalformedFrame(_))));
    }

    #[test]
    fn rejects_oversized_frame() {
        let big = vec![b' '; MAX_FRAME_BYTES + 1];
        assert!(matches!(SendRequest::decode(&big), Err(ProtocolError::FrameTooLarge { .. })));
    }
}
