//! Identity newtypes.
//!
//! Users and groups are identified by opaque strings owned by external
//! services (registration, group CRUD). The newtypes exist so a group id can
//! never be passed where a user id is expected.
//!
//! Shared storage embeds ids in colon-delimited keys (`private_msg:<a>:<b>`),
//! so ids accepted from outside the relay must pass [`UserId::is_key_safe`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a registered user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

/// Identifier of a group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

macro_rules! string_id {
    ($name:ident) => {
        impl $name {
            /// Wrap a raw identifier.
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            /// Borrow the raw identifier.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Whether the id is non-empty and free of `:`, so it can be embedded
            /// in a colon-delimited storage key without ambiguity.
            pub fn is_key_safe(&self) -> bool {
                !self.0.is_empty() && !self.0.contains(':')
            }

            /// Consume into the raw identifier.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self(raw.to_string())
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self(raw)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(UserId);
string_id!(GroupId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_serialize_as_bare_strings() {
        let user = UserId::new("u1");
        assert_eq!(serde_json::to_string(&user).unwrap(), "\"u1\"");

        let group: GroupId = serde_json::from_str("\"g1\"").unwrap();
        assert_eq!(group.as_str(), "g1");
    }

    #[test]
    fn key_safety() {
        assert!(UserId::new("u1").is_key_safe());
        assert!(GroupId::new("team-alpha").is_key_safe());
        assert!(!UserId::new("").is_key_safe());
        assert!(!UserId::new("a:b").is_key_safe());
        assert!(!GroupId::new("team:alpha").is_key_safe());
    }
}
