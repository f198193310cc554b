//! Connection authentication.
//!
//! Clients present a bearer token during the WebSocket handshake. The token is
//! an HS256 JWT issued by the user service with `user_id`, `username` and
//! `exp` claims. A connection that fails here never reaches the registry.

use courier_proto::UserId;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Authenticated identity bound to a connection.
///
/// The router stamps every outgoing message with this identity; client frames
/// cannot override it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    /// Stable user id
    pub user_id: UserId,
    /// Name shown to recipients (`from_user`)
    pub display_name: String,
}

impl Identity {
    /// Build an identity.
    pub fn new(user_id: impl Into<UserId>, display_name: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), display_name: display_name.into() }
    }
}

/// Authentication errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No token in the `Authorization` header or `token` query parameter
    #[error("missing bearer token")]
    MissingToken,

    /// Signature, expiry or format check failed
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// Token verified but a required claim is empty
    #[error("token claim {0} is empty")]
    EmptyClaim(&'static str),

    /// Token verified but a claim is not usable as an id
    #[error("token claim {0} is not a valid id")]
    InvalidClaim(&'static str),
}

/// Turns a bearer token into an [`Identity`].
pub trait Authenticator: Send + Sync + 'static {
    /// Verify `token` and return the identity it asserts.
    fn authenticate(&self, token: &str) -> Result<Identity, AuthError>;
}

/// JWT claims issued by the user service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub user_id: String,
    /// Username
    pub username: String,
    /// Expiry, seconds since the Unix epoch
    pub exp: u64,
}

/// HS256 shared-secret authenticator.
pub struct JwtAuthenticator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    /// Verify tokens signed with `secret`.
    pub fn new(secret: &[u8]) -> Self {
        let validation = Validation::new(Algorithm::HS256);
        Self { key: DecodingKey::from_secret(secret), validation }
    }

    /// Sign `claims` with `secret`.
    ///
    /// The relay itself never issues tokens; this exists for tooling and
    /// tests that need a token the relay will accept.
    pub fn issue(secret: &[u8], claims: &Claims) -> Result<String, AuthError> {
        let key = EncodingKey::from_secret(secret);
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &key)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }
}

impl Authenticator for JwtAuthenticator {
    fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        let claims = data.claims;

        if claims.user_id.is_empty() {
            return Err(AuthError::EmptyClaim("user_id"));
        }
        let user_id = UserId::new(claims.user_id);
        if !user_id.is_key_safe() {
            return Err(AuthError::InvalidClaim("user_id"));
        }
        let display_name =
            if claims.username.is_empty() { user_id.to_string() } else { claims.username };

        Ok(Identity::new(user_id, display_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret";
    // 2100-01-01T00:00:00Z
    const FAR_FUTURE: u64 = 4_102_444_800;

    fn claims(user_id: &str, username: &str, exp: u64) -> Claims {
        Claims { user_id: user_id.into(), username: username.into(), exp }
    }

    #[test]
    fn accepts_valid_token() {
        let token = JwtAuthenticator::issue(SECRET, &claims("u1", "alice", FAR_FUTURE)).unwrap();

        let identity = JwtAuthenticator::new(SECRET).authenticate(&token).unwrap();

        assert_eq!(identity, Identity::new("u1", "alice"));
    }

    #[test]
    fn rejects_wrong_secret() {
        let token = JwtAuthenticator::issue(b"other", &claims("u1", "alice", FAR_FUTURE)).unwrap();

        let result = JwtAuthenticator::new(SECRET).authenticate(&token);

        assert!(matches!(result, Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn rejects_expired_token() {
        let token = JwtAuthenticator::issue(SECRET, &claims("u1", "alice", 1_000)).unwrap();

        let result = JwtAuthenticator::new(SECRET).authenticate(&token);

        assert!(matches!(result, Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn rejects_empty_user_id() {
        let token = JwtAuthenticator::issue(SECRET, &claims("", "alice", FAR_FUTURE)).unwrap();

        let result = JwtAuthenticator::new(SECRET).authenticate(&token);

        assert_eq!(result, Err(AuthError::EmptyClaim("user_id")));
    }

    #[test]
    fn rejects_user_id_with_key_separator() {
        let token = JwtAuthenticator::issue(SECRET, &claims("a:b", "mallory", FAR_FUTURE)).unwrap();

        let result = JwtAuthenticator::new(SECRET).authenticate(&token);

        assert_eq!(result, Err(AuthError::InvalidClaim("user_id")));
    }

    #[test]
    fn falls_back_to_user_id_for_display() {
        let token = JwtAuthenticator::issue(SECRET, &claims("u9", "", FAR_FUTURE)).unwrap();

        let identity = JwtAuthenticator::new(SECRET).authenticate(&token).unwrap();

        assert_eq!(identity.display_name, "u9");
    }
}
