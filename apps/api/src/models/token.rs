//! Token claims, refresh-token records and token responses

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::identity::Role;

/// Discriminates short-lived access tokens from long-lived refresh tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Access => write!(f, "access"),
            Self::Refresh => write!(f, "refresh"),
        }
    }
}

/// JWT claims payload shared by both token kinds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject (user ID)
    pub sub: Uuid,

    /// Display name
    pub name: String,

    /// User's email
    pub email: String,

    /// User's role
    pub role: Role,

    /// Token kind
    pub typ: TokenKind,

    /// Issued at timestamp (Unix epoch)
    pub iat: i64,

    /// Expiration timestamp (Unix epoch)
    pub exp: i64,

    /// Issuer
    pub iss: String,

    /// Audience
    pub aud: String,

    /// Unique token id; makes every issued token string distinct
    pub jti: Uuid,
}

/// Optional client device metadata recorded with a refresh token
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Human-readable device name (e.g., "Firefox on Linux")
    pub device_name: Option<String>,

    /// Client user agent string
    pub user_agent: Option<String>,
}

/// Stored refresh token
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct RefreshTokenRecord {
    pub id: Uuid,

    /// Owning user
    pub user_id: Uuid,

    /// SHA-256 of the opaque token string
    pub token_hash: String,

    pub expires_at: DateTime<Utc>,

    pub created_at: DateTime<Utc>,

    /// Revocation is terminal
    pub revoked: bool,

    pub revoked_at: Option<DateTime<Utc>>,

    pub device_name: Option<String>,

    pub user_agent: Option<String>,

    pub ip_address: Option<String>,
}

impl RefreshTokenRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Neither revoked nor expired
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.is_expired_at(now)
    }
}

/// Token pair returned by login and refresh
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokens {
    /// JWT access token for API authentication
    pub access_token: String,

    /// Refresh token for obtaining a new pair
    pub refresh_token: String,

    /// Access token lifetime in seconds
    pub expires_in: u64,

    /// Token type (always "Bearer")
    pub token_type: &'static str,
}

impl AuthTokens {
    pub fn new(access_token: String, refresh_token: String, expires_in: u64) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_in,
            token_type: "Bearer",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(expires_in: Duration, revoked: bool) -> RefreshTokenRecord {
        let now = Utc::now();
        RefreshTokenRecord {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            token_hash: "hash".to_string(),
            expires_at: now + expires_in,
            created_at: now,
            revoked,
            revoked_at: None,
            device_name: None,
            user_agent: None,
            ip_address: None,
        }
    }

    #[test]
    fn test_token_kind_serialization() {
        assert_eq!(serde_json::to_string(&TokenKind::Access).unwrap(), "\"access\"");
        assert_eq!(TokenKind::Refresh.to_string(), "refresh");
    }

    #[test]
    fn test_record_liveness() {
        let now = Utc::now();
        assert!(record(Duration::hours(1), false).is_live_at(now));
        assert!(!record(Duration::hours(1), true).is_live_at(now));
        assert!(!record(Duration::seconds(-1), false).is_live_at(now));
    }

    #[test]
    fn test_auth_tokens_serialize_camel_case() {
        let tokens = AuthTokens::new("a".into(), "r".into(), 900);
        let json = serde_json::to_value(&tokens).unwrap();
        assert_eq!(json["accessToken"], "a");
        assert_eq!(json["refreshToken"], "r");
        assert_eq!(json["expiresIn"], 900);
        assert_eq!(json["tokenType"], "Bearer");
    }
}
