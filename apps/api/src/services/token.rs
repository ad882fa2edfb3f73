//! Access and refresh token codec
//!
//! Access and refresh tokens are signed with different secrets, and
//! verification always names the kind it expects, so a leaked refresh
//! secret cannot mint access tokens and a refresh token is never accepted
//! as an access token (or the other way round).

use std::sync::Arc;

use chrono::Utc;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use thiserror::Error;
use uuid::Uuid;

use crate::models::identity::Identity;
use crate::models::token::{TokenClaims, TokenKind};

const DEFAULT_ACCESS_TTL_SECS: i64 = 15 * 60;
const DEFAULT_REFRESH_TTL_SECS: i64 = 7 * 24 * 3600;

/// Token verification failures
#[derive(Error, Debug)]
pub enum TokenError {
    /// Bad signature, issuer, audience or format
    #[error("{0}")]
    Invalid(String),

    #[error("token has expired")]
    Expired,

    #[error("expected {expected} token, got {actual} token")]
    WrongKind {
        expected: TokenKind,
        actual: TokenKind,
    },

    /// Encoding failed while issuing
    #[error("failed to sign token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),
}

/// Token codec configuration, read once at startup
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// Secret for access tokens
    pub access_secret: String,
    /// Secret for refresh tokens; must differ from `access_secret`
    pub refresh_secret: String,
    /// Access token TTL in seconds (default: 15 minutes)
    pub access_ttl_secs: i64,
    /// Refresh token TTL in seconds (default: 7 days)
    pub refresh_ttl_secs: i64,
    pub issuer: String,
    pub audience: String,
}

impl TokenConfig {
    /// Create a config with default TTLs, issuer and audience
    pub fn new(access_secret: impl Into<String>, refresh_secret: impl Into<String>) -> Self {
        Self {
            access_secret: access_secret.into(),
            refresh_secret: refresh_secret.into(),
            access_ttl_secs: DEFAULT_ACCESS_TTL_SECS,
            refresh_ttl_secs: DEFAULT_REFRESH_TTL_SECS,
            issuer: "linkhoard-api".to_string(),
            audience: "linkhoard-client".to_string(),
        }
    }

    /// Set TTLs from expiry strings (e.g., "15m", "7d"); invalid strings keep the defaults
    pub fn with_expiry_strings(mut self, access_expiry: &str, refresh_expiry: &str) -> Self {
        self.access_ttl_secs = parse_duration_string(access_expiry).unwrap_or(DEFAULT_ACCESS_TTL_SECS);
        self.refresh_ttl_secs =
            parse_duration_string(refresh_expiry).unwrap_or(DEFAULT_REFRESH_TTL_SECS);
        self
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = audience.into();
        self
    }
}

/// Parse duration strings like "15m", "7d", "24h" to seconds
pub fn parse_duration_string(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() || !s.is_ascii() {
        return None;
    }

    let (num_str, unit) = s.split_at(s.len() - 1);
    let num: i64 = num_str.parse().ok().filter(|n| *n > 0)?;

    let unit_secs: i64 = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 24 * 3600,
        "w" => 7 * 24 * 3600,
        _ => return None,
    };
    num.checked_mul(unit_secs)
}

struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl KeyPair {
    fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

/// Signs, verifies and inspects tokens. Stateless; cheap to clone.
#[derive(Clone)]
pub struct TokenService {
    config: Arc<TokenConfig>,
    access_keys: Arc<KeyPair>,
    refresh_keys: Arc<KeyPair>,
    validation: Arc<Validation>,
    introspection: Arc<Validation>,
}

impl TokenService {
    pub fn new(config: TokenConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&config.issuer]);
        validation.set_audience(&[&config.audience]);
        validation.set_required_spec_claims(&["exp", "iat", "iss", "aud", "sub"]);
        validation.leeway = 0;

        let mut introspection = Validation::new(Algorithm::HS256);
        introspection.insecure_disable_signature_validation();
        introspection.validate_exp = false;
        introspection.validate_aud = false;
        introspection.required_spec_claims.clear();

        Self {
            access_keys: Arc::new(KeyPair::from_secret(&config.access_secret)),
            refresh_keys: Arc::new(KeyPair::from_secret(&config.refresh_secret)),
            config: Arc::new(config),
            validation: Arc::new(validation),
            introspection: Arc::new(introspection),
        }
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    pub fn access_ttl_secs(&self) -> i64 {
        self.config.access_ttl_secs
    }

    pub fn refresh_ttl_secs(&self) -> i64 {
        self.config.refresh_ttl_secs
    }

    /// Issue a short-lived access token
    pub fn issue_access(&self, identity: &Identity) -> Result<String, TokenError> {
        self.issue(identity, TokenKind::Access)
    }

    /// Issue a long-lived refresh token, signed with the refresh secret
    pub fn issue_refresh(&self, identity: &Identity) -> Result<String, TokenError> {
        self.issue(identity, TokenKind::Refresh)
    }

    fn issue(&self, identity: &Identity, kind: TokenKind) -> Result<String, TokenError> {
        let now = Utc::now().timestamp();
        let ttl = match kind {
            TokenKind::Access => self.config.access_ttl_secs,
            TokenKind::Refresh => self.config.refresh_ttl_secs,
        };

        let claims = TokenClaims {
            sub: identity.id,
            name: identity.username.clone(),
            email: identity.email.clone(),
            role: identity.role,
            typ: kind,
            iat: now,
            exp: now.saturating_add(ttl),
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
            jti: Uuid::new_v4(),
        };

        encode(&Header::default(), &claims, &self.keys(kind).encoding).map_err(TokenError::Signing)
    }

    /// Verify signature, issuer, audience, expiry and kind
    ///
    /// The signature is checked with the secret of the kind the token
    /// claims to be, so a forged token fails as [`TokenError::Invalid`]
    /// and a genuine token of the other kind fails as
    /// [`TokenError::WrongKind`].
    pub fn verify(&self, token: &str, expected: TokenKind) -> Result<TokenClaims, TokenError> {
        let claimed = self
            .decode_unsafe(token)
            .ok_or_else(|| TokenError::Invalid("malformed token".to_string()))?;

        let data = decode::<TokenClaims>(token, &self.keys(claimed.typ).decoding, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => {
                    tracing::debug!(error = %e, kind = %claimed.typ, "Token verification failed");
                    TokenError::Invalid(e.to_string())
                }
            })?;

        if data.claims.typ != expected {
            return Err(TokenError::WrongKind {
                expected,
                actual: data.claims.typ,
            });
        }

        Ok(data.claims)
    }

    /// Decode claims without checking the signature or expiry.
    ///
    /// For introspection only (e.g. "expiring soon" hints); never use the
    /// result for an authorization decision.
    pub fn decode_unsafe(&self, token: &str) -> Option<TokenClaims> {
        decode::<TokenClaims>(token, &DecodingKey::from_secret(&[]), &self.introspection)
            .ok()
            .map(|data| data.claims)
    }

    /// Seconds until expiry, 0 for expired or unparseable tokens
    pub fn remaining_seconds(&self, token: &str) -> u64 {
        self.decode_unsafe(token)
            .map(|claims| (claims.exp - Utc::now().timestamp()).max(0) as u64)
            .unwrap_or(0)
    }

    fn keys(&self, kind: TokenKind) -> &KeyPair {
        match kind {
            TokenKind::Access => &self.access_keys,
            TokenKind::Refresh => &self.refresh_keys,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::identity::Role;
    use assert_matches::assert_matches;

    const ACCESS_SECRET: &str = "access-secret-for-unit-tests-0123456789";
    const REFRESH_SECRET: &str = "refresh-secret-for-unit-tests-987654321";

    fn service() -> TokenService {
        TokenService::new(TokenConfig::new(ACCESS_SECRET, REFRESH_SECRET))
    }

    fn identity(role: Role) -> Identity {
        Identity {
            id: Uuid::new_v4(),
            username: "grace".to_string(),
            email: "grace@example.com".to_string(),
            role,
            is_active: true,
        }
    }

    /// Sign arbitrary claims with the given secret
    fn sign(claims: &TokenClaims, secret: &str) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims_for(service: &TokenService, kind: TokenKind, exp_offset: i64) -> TokenClaims {
        let now = Utc::now().timestamp();
        TokenClaims {
            sub: Uuid::new_v4(),
            name: "grace".to_string(),
            email: "grace@example.com".to_string(),
            role: Role::User,
            typ: kind,
            iat: now - 3600,
            exp: now + exp_offset,
            iss: service.config().issuer.clone(),
            aud: service.config().audience.clone(),
            jti: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_parse_duration_string() {
        assert_eq!(parse_duration_string("15m"), Some(900));
        assert_eq!(parse_duration_string("7d"), Some(604800));
        assert_eq!(parse_duration_string("24h"), Some(86400));
        assert_eq!(parse_duration_string("30s"), Some(30));
        assert_eq!(parse_duration_string("1w"), Some(604800));
        assert_eq!(parse_duration_string(""), None);
        assert_eq!(parse_duration_string("invalid"), None);
        assert_eq!(parse_duration_string("15x"), None);
        assert_eq!(parse_duration_string("-5m"), None);
        assert_eq!(parse_duration_string("999999999999999999d"), None);
        assert_eq!(parse_duration_string("9223372036854775807w"), None);
        assert_eq!(
            parse_duration_string("9223372036854775807s"),
            Some(i64::MAX)
        );
    }

    #[test]
    fn test_oversized_expiry_falls_back_to_default() {
        let config = TokenConfig::new("a", "b")
            .with_expiry_strings("999999999999999999d", "99999999999999999999w");
        assert_eq!(config.access_ttl_secs, DEFAULT_ACCESS_TTL_SECS);
        assert_eq!(config.refresh_ttl_secs, DEFAULT_REFRESH_TTL_SECS);
    }

    #[test]
    fn test_config_with_expiry_strings() {
        let config = TokenConfig::new("a", "b").with_expiry_strings("30m", "14d");
        assert_eq!(config.access_ttl_secs, 30 * 60);
        assert_eq!(config.refresh_ttl_secs, 14 * 24 * 3600);

        let config = TokenConfig::new("a", "b").with_expiry_strings("soon", "later");
        assert_eq!(config.access_ttl_secs, DEFAULT_ACCESS_TTL_SECS);
        assert_eq!(config.refresh_ttl_secs, DEFAULT_REFRESH_TTL_SECS);
    }

    #[test]
    fn test_issue_with_maximal_ttl_saturates_expiry() {
        let mut config = TokenConfig::new(ACCESS_SECRET, REFRESH_SECRET);
        config.access_ttl_secs = i64::MAX;
        let service = TokenService::new(config);

        let token = service.issue_access(&identity(Role::User)).unwrap();
        let claims = service.decode_unsafe(&token).unwrap();
        assert_eq!(claims.exp, i64::MAX);
    }

    #[test]
    fn test_access_round_trip_preserves_subject_and_role() {
        let service = service();
        for role in [Role::User, Role::Moderator, Role::Admin] {
            let identity = identity(role);
            let token = service.issue_access(&identity).unwrap();
            let claims = service.verify(&token, TokenKind::Access).unwrap();
            assert_eq!(claims.sub, identity.id);
            assert_eq!(claims.role, role);
            assert_eq!(claims.typ, TokenKind::Access);
        }
    }

    #[test]
    fn test_access_token_rejected_as_refresh() {
        let service = service();
        let token = service.issue_access(&identity(Role::User)).unwrap();
        assert_matches!(
            service.verify(&token, TokenKind::Refresh),
            Err(TokenError::WrongKind {
                expected: TokenKind::Refresh,
                actual: TokenKind::Access
            })
        );
    }

    #[test]
    fn test_refresh_token_rejected_as_access() {
        let service = service();
        let token = service.issue_refresh(&identity(Role::Admin)).unwrap();
        assert_matches!(
            service.verify(&token, TokenKind::Access),
            Err(TokenError::WrongKind { .. })
        );
        assert!(service.verify(&token, TokenKind::Refresh).is_ok());
    }

    #[test]
    fn test_refresh_kind_signed_with_access_secret_is_invalid() {
        let service = service();
        let forged = sign(&claims_for(&service, TokenKind::Refresh, 600), ACCESS_SECRET);
        assert_matches!(
            service.verify(&forged, TokenKind::Refresh),
            Err(TokenError::Invalid(_))
        );
    }

    #[test]
    fn test_expired_token() {
        let service = service();
        let expired = sign(&claims_for(&service, TokenKind::Access, -10), ACCESS_SECRET);
        assert_matches!(
            service.verify(&expired, TokenKind::Access),
            Err(TokenError::Expired)
        );
        assert_eq!(service.remaining_seconds(&expired), 0);
    }

    #[test]
    fn test_issuer_and_audience_mismatch() {
        let service = service();

        let mut claims = claims_for(&service, TokenKind::Access, 600);
        claims.iss = "someone-else".to_string();
        assert_matches!(
            service.verify(&sign(&claims, ACCESS_SECRET), TokenKind::Access),
            Err(TokenError::Invalid(_))
        );

        let mut claims = claims_for(&service, TokenKind::Access, 600);
        claims.aud = "another-client".to_string();
        assert_matches!(
            service.verify(&sign(&claims, ACCESS_SECRET), TokenKind::Access),
            Err(TokenError::Invalid(_))
        );
    }

    #[test]
    fn test_malformed_token() {
        let service = service();
        assert_matches!(
            service.verify("not-a-jwt", TokenKind::Access),
            Err(TokenError::Invalid(_))
        );
        assert!(service.decode_unsafe("not-a-jwt").is_none());
        assert_eq!(service.remaining_seconds("not-a-jwt"), 0);
    }

    #[test]
    fn test_remaining_seconds_right_after_issuance() {
        let service = service();
        let token = service.issue_access(&identity(Role::User)).unwrap();
        let remaining = service.remaining_seconds(&token);
        let ttl = service.access_ttl_secs() as u64;
        assert!(remaining <= ttl);
        assert!(remaining >= ttl - 2);
    }

    #[test]
    fn test_decode_unsafe_ignores_signature() {
        let service = service();
        let foreign = sign(&claims_for(&service, TokenKind::Access, 600), "some-other-secret");
        let claims = service.decode_unsafe(&foreign).unwrap();
        assert_eq!(claims.typ, TokenKind::Access);
        assert!(service.verify(&foreign, TokenKind::Access).is_err());
    }

    #[test]
    fn test_tokens_are_unique() {
        let service = service();
        let identity = identity(Role::User);
        let first = service.issue_refresh(&identity).unwrap();
        let second = service.issue_refresh(&identity).unwrap();
        assert_ne!(first, second);
    }
}
