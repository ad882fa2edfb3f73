//! Bearer-token authentication gate
//!
//! [`auth_gate`] verifies the access token in `Authorization: Bearer <token>`
//! and stores the resulting [`Identity`] in the request extensions. An
//! absent credential is acceptable on optional routes; a present but
//! invalid one never is.
//!
//! # Usage
//!
//! ```rust,ignore
//! use axum::middleware::from_fn_with_state;
//!
//! let admin_routes = Router::new()
//!     .route("/admin/users/:id/sessions", delete(revoke_sessions))
//!     .route_layer(from_fn_with_state(AuthGate::require_admin(tokens), auth_gate));
//!
//! async fn revoke_sessions(CurrentIdentity(admin): CurrentIdentity) -> impl IntoResponse {
//!     format!("revoked by {}", admin.id)
//! }
//! ```

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::{ApiError, ApiResult};
use crate::models::identity::{Identity, Role};
use crate::models::permission::{has_permission, Action, Resource};
use crate::models::token::TokenKind;
use crate::services::token::TokenService;

/// What a route demands of the caller
#[derive(Debug, Clone)]
pub struct AuthGateConfig {
    /// Admit requests without a credential
    pub optional: bool,
    /// Roles allowed through; `None` admits any authenticated role
    pub roles: Option<Vec<Role>>,
    /// Message for 401 responses when no credential was sent
    pub error_message: String,
}

impl Default for AuthGateConfig {
    fn default() -> Self {
        Self {
            optional: false,
            roles: None,
            error_message: "Authentication required".to_string(),
        }
    }
}

impl AuthGateConfig {
    pub fn with_roles(mut self, roles: impl IntoIterator<Item = Role>) -> Self {
        self.roles = Some(roles.into_iter().collect());
        self
    }

    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = message.into();
        self
    }
}

/// Middleware state: token verifier plus route requirements
#[derive(Clone)]
pub struct AuthGate {
    tokens: TokenService,
    config: Arc<AuthGateConfig>,
}

impl AuthGate {
    pub fn new(tokens: TokenService, config: AuthGateConfig) -> Self {
        Self {
            tokens,
            config: Arc::new(config),
        }
    }

    /// Any authenticated caller
    pub fn require_auth(tokens: TokenService) -> Self {
        Self::new(tokens, AuthGateConfig::default())
    }

    /// Authenticated or anonymous; invalid credentials are still rejected
    pub fn optional_auth(tokens: TokenService) -> Self {
        Self::new(
            tokens,
            AuthGateConfig {
                optional: true,
                ..AuthGateConfig::default()
            },
        )
    }

    pub fn require_admin(tokens: TokenService) -> Self {
        Self::new(
            tokens,
            AuthGateConfig::default()
                .with_roles([Role::Admin])
                .with_error_message("Admin access required"),
        )
    }

    pub fn require_moderator(tokens: TokenService) -> Self {
        Self::new(
            tokens,
            AuthGateConfig::default()
                .with_roles([Role::Admin, Role::Moderator])
                .with_error_message("Moderator access required"),
        )
    }

    pub fn config(&self) -> &AuthGateConfig {
        &self.config
    }

    /// Resolve the caller's identity from the request headers
    ///
    /// `Ok(None)` only for a missing credential on an optional route.
    pub fn authenticate(&self, headers: &HeaderMap) -> ApiResult<Option<Identity>> {
        let Some(token) = extract_bearer_token(headers) else {
            if self.config.optional {
                return Ok(None);
            }
            return Err(ApiError::Unauthenticated(self.config.error_message.clone()));
        };

        let claims = self.tokens.verify(token, TokenKind::Access).map_err(|e| {
            tracing::debug!(error = %e, "Access token rejected");
            ApiError::from(e)
        })?;

        Ok(Some(Identity::from(claims)))
    }

    /// Apply the role filter to an authenticated identity
    pub fn authorize(&self, identity: &Identity) -> ApiResult<()> {
        match &self.config.roles {
            Some(roles) if !roles.contains(&identity.role) => {
                tracing::warn!(
                    user_id = %identity.id,
                    role = %identity.role,
                    "Access denied: role not permitted"
                );
                let message = if self.config.error_message == AuthGateConfig::default().error_message
                {
                    "Insufficient permissions".to_string()
                } else {
                    self.config.error_message.clone()
                };
                Err(ApiError::Forbidden(message))
            }
            _ => Ok(()),
        }
    }
}

/// Extract the bearer token from the Authorization header
///
/// The scheme is matched case-insensitively and the value must consist of
/// exactly two parts; anything else counts as no credential.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let mut parts = value.split_whitespace();
    let (scheme, token) = (parts.next()?, parts.next()?);

    if parts.next().is_some() || !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token)
}

/// Authentication middleware
///
/// Use with `axum::middleware::from_fn_with_state(gate, auth_gate)`.
pub async fn auth_gate(State(gate): State<AuthGate>, mut request: Request, next: Next) -> Response {
    let identity = match gate.authenticate(request.headers()) {
        Ok(Some(identity)) => identity,
        Ok(None) => return next.run(request).await,
        Err(e) => return e.into_response(),
    };

    let verdict = gate.authorize(&identity);
    request.extensions_mut().insert(identity);

    match verdict {
        Ok(()) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}

/// Fail with 403 unless the identity may perform `action` on `resource`
pub fn require_permission(identity: &Identity, resource: Resource, action: Action) -> ApiResult<()> {
    if has_permission(identity, resource, action) {
        Ok(())
    } else {
        tracing::warn!(
            user_id = %identity.id,
            ?resource,
            ?action,
            "Access denied by role policy"
        );
        Err(ApiError::Forbidden("Insufficient permissions".to_string()))
    }
}

/// Identity attached by [`auth_gate`]; rejects with 401 when absent
#[derive(Debug, Clone)]
pub struct CurrentIdentity(pub Identity);

/// Identity attached by [`auth_gate`], if any
#[derive(Debug, Clone)]
pub struct MaybeIdentity(pub Option<Identity>);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentIdentity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .map(CurrentIdentity)
            .ok_or_else(|| ApiError::Unauthenticated("Authentication required".to_string()))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for MaybeIdentity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeIdentity(parts.extensions.get::<Identity>().cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::token::TokenConfig;
    use axum::{
        body::Body,
        http::{HeaderValue, Request as HttpRequest, StatusCode},
        middleware::from_fn_with_state,
        routing::get,
        Router,
    };
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::models::token::TokenClaims;

    const ACCESS_SECRET: &str = "access-secret-for-gate-tests-0000000000";

    fn tokens() -> TokenService {
        TokenService::new(TokenConfig::new(
            ACCESS_SECRET,
            "refresh-secret-for-gate-tests-111111111",
        ))
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

    fn expired_token(tokens: &TokenService) -> String {
        let now = Utc::now().timestamp();
        let claims = TokenClaims {
            sub: Uuid::new_v4(),
            name: "grace".to_string(),
            email: "grace@example.com".to_string(),
            role: Role::User,
            typ: TokenKind::Access,
            iat: now - 1000,
            exp: now - 100,
            iss: tokens.config().issuer.clone(),
            aud: tokens.config().audience.clone(),
            jti: Uuid::new_v4(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(ACCESS_SECRET.as_bytes()),
        )
        .unwrap()
    }

    async fn whoami(MaybeIdentity(identity): MaybeIdentity) -> String {
        identity.map(|i| i.role.to_string()).unwrap_or_else(|| "anonymous".to_string())
    }

    fn app(gate: AuthGate) -> Router {
        Router::new()
            .route("/", get(whoami))
            .layer(from_fn_with_state(gate, auth_gate))
    }

    async fn call(gate: AuthGate, authorization: Option<String>) -> (StatusCode, String) {
        let mut builder = HttpRequest::builder().uri("/");
        if let Some(value) = authorization {
            builder = builder.header(AUTHORIZATION, value);
        }
        let response = app(gate)
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test]
    fn test_extract_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(extract_bearer_token(&headers), Some("abc.def.ghi"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer abc"));
        assert_eq!(extract_bearer_token(&headers), Some("abc"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer"));
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer a b"));
        assert_eq!(extract_bearer_token(&headers), None);
    }

    #[tokio::test]
    async fn test_no_token_optional_vs_required() {
        let (status, body) = call(AuthGate::optional_auth(tokens()), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "anonymous");

        let (status, _) = call(AuthGate::require_auth(tokens()), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_valid_token_attaches_identity() {
        let tokens = tokens();
        let token = tokens.issue_access(&identity(Role::Moderator)).unwrap();
        let (status, body) = call(
            AuthGate::optional_auth(tokens.clone()),
            Some(format!("Bearer {token}")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "moderator");
    }

    #[tokio::test]
    async fn test_expired_token_rejected_even_when_optional() {
        let tokens = tokens();
        let token = expired_token(&tokens);
        for gate in [AuthGate::optional_auth(tokens.clone()), AuthGate::require_auth(tokens.clone())] {
            let (status, body) = call(gate, Some(format!("Bearer {token}"))).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert!(body.contains("Authentication Error"));
        }
    }

    #[tokio::test]
    async fn test_refresh_token_rejected_as_credential() {
        let tokens = tokens();
        let token = tokens.issue_refresh(&identity(Role::Admin)).unwrap();
        let (status, _) = call(
            AuthGate::optional_auth(tokens.clone()),
            Some(format!("Bearer {token}")),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_role_enforcement() {
        let tokens = tokens();
        let user_token = tokens.issue_access(&identity(Role::User)).unwrap();
        let moderator_token = tokens.issue_access(&identity(Role::Moderator)).unwrap();
        let admin_token = tokens.issue_access(&identity(Role::Admin)).unwrap();

        let (status, body) = call(
            AuthGate::require_admin(tokens.clone()),
            Some(format!("Bearer {user_token}")),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body.contains("Authorization Error"));

        let (status, _) = call(
            AuthGate::require_admin(tokens.clone()),
            Some(format!("Bearer {admin_token}")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(
            AuthGate::require_moderator(tokens.clone()),
            Some(format!("Bearer {moderator_token}")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(
            AuthGate::require_moderator(tokens.clone()),
            Some(format!("Bearer {user_token}")),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_require_permission() {
        assert!(require_permission(&identity(Role::User), Resource::Bookmark, Action::Delete).is_ok());
        assert!(matches!(
            require_permission(&identity(Role::Moderator), Resource::Bookmark, Action::Delete),
            Err(ApiError::Forbidden(_))
        ));
        assert!(require_permission(&identity(Role::Admin), Resource::System, Action::Manage).is_ok());
    }
}
