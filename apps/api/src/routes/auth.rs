//! Authentication REST route handlers
//!
//! Provides endpoints for the token lifecycle:
//! - `POST /auth/login` - Authenticate and get tokens (auth tier, per IP)
//! - `POST /auth/refresh` - Rotate a refresh token (auth tier, per IP)
//! - `POST /auth/logout` - Revoke one refresh token
//! - `POST /auth/logout-all` - Revoke every refresh token of the caller
//! - `GET /auth/me` - The caller's identity

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, State},
    http::HeaderMap,
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::middleware::auth::{auth_gate, AuthGate, CurrentIdentity};
use crate::middleware::rate_limit::{extract_client_ip, rate_limit, RateLimitTier};
use crate::models::identity::Role;
use crate::models::token::{AuthTokens, DeviceInfo};
use crate::models::user::User;
use crate::routes::{ApiJson, ApiResponse, AppState};

/// Create authentication router
///
/// # Rate Limits
/// - `/login`, `/refresh`: auth tier (5 per hour per IP)
/// - `/logout-all`, `/me`: authenticated tier, keyed by user
pub fn auth_router(state: AppState) -> Router {
    let tokens = state.auth.tokens().clone();

    let credential_routes = Router::new()
        .route("/login", post(login))
        .route("/refresh", post(refresh))
        .route_layer(from_fn_with_state(state.tier(RateLimitTier::Auth), rate_limit));

    // The gate is added last so it runs before the user-keyed limiter.
    let session_routes = Router::new()
        .route("/logout-all", post(logout_all))
        .route("/me", get(me))
        .route_layer(from_fn_with_state(
            state.tier(RateLimitTier::Authenticated),
            rate_limit,
        ))
        .route_layer(from_fn_with_state(AuthGate::require_auth(tokens), auth_gate));

    Router::new()
        .merge(credential_routes)
        .merge(session_routes)
        .route("/logout", post(logout))
        .with_state(state)
}

// ========== Request/Response Types ==========

/// Login request body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub device_info: Option<DeviceInfo>,
}

/// Body of refresh and logout requests
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// User response (safe to return to client)
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub role: Role,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            username: user.username,
            role: user.role,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user: UserResponse,
    pub tokens: AuthTokens,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct LogoutAllResponse {
    pub revoked: u64,
}

/// Client address as a string, if one could be determined
fn client_ip(headers: &HeaderMap, connect_info: Option<&ConnectInfo<SocketAddr>>) -> Option<String> {
    Some(extract_client_ip(headers, connect_info)).filter(|ip| ip != "unknown")
}

// ========== Route Handlers ==========

/// Login with email and password
///
/// # Response
/// - 200 OK: `{ user, tokens }`
/// - 401 Unauthorized: Invalid credentials or inactive account
async fn login(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    ApiJson(request): ApiJson<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let ip = client_ip(&headers, connect_info.as_ref());

    let (user, tokens) = state
        .auth
        .login(
            &request.email.trim().to_lowercase(),
            &request.password,
            request.device_info,
            ip.as_deref(),
        )
        .await?;

    Ok(ApiResponse::ok(LoginResponse {
        user: user.into(),
        tokens,
    }))
}

/// Exchange a refresh token for a new pair
///
/// # Response
/// - 200 OK: `{ accessToken, refreshToken, expiresIn, tokenType }`
/// - 401 Unauthorized: Invalid, expired, revoked or already rotated token
async fn refresh(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    ApiJson(request): ApiJson<RefreshRequest>,
) -> ApiResult<impl IntoResponse> {
    let ip = client_ip(&headers, connect_info.as_ref());
    let tokens = state.auth.refresh(&request.refresh_token, ip.as_deref()).await?;
    Ok(ApiResponse::ok(tokens))
}

/// Revoke the given refresh token; succeeds even if it was already revoked
async fn logout(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<RefreshRequest>,
) -> ApiResult<impl IntoResponse> {
    state.auth.logout(&request.refresh_token).await?;
    Ok(ApiResponse::ok(LogoutResponse {
        message: "Logged out successfully",
    }))
}

/// Revoke every refresh token of the authenticated user
async fn logout_all(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
) -> ApiResult<impl IntoResponse> {
    let revoked = state.auth.logout_all(identity.id).await?;
    Ok(ApiResponse::ok(LogoutAllResponse { revoked }))
}

async fn me(CurrentIdentity(identity): CurrentIdentity) -> impl IntoResponse {
    ApiResponse::ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_user_response_from_user() {
        let user = User {
            id: Uuid::new_v4(),
            email: "test@example.com".to_string(),
            username: "tester".to_string(),
            password_hash: "hash".to_string(),
            role: Role::Moderator,
            is_active: true,
            created_at: Utc::now(),
        };

        let json = serde_json::to_value(UserResponse::from(user)).unwrap();
        assert_eq!(json["email"], "test@example.com");
        assert_eq!(json["username"], "tester");
        assert_eq!(json["role"], "moderator");
        assert!(json.get("passwordHash").is_none());
    }

    #[test]
    fn test_login_request_accepts_device_info() {
        let request: LoginRequest = serde_json::from_value(serde_json::json!({
            "email": "ada@example.com",
            "password": "hunter22",
            "deviceInfo": { "deviceName": "Firefox on Linux" }
        }))
        .unwrap();
        assert_eq!(
            request.device_info.unwrap().device_name.as_deref(),
            Some("Firefox on Linux")
        );
    }

    #[test]
    fn test_client_ip_drops_unknown() {
        assert_eq!(client_ip(&HeaderMap::new(), None), None);

        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "198.51.100.4".parse().unwrap());
        assert_eq!(client_ip(&headers, None).as_deref(), Some("198.51.100.4"));
    }
}
