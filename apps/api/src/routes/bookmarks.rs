//! Bookmark and admin routes
//!
//! Bookmark CRUD and summarization are served by other components; the
//! handlers here answer 501 behind the real admission layers so the gates
//! and tiers on these paths are live.
//!
//! - `GET /bookmarks` - optional auth
//! - `POST /bookmarks` - require auth
//! - `POST /bookmarks/:id/summarize` - require auth, strict tier
//! - `DELETE /admin/users/:id/sessions` - require admin

use axum::{
    extract::{rejection::PathRejection, Path, State},
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::middleware::auth::{
    auth_gate, require_permission, AuthGate, CurrentIdentity, MaybeIdentity,
};
use crate::middleware::rate_limit::{rate_limit, RateLimitTier};
use crate::models::permission::{Action, Resource};
use crate::routes::{ApiResponse, AppState};

pub fn bookmarks_router(state: AppState) -> Router {
    let tokens = state.auth.tokens().clone();

    let public = Router::new()
        .route("/", get(list_bookmarks))
        .route_layer(from_fn_with_state(
            AuthGate::optional_auth(tokens.clone()),
            auth_gate,
        ));

    let authenticated = Router::new()
        .route("/", post(create_bookmark))
        .route_layer(from_fn_with_state(
            AuthGate::require_auth(tokens.clone()),
            auth_gate,
        ));

    // Strict tier runs first, keyed by IP.
    let summarize = Router::new()
        .route("/:id/summarize", post(summarize_bookmark))
        .route_layer(from_fn_with_state(AuthGate::require_auth(tokens), auth_gate))
        .route_layer(from_fn_with_state(state.tier(RateLimitTier::Strict), rate_limit));

    Router::new()
        .merge(public)
        .merge(authenticated)
        .merge(summarize)
        .with_state(state)
}

pub fn admin_router(state: AppState) -> Router {
    let tokens = state.auth.tokens().clone();

    Router::new()
        .route("/users/:id/sessions", delete(revoke_user_sessions))
        .route_layer(from_fn_with_state(AuthGate::require_admin(tokens), auth_gate))
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokedSessions {
    pub user_id: Uuid,
    pub revoked: u64,
}

fn parse_id(path: Result<Path<Uuid>, PathRejection>) -> ApiResult<Uuid> {
    path.map(|Path(id)| id)
        .map_err(|rejection| ApiError::ValidationError(rejection.body_text()))
}

async fn list_bookmarks(MaybeIdentity(identity): MaybeIdentity) -> ApiResult<()> {
    if let Some(identity) = &identity {
        require_permission(identity, Resource::Bookmark, Action::Read)?;
    }
    Err(ApiError::NotImplemented("Listing bookmarks"))
}

async fn create_bookmark(CurrentIdentity(identity): CurrentIdentity) -> ApiResult<()> {
    require_permission(&identity, Resource::Bookmark, Action::Create)?;
    Err(ApiError::NotImplemented("Creating bookmarks"))
}

async fn summarize_bookmark(
    CurrentIdentity(identity): CurrentIdentity,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<()> {
    let bookmark_id = parse_id(path)?;
    require_permission(&identity, Resource::Bookmark, Action::Update)?;
    tracing::debug!(user_id = %identity.id, %bookmark_id, "Summarize requested");
    Err(ApiError::NotImplemented("Bookmark summarization"))
}

/// Revoke every refresh token of a user
async fn revoke_user_sessions(
    State(state): State<AppState>,
    CurrentIdentity(admin): CurrentIdentity,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<impl IntoResponse> {
    let user_id = parse_id(path)?;
    require_permission(&admin, Resource::User, Action::Manage)?;

    let revoked = state.auth.logout_all(user_id).await?;
    tracing::info!(admin_id = %admin.id, user_id = %user_id, revoked, "Admin revoked user sessions");

    Ok(ApiResponse::ok(RevokedSessions { user_id, revoked }))
}
