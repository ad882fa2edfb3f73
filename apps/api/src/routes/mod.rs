//! HTTP route handlers for the Linkhoard API
//!
//! - `auth`: login, refresh, logout, logout-all, me
//! - `bookmarks`: bookmark placeholders and admin session revocation
//! - `health`: liveness and readiness probes
//!
//! [`build_app`] assembles the full application: versioned API routes under
//! `/api/v1`, health routes under `/health`, all wrapped in the security
//! pipeline.

pub mod auth;
pub mod bookmarks;
pub mod health;

use axum::{
    async_trait,
    extract::{FromRequest, Request},
    Json, Router,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::ApiError;
use crate::middleware::pipeline::{apply_security_pipeline, SecurityPipeline};
use crate::middleware::rate_limit::{RateLimitTier, RateLimiter, TierLimit};
use crate::services::{AuthService, HealthService};

pub use auth::auth_router;
pub use bookmarks::{admin_router, bookmarks_router};
pub use health::health_router;

/// Shared state handed to every router
#[derive(Clone)]
pub struct AppState {
    pub auth: AuthService,
    pub limiter: RateLimiter,
    pub health: HealthService,
}

impl AppState {
    pub fn new(auth: AuthService, limiter: RateLimiter, health: HealthService) -> Self {
        Self {
            auth,
            limiter,
            health,
        }
    }

    /// Route-level limiter state for `tier`
    pub fn tier(&self, tier: RateLimitTier) -> TierLimit {
        TierLimit::new(self.limiter.clone(), tier)
    }
}

/// Success envelope: `{ "success": true, "data": ... }`
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
        })
    }
}

/// JSON body extractor that rejects with the API error envelope
#[derive(Debug)]
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(request, state)
            .await
            .map_err(|rejection| ApiError::ValidationError(rejection.body_text()))?;
        Ok(Self(value))
    }
}

/// Every route of the API, without the security pipeline
pub fn api_routes(state: AppState) -> Router {
    let v1 = Router::new()
        .nest("/auth", auth_router(state.clone()))
        .nest("/bookmarks", bookmarks_router(state.clone()))
        .nest("/admin", admin_router(state.clone()));

    Router::new()
        .nest("/api/v1", v1)
        .nest("/health", health_router(state))
}

/// The served application: routes wrapped in the security pipeline
pub fn build_app(state: AppState, pipeline: SecurityPipeline) -> Router {
    apply_security_pipeline(api_routes(state), pipeline)
}
