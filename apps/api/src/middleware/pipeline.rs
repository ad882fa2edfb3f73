//! Security pipeline composition
//!
//! Every router served by the API goes through [`apply_security_pipeline`],
//! which wraps it in the admission layers in a fixed order (outermost
//! first):
//!
//! 1. request id
//! 2. security headers
//! 3. request tracing
//! 4. default-tier rate limit
//! 5. CORS
//! 6. CSRF origin check
//! 7. body size cap
//!
//! Route-level tiers and auth gates sit inside this stack and are attached
//! by the routers themselves.

use std::time::Duration;

use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method, Request},
    middleware::from_fn_with_state,
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::Span;

use super::body_limit::{enforce_body_limit, BodyLimit};
use super::csrf::{csrf_protection, CsrfConfig};
use super::rate_limit::{
    rate_limit, RateLimitTier, RateLimiter, TierLimit, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING,
    X_RATELIMIT_RESET,
};
use super::request_id::{request_id, RequestId, RequestIdConfig, X_REQUEST_ID};
use super::security_headers::{security_headers, SecurityHeadersConfig};

/// Everything the pipeline layers need, built once at startup
#[derive(Clone)]
pub struct SecurityPipeline {
    pub request_id: RequestIdConfig,
    pub security_headers: SecurityHeadersConfig,
    pub limiter: RateLimiter,
    pub allowed_origins: Vec<String>,
    pub body_limit: BodyLimit,
}

impl SecurityPipeline {
    pub fn new(limiter: RateLimiter, allowed_origins: Vec<String>) -> Self {
        Self {
            request_id: RequestIdConfig::default(),
            security_headers: SecurityHeadersConfig::default(),
            limiter,
            allowed_origins,
            body_limit: BodyLimit::default(),
        }
    }

    pub fn with_request_id(mut self, config: RequestIdConfig) -> Self {
        self.request_id = config;
        self
    }

    pub fn with_security_headers(mut self, config: SecurityHeadersConfig) -> Self {
        self.security_headers = config;
        self
    }

    pub fn with_body_limit(mut self, body_limit: BodyLimit) -> Self {
        self.body_limit = body_limit;
        self
    }
}

/// Build the CORS layer for the configured origin allow-list
///
/// An empty list yields a layer that answers no cross-origin request.
pub fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            origin.trim_end_matches('/').parse().ok().or_else(|| {
                tracing::warn!("Invalid CORS origin '{}', skipping", origin);
                None
            })
        })
        .collect();

    if allowed.is_empty() {
        tracing::warn!("No CORS origins configured, cross-origin requests will be rejected");
        return CorsLayer::new();
    }

    tracing::info!(
        "CORS configured with {} allowed origin(s): {:?}",
        allowed.len(),
        origins
    );

    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::ORIGIN,
            X_REQUEST_ID.clone(),
        ])
        .expose_headers([
            X_RATELIMIT_LIMIT.clone(),
            X_RATELIMIT_REMAINING.clone(),
            X_RATELIMIT_RESET.clone(),
            X_REQUEST_ID.clone(),
            header::RETRY_AFTER,
        ])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600))
}

/// Wrap `router` in the admission layers
pub fn apply_security_pipeline(router: Router, pipeline: SecurityPipeline) -> Router {
    let SecurityPipeline {
        request_id: request_id_config,
        security_headers: headers_config,
        limiter,
        allowed_origins,
        body_limit,
    } = pipeline;

    let trace = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<Body>| {
            let request_id = request
                .extensions()
                .get::<RequestId>()
                .map(|id| id.as_str().to_owned())
                .unwrap_or_default();
            tracing::info_span!(
                "request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id,
            )
        })
        .on_failure(|error, latency: Duration, _span: &Span| {
            tracing::error!(%error, latency_ms = latency.as_millis() as u64, "Request failed");
        });

    let max_body = usize::try_from(body_limit.max_bytes).unwrap_or(usize::MAX);

    router.layer(
        ServiceBuilder::new()
            .layer(from_fn_with_state(request_id_config, request_id))
            .layer(from_fn_with_state(headers_config, security_headers))
            .layer(trace)
            .layer(from_fn_with_state(
                TierLimit::new(limiter, RateLimitTier::Default),
                rate_limit,
            ))
            .layer(build_cors_layer(&allowed_origins))
            .layer(from_fn_with_state(
                CsrfConfig::new(allowed_origins),
                csrf_protection,
            ))
            .layer(from_fn_with_state(body_limit, enforce_body_limit))
            .layer(DefaultBodyLimit::max(max_body)),
    )
}
