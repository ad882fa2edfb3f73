//! Origin-based CSRF protection for the versioned API
//!
//! Applies to state-changing methods under `/api/v1/` except
//! `/api/v1/auth/`, which is checked first so credential endpoints stay
//! reachable from any origin. Body types a plain HTML form can submit
//! (url-encoded, multipart, text/plain) need an allow-listed `Origin`;
//! other requests are rejected only when they carry a foreign `Origin`.

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{
        header::{CONTENT_TYPE, ORIGIN},
        HeaderMap, Method,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::ApiError;

const PROTECTED_PREFIX: &str = "/api/v1/";
const EXCLUDED_PREFIX: &str = "/api/v1/auth/";

const FORM_CONTENT_TYPES: [&str; 3] = [
    "application/x-www-form-urlencoded",
    "multipart/form-data",
    "text/plain",
];

/// Allowed origins, shared with the CORS layer
#[derive(Debug, Clone, Default)]
pub struct CsrfConfig {
    allowed_origins: Arc<HashSet<String>>,
}

impl CsrfConfig {
    pub fn new(allowed_origins: impl IntoIterator<Item = String>) -> Self {
        Self {
            allowed_origins: Arc::new(
                allowed_origins
                    .into_iter()
                    .map(|origin| origin.trim_end_matches('/').to_string())
                    .collect(),
            ),
        }
    }

    pub fn is_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.contains(origin.trim_end_matches('/'))
    }
}

fn is_state_changing(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

fn is_protected_path(path: &str) -> bool {
    if path.starts_with(EXCLUDED_PREFIX) || path == EXCLUDED_PREFIX.trim_end_matches('/') {
        return false;
    }
    path.starts_with(PROTECTED_PREFIX)
}

fn is_form_submission(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            let essence = value.split(';').next().unwrap_or_default().trim();
            FORM_CONTENT_TYPES
                .iter()
                .any(|form| essence.eq_ignore_ascii_case(form))
        })
        .unwrap_or(false)
}

/// Decide whether a request passes the origin check
pub fn check_origin(
    config: &CsrfConfig,
    method: &Method,
    path: &str,
    headers: &HeaderMap,
) -> Result<(), ApiError> {
    if !is_state_changing(method) || !is_protected_path(path) {
        return Ok(());
    }

    let origin = headers.get(ORIGIN).and_then(|value| value.to_str().ok());

    match origin {
        Some(origin) if config.is_allowed(origin) => Ok(()),
        Some(origin) => Err(ApiError::CsrfRejected(format!(
            "origin {} is not allowed",
            origin
        ))),
        None if is_form_submission(headers) => Err(ApiError::CsrfRejected(
            "missing Origin header on form submission".to_string(),
        )),
        None => Ok(()),
    }
}

/// CSRF middleware
pub async fn csrf_protection(
    State(config): State<CsrfConfig>,
    request: Request,
    next: Next,
) -> Response {
    if let Err(e) = check_origin(
        &config,
        request.method(),
        request.uri().path(),
        request.headers(),
    ) {
        return e.into_response();
    }
    next.run(request).await
}
