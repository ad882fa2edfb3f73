//! Request body size cap
//!
//! A declared `Content-Length` above the cap is rejected with 413 before
//! the body is read. Bodies without a declared length (chunked uploads)
//! are bounded by axum's `DefaultBodyLimit`, configured with the same cap
//! in the pipeline.

use axum::{
    extract::{Request, State},
    http::{header::CONTENT_LENGTH, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::ApiError;

/// Default cap: 10 MiB
pub const DEFAULT_MAX_BODY_BYTES: u64 = 10 * 1024 * 1024;

/// Middleware state
#[derive(Debug, Clone, Copy)]
pub struct BodyLimit {
    pub max_bytes: u64,
}

impl Default for BodyLimit {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl BodyLimit {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }

    /// Check the declared length against the cap
    pub fn check(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        let Some(value) = headers.get(CONTENT_LENGTH) else {
            return Ok(());
        };

        let declared = value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or_else(|| ApiError::ValidationError("invalid Content-Length header".to_string()))?;

        if declared > self.max_bytes {
            return Err(ApiError::PayloadTooLarge {
                limit: self.max_bytes,
                declared,
            });
        }
        Ok(())
    }
}

/// Body cap middleware
pub async fn enforce_body_limit(
    State(limit): State<BodyLimit>,
    request: Request,
    next: Next,
) -> Response {
    if let Err(e) = limit.check(request.headers()) {
        return e.into_response();
    }
    next.run(request).await
}
