//! Error handling for the Linkhoard API
//!
//! Every failure raised by the admission layer is an [`ApiError`]. The
//! single `IntoResponse` implementation maps each kind to its status code
//! and the JSON envelope clients rely on:
//!
//! ```json
//! { "success": false, "error": "Authentication Error", "message": "...",
//!   "code": "TOKEN_EXPIRED", "requestId": "...", "timestamp": "..." }
//! ```

use axum::{
    http::{header::RETRY_AFTER, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::middleware::request_id;
use crate::models::token::TokenKind;
use crate::repositories::StoreError;
use crate::services::token::TokenError;

/// Message returned in place of internal error details outside development
const GENERIC_INTERNAL_MESSAGE: &str = "An unexpected error occurred";

/// API error response body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Always `false`
    pub success: bool,
    /// Error category label (e.g. "Authentication Error")
    pub error: &'static str,
    /// Human-readable error message
    pub message: String,
    /// Machine-readable error code
    pub code: &'static str,
    /// Correlation id echoed in the `X-Request-ID` header
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// ISO-8601 timestamp of the failure
    pub timestamp: String,
}

/// Main API error type
#[derive(Error, Debug)]
pub enum ApiError {
    // ========== Tokens ==========
    /// Signature, format, issuer or audience mismatch
    #[error("invalid authentication token: {0}")]
    InvalidToken(String),

    /// Token is past its expiry
    #[error("authentication token has expired")]
    TokenExpired,

    /// Access token presented as refresh token or vice versa
    #[error("expected {expected} token but received {actual} token")]
    WrongTokenKind { expected: TokenKind, actual: TokenKind },

    // ========== Authentication & Authorization ==========
    /// Missing or malformed credential where one is required
    #[error("{0}")]
    Unauthenticated(String),

    /// Valid credential, insufficient role
    #[error("{0}")]
    Forbidden(String),

    /// Cross-site request rejected by the origin check
    #[error("cross-site request rejected: {0}")]
    CsrfRejected(String),

    /// Login with unknown email or wrong password
    #[error("invalid email or password")]
    InvalidCredentials,

    /// Refresh token absent, revoked or expired in the token store
    #[error("refresh token is invalid or has been revoked")]
    InvalidRefreshToken,

    /// Account disabled or removed
    #[error("account is inactive")]
    SubjectInactive,

    // ========== Admission ==========
    /// Tier quota exceeded
    #[error("{message}")]
    RateLimited { retry_after: u64, message: String },

    /// Declared body size over the configured cap
    #[error("request body of {declared} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: u64, declared: u64 },

    // ========== Request Errors ==========
    /// Request validation failed
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Placeholder route
    #[error("{0} is not implemented yet")]
    NotImplemented(&'static str),

    // ========== Internal Errors ==========
    /// Token store failure; never fails open
    #[error("token store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// JWT encoding error
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// Internal server error (catch-all for unexpected errors)
    #[error("internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidToken(_)
            | Self::TokenExpired
            | Self::WrongTokenKind { .. }
            | Self::Unauthenticated(_)
            | Self::InvalidCredentials
            | Self::InvalidRefreshToken
            | Self::SubjectInactive => StatusCode::UNAUTHORIZED,

            Self::Forbidden(_) | Self::CsrfRejected(_) => StatusCode::FORBIDDEN,

            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,

            Self::ValidationError(_) => StatusCode::BAD_REQUEST,

            Self::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,

            Self::Store(_) | Self::Configuration(_) | Self::Jwt(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Error category label used in the response body
    pub fn label(&self) -> &'static str {
        match self.status_code() {
            StatusCode::UNAUTHORIZED => "Authentication Error",
            StatusCode::FORBIDDEN => "Authorization Error",
            StatusCode::TOO_MANY_REQUESTS => "Too Many Requests",
            StatusCode::PAYLOAD_TOO_LARGE => "Payload Too Large",
            StatusCode::BAD_REQUEST => "Validation Error",
            StatusCode::NOT_IMPLEMENTED => "Not Implemented",
            _ => "Internal Server Error",
        }
    }

    /// Get the error code string for client-side handling
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidToken(_) => "INVALID_TOKEN",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::WrongTokenKind { .. } => "WRONG_TOKEN_KIND",
            Self::Unauthenticated(_) => "UNAUTHENTICATED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::CsrfRejected(_) => "CSRF_REJECTED",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::InvalidRefreshToken => "INVALID_REFRESH_TOKEN",
            Self::SubjectInactive => "SUBJECT_INACTIVE",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::NotImplemented(_) => "NOT_IMPLEMENTED",
            Self::Store(_) => "STORE_ERROR",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Jwt(_) => "JWT_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Log the error with appropriate severity based on status code
    pub fn log(&self) {
        let status = self.status_code();
        if status.is_server_error() && status != StatusCode::NOT_IMPLEMENTED {
            tracing::error!(
                error = %self,
                code = self.error_code(),
                status = status.as_u16(),
                "Server error occurred"
            );
        } else if matches!(
            status,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS
        ) {
            tracing::warn!(
                error = %self,
                code = self.error_code(),
                status = status.as_u16(),
                "Request rejected"
            );
        } else {
            tracing::debug!(
                error = %self,
                code = self.error_code(),
                status = status.as_u16(),
                "Client error"
            );
        }
    }

    /// Build the response body for the current request
    fn to_body(&self) -> ErrorResponse {
        let context = request_id::current();
        let expose_internal = context
            .as_ref()
            .is_some_and(|ctx| ctx.expose_internal_errors);

        let status = self.status_code();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR && !expose_internal {
            GENERIC_INTERNAL_MESSAGE.to_string()
        } else {
            self.to_string()
        };

        ErrorResponse {
            success: false,
            error: self.label(),
            message,
            code: self.error_code(),
            request_id: context.map(|ctx| ctx.request_id),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.log();

        let status = self.status_code();
        let body = Json(self.to_body());

        if let Self::RateLimited { retry_after, .. } = &self {
            return (status, [(RETRY_AFTER, retry_after.to_string())], body).into_response();
        }

        (status, body).into_response()
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Invalid(reason) => Self::InvalidToken(reason),
            TokenError::Expired => Self::TokenExpired,
            TokenError::WrongKind { expected, actual } => Self::WrongTokenKind { expected, actual },
            TokenError::Signing(e) => Self::Jwt(e),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<ApiError>() {
            Ok(api_err) => api_err,
            Err(err) => Self::Internal(err.to_string()),
        }
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;
