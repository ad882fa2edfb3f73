//! Middleware for the Linkhoard API
//!
//! - `request_id`: correlation ids and the task-local request context
//! - `security_headers`: browser hardening headers
//! - `rate_limit`: tiered sliding-window limiter
//! - `csrf`: origin check for state-changing API requests
//! - `body_limit`: declared body size cap
//! - `auth`: bearer-token gate and identity extractors
//! - `pipeline`: fixed-order composition of the above

pub mod auth;
pub mod body_limit;
pub mod csrf;
pub mod pipeline;
pub mod rate_limit;
pub mod request_id;
pub mod security_headers;

pub use auth::{auth_gate, require_permission, AuthGate, AuthGateConfig, CurrentIdentity, MaybeIdentity};
pub use body_limit::BodyLimit;
pub use csrf::CsrfConfig;
pub use pipeline::{apply_security_pipeline, build_cors_layer, SecurityPipeline};
pub use rate_limit::{
    extract_client_ip, rate_limit, FailureMode, InMemoryWindowStore, RateLimitTier,
    RateLimitTiers, RateLimiter, RedisWindowStore, TierLimit, WindowStore,
};
pub use request_id::{RequestId, RequestIdConfig};
pub use security_headers::SecurityHeadersConfig;
