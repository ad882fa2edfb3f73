//! Linkhoard API library
//!
//! Request admission for the Linkhoard bookmark service: token codec,
//! refresh-token store, tiered rate limiting, auth gate and the security
//! pipeline. Exposed as a library for the binary and integration tests.

pub mod config;
pub mod error;
pub mod middleware;
pub mod models;
pub mod repositories;
pub mod routes;
pub mod services;

// Re-export commonly used types
pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::{build_app, AppState};
pub use services::{AuthService, TokenConfig, TokenService};
