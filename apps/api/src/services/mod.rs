//! Business logic services
//!
//! - `token`: signing and verification of access and refresh tokens
//! - `auth`: login, refresh rotation, logout and the purge task
//! - `health`: dependency checks for the readiness probe

pub mod auth;
pub mod health;
pub mod token;

pub use auth::{hash_password, spawn_purge_task, AuthService, DEFAULT_PURGE_INTERVAL};
pub use health::HealthService;
pub use token::{TokenConfig, TokenError, TokenService};
