//! Persistence layer for the admission layer
//!
//! Each store is an async trait with a PostgreSQL implementation for
//! deployments and an in-memory implementation for single-instance
//! development and tests:
//! - `refresh_token`: issued refresh tokens (record, lookup, revoke, purge)
//! - `user`: read-only user lookups for login and refresh

pub mod refresh_token;
pub mod user;

pub use refresh_token::{
    hash_token, InMemoryRefreshTokenStore, PgRefreshTokenStore, RefreshTokenStore,
};
pub use user::{InMemoryUserRepository, PgUserRepository, UserRepository};

use thiserror::Error;

/// Store failures
///
/// These always surface as server errors; a failing token store never
/// admits a request.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A record for the same token already exists
    #[error("duplicate record")]
    Duplicate,
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;
