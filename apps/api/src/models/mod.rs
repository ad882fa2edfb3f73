//! Data models for the admission layer
//!
//! - `identity`: roles and the per-request identity
//! - `token`: JWT claims, refresh-token records, token responses
//! - `permission`: static role policy
//! - `user`: the read-only view of user accounts

pub mod identity;
pub mod permission;
pub mod token;
pub mod user;

pub use identity::{Identity, Role};
pub use permission::{has_permission, Action, Resource};
pub use token::{AuthTokens, DeviceInfo, RefreshTokenRecord, TokenClaims, TokenKind};
pub use user::User;
