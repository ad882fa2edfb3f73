//! User accounts as seen by the admission layer
//!
//! Account management lives elsewhere; login and refresh only read users.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::identity::{Identity, Role};

/// User account from the users table
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,

    /// Unique, stored lowercase
    pub email: String,

    /// Display name
    pub username: String,

    /// Argon2id hash
    #[serde(skip_serializing)]
    pub password_hash: String,

    pub role: Role,

    /// Disabled accounts can neither log in nor refresh
    pub is_active: bool,

    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn identity(&self) -> Identity {
        Identity {
            id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
            role: self.role,
            is_active: self.is_active,
        }
    }
}
