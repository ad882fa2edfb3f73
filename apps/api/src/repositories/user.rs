//! Read-only user lookups used by login and token refresh

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::StoreResult;
use crate::models::user::User;

const USER_COLUMNS: &str = "id, email, username, password_hash, role, is_active, created_at";

/// User lookups needed by the admission layer
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, user_id: Uuid) -> StoreResult<Option<User>>;

    /// Case-insensitive email lookup
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>>;
}

/// PostgreSQL-backed user repository
#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_id(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        Ok(sqlx::query_as::<_, User>(&query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        Ok(sqlx::query_as::<_, User>(&query)
            .bind(email.trim().to_lowercase())
            .fetch_optional(&self.pool)
            .await?)
    }
}

/// In-memory user repository for development and tests
#[derive(Default)]
pub struct InMemoryUserRepository {
    users: RwLock<HashMap<Uuid, User>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a user; the email is stored lowercase
    pub async fn insert(&self, mut user: User) {
        user.email = user.email.trim().to_lowercase();
        self.users.write().await.insert(user.id, user);
    }

    /// Flip the active flag; returns false for unknown users
    pub async fn set_active(&self, user_id: Uuid, is_active: bool) -> bool {
        match self.users.write().await.get_mut(&user_id) {
            Some(user) => {
                user.is_active = is_active;
                true
            }
            None => false,
        }
    }

    pub async fn remove(&self, user_id: Uuid) -> Option<User> {
        self.users.write().await.remove(&user_id)
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_by_id(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.users.read().await.get(&user_id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let email = email.trim().to_lowercase();
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|user| user.email == email)
            .cloned())
    }
}
