//! Refresh token store
//!
//! Tokens are keyed by the SHA-256 of the token string; the raw token is
//! never persisted. A record is live while it is neither revoked nor
//! expired, revocation is terminal, and expired records are purged
//! regardless of their revoked flag.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{StoreError, StoreResult};
use crate::models::token::{DeviceInfo, RefreshTokenRecord};

const RECORD_COLUMNS: &str = "id, user_id, token_hash, expires_at, created_at, revoked, \
                              revoked_at, device_name, user_agent, ip_address";

/// Hash a token using SHA-256 for storage
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Storage for issued refresh tokens
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Record a newly issued refresh token
    async fn record(
        &self,
        user_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
        device_info: Option<&DeviceInfo>,
        ip_address: Option<&str>,
    ) -> StoreResult<RefreshTokenRecord>;

    /// Find the live record for a token; `None` when absent, revoked or expired
    async fn lookup(&self, token: &str) -> StoreResult<Option<RefreshTokenRecord>>;

    /// Revoke a token. Returns true only when a live record was flagged.
    async fn revoke(&self, token: &str) -> StoreResult<bool>;

    /// Revoke every live token of a user, returning how many were flagged
    async fn revoke_all(&self, user_id: Uuid) -> StoreResult<u64>;

    /// Delete records whose expiry has passed, revoked or not
    async fn purge_expired(&self) -> StoreResult<u64>;
}

/// PostgreSQL-backed refresh token store
#[derive(Clone)]
pub struct PgRefreshTokenStore {
    pool: PgPool,
}

impl PgRefreshTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefreshTokenStore for PgRefreshTokenStore {
    async fn record(
        &self,
        user_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
        device_info: Option<&DeviceInfo>,
        ip_address: Option<&str>,
    ) -> StoreResult<RefreshTokenRecord> {
        let (device_name, user_agent) = device_info
            .map(|d| (d.device_name.as_deref(), d.user_agent.as_deref()))
            .unwrap_or((None, None));

        let query = format!(
            r#"
            INSERT INTO refresh_tokens (user_id, token_hash, expires_at, device_name, user_agent, ip_address)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {RECORD_COLUMNS}
            "#
        );

        sqlx::query_as::<_, RefreshTokenRecord>(&query)
            .bind(user_id)
            .bind(hash_token(token))
            .bind(expires_at)
            .bind(device_name)
            .bind(user_agent)
            .bind(ip_address)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                    StoreError::Duplicate
                }
                _ => StoreError::Database(e),
            })
    }

    async fn lookup(&self, token: &str) -> StoreResult<Option<RefreshTokenRecord>> {
        let query = format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM refresh_tokens
            WHERE token_hash = $1 AND revoked = false AND expires_at > NOW()
            "#
        );

        Ok(sqlx::query_as::<_, RefreshTokenRecord>(&query)
            .bind(hash_token(token))
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn revoke(&self, token: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = true, revoked_at = NOW()
            WHERE token_hash = $1 AND revoked = false AND expires_at > NOW()
            "#,
        )
        .bind(hash_token(token))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn revoke_all(&self, user_id: Uuid) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = true, revoked_at = NOW()
            WHERE user_id = $1 AND revoked = false AND expires_at > NOW()
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn purge_expired(&self) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

/// In-memory refresh token store for single-instance deployments and tests
#[derive(Default)]
pub struct InMemoryRefreshTokenStore {
    records: RwLock<HashMap<String, RefreshTokenRecord>>,
}

impl InMemoryRefreshTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, live or not
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl RefreshTokenStore for InMemoryRefreshTokenStore {
    async fn record(
        &self,
        user_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
        device_info: Option<&DeviceInfo>,
        ip_address: Option<&str>,
    ) -> StoreResult<RefreshTokenRecord> {
        let token_hash = hash_token(token);
        let mut records = self.records.write().await;
        if records.contains_key(&token_hash) {
            return Err(StoreError::Duplicate);
        }

        let record = RefreshTokenRecord {
            id: Uuid::new_v4(),
            user_id,
            token_hash: token_hash.clone(),
            expires_at,
            created_at: Utc::now(),
            revoked: false,
            revoked_at: None,
            device_name: device_info.and_then(|d| d.device_name.clone()),
            user_agent: device_info.and_then(|d| d.user_agent.clone()),
            ip_address: ip_address.map(str::to_string),
        };
        records.insert(token_hash, record.clone());

        Ok(record)
    }

    async fn lookup(&self, token: &str) -> StoreResult<Option<RefreshTokenRecord>> {
        let now = Utc::now();
        let records = self.records.read().await;
        Ok(records
            .get(&hash_token(token))
            .filter(|record| record.is_live_at(now))
            .cloned())
    }

    async fn revoke(&self, token: &str) -> StoreResult<bool> {
        let now = Utc::now();
        let mut records = self.records.write().await;
        match records.get_mut(&hash_token(token)) {
            Some(record) if record.is_live_at(now) => {
                record.revoked = true;
                record.revoked_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all(&self, user_id: Uuid) -> StoreResult<u64> {
        let now = Utc::now();
        let mut records = self.records.write().await;
        let mut count = 0;
        for record in records
            .values_mut()
            .filter(|r| r.user_id == user_id && r.is_live_at(now))
        {
            record.revoked = true;
            record.revoked_at = Some(now);
            count += 1;
        }
        Ok(count)
    }

    async fn purge_expired(&self) -> StoreResult<u64> {
        let now = Utc::now();
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| !record.is_expired_at(now));
        Ok((before - records.len()) as u64)
    }
}
