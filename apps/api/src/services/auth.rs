//! Token issuance flows
//!
//! - Login with Argon2id password verification
//! - Refresh-token rotation
//! - Logout of one token or every token of a user
//! - Periodic purge of expired refresh tokens

use std::sync::Arc;
use std::time::Duration as StdDuration;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{Duration, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::token::{AuthTokens, DeviceInfo, TokenKind};
use crate::models::user::User;
use crate::repositories::{RefreshTokenStore, UserRepository};
use crate::services::token::TokenService;

/// Default interval between refresh-token purges
pub const DEFAULT_PURGE_INTERVAL: StdDuration = StdDuration::from_secs(3600);

/// Hash a password with Argon2id
pub fn hash_password(password: &str) -> ApiResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| ApiError::Internal(format!("Password hashing failed: {}", e)))?;
    Ok(hash.to_string())
}

/// Issues, rotates and revokes token pairs
#[derive(Clone)]
pub struct AuthService {
    tokens: TokenService,
    users: Arc<dyn UserRepository>,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    argon2: Argon2<'static>,
    /// Verified against when the email is unknown so that login takes the
    /// same time whether or not the account exists.
    dummy_password_hash: Arc<str>,
}

impl AuthService {
    pub fn new(
        tokens: TokenService,
        users: Arc<dyn UserRepository>,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
    ) -> ApiResult<Self> {
        let dummy_password_hash = hash_password("dummy_password_for_timing_attack_prevention")?;

        Ok(Self {
            tokens,
            users,
            refresh_tokens,
            argon2: Argon2::default(),
            dummy_password_hash: dummy_password_hash.into(),
        })
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Authenticate with email and password and issue a token pair
    ///
    /// # Errors
    /// - `ApiError::InvalidCredentials` for an unknown email or wrong password
    /// - `ApiError::SubjectInactive` if the account is disabled
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        device_info: Option<DeviceInfo>,
        ip_address: Option<&str>,
    ) -> ApiResult<(User, AuthTokens)> {
        let user = self.users.find_by_email(email).await?;

        let (user, password_valid) = match user {
            Some(u) => {
                let valid = self.verify_password(password, &u.password_hash)?;
                (Some(u), valid)
            }
            None => {
                let _ = self.verify_password(password, &self.dummy_password_hash);
                (None, false)
            }
        };

        let user = match (user, password_valid) {
            (Some(u), true) => u,
            (Some(u), false) => {
                tracing::warn!(user_id = %u.id, "Login failed: invalid password");
                return Err(ApiError::InvalidCredentials);
            }
            (None, _) => {
                tracing::warn!("Login failed: unknown email");
                return Err(ApiError::InvalidCredentials);
            }
        };

        if !user.is_active {
            tracing::warn!(user_id = %user.id, "Login refused: account inactive");
            return Err(ApiError::SubjectInactive);
        }

        let tokens = self
            .issue_pair(&user, device_info.as_ref(), ip_address)
            .await?;

        tracing::info!(user_id = %user.id, "User logged in");

        Ok((user, tokens))
    }

    /// Rotate a refresh token: the presented token is revoked and a new
    /// pair is issued
    ///
    /// # Errors
    /// - token-level errors if the string is not a valid refresh token
    /// - `ApiError::InvalidRefreshToken` if the store has no live record,
    ///   or a concurrent rotation already consumed it
    /// - `ApiError::SubjectInactive` if the user is gone or disabled
    pub async fn refresh(&self, refresh_token: &str, ip_address: Option<&str>) -> ApiResult<AuthTokens> {
        let claims = self.tokens.verify(refresh_token, TokenKind::Refresh)?;

        let record = self
            .refresh_tokens
            .lookup(refresh_token)
            .await?
            .ok_or(ApiError::InvalidRefreshToken)?;

        let user = match self.users.find_by_id(record.user_id).await? {
            Some(user) if user.is_active => user,
            _ => {
                tracing::warn!(user_id = %claims.sub, "Refresh refused: account missing or inactive");
                return Err(ApiError::SubjectInactive);
            }
        };

        if !self.refresh_tokens.revoke(refresh_token).await? {
            tracing::warn!(user_id = %user.id, "Refresh token already rotated");
            return Err(ApiError::InvalidRefreshToken);
        }

        let device_info = DeviceInfo {
            device_name: record.device_name,
            user_agent: record.user_agent,
        };
        let ip_address = ip_address.or(record.ip_address.as_deref());
        let tokens = self.issue_pair(&user, Some(&device_info), ip_address).await?;

        tracing::debug!(user_id = %user.id, "Refresh token rotated");

        Ok(tokens)
    }

    /// Revoke one refresh token. Idempotent; returns whether a live token
    /// was revoked.
    pub async fn logout(&self, refresh_token: &str) -> ApiResult<bool> {
        let revoked = self.refresh_tokens.revoke(refresh_token).await?;
        tracing::info!(revoked, "Refresh token logged out");
        Ok(revoked)
    }

    /// Revoke every live refresh token of a user
    pub async fn logout_all(&self, user_id: Uuid) -> ApiResult<u64> {
        let count = self.refresh_tokens.revoke_all(user_id).await?;
        tracing::info!(user_id = %user_id, tokens_revoked = count, "All refresh tokens revoked");
        Ok(count)
    }

    async fn issue_pair(
        &self,
        user: &User,
        device_info: Option<&DeviceInfo>,
        ip_address: Option<&str>,
    ) -> ApiResult<AuthTokens> {
        let identity = user.identity();
        let access_token = self.tokens.issue_access(&identity)?;
        let refresh_token = self.tokens.issue_refresh(&identity)?;

        let expires_at = Utc::now() + Duration::seconds(self.tokens.refresh_ttl_secs());
        self.refresh_tokens
            .record(user.id, &refresh_token, expires_at, device_info, ip_address)
            .await?;

        Ok(AuthTokens::new(
            access_token,
            refresh_token,
            self.tokens.access_ttl_secs().max(0) as u64,
        ))
    }

    /// Verify a password against an Argon2id hash
    fn verify_password(&self, password: &str, hash: &str) -> ApiResult<bool> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| ApiError::Internal(format!("Invalid password hash format: {}", e)))?;

        Ok(self
            .argon2
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    }
}

/// Spawn the background task that deletes expired refresh tokens
pub fn spawn_purge_task(store: Arc<dyn RefreshTokenStore>, every: StdDuration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match store.purge_expired().await {
                Ok(0) => tracing::trace!("No expired refresh tokens to purge"),
                Ok(purged) => tracing::info!(purged, "Purged expired refresh tokens"),
                Err(e) => tracing::error!(error = %e, "Refresh token purge failed"),
            }
        }
    })
}
