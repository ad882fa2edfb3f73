//! API server configuration

use std::env;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use linkhoard_shared_config::{
    get_env_or_default, parse_env, parse_flag, CommonConfig, DatabaseConfig, Environment,
    RedisConfig,
};

use crate::middleware::body_limit::DEFAULT_MAX_BODY_BYTES;
use crate::middleware::rate_limit::{FailureMode, RateLimitTier, RateLimitTiers};
use crate::services::token::TokenConfig;

/// Minimum required length for each JWT secret to be considered secure
const MIN_JWT_SECRET_LENGTH: usize = 32;

const DEV_ACCESS_SECRET: &str = "development-access-secret-change-in-production";
const DEV_REFRESH_SECRET: &str = "development-refresh-secret-change-in-production";

/// API server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Common configuration shared with other services
    pub common: CommonConfig,

    /// Server port (default: 8080)
    pub port: u16,

    /// Secret signing access tokens
    pub jwt_access_secret: String,

    /// Secret signing refresh tokens; never equal to the access secret in production
    pub jwt_refresh_secret: String,

    /// JWT access token expiry (default: 15m)
    pub jwt_access_expiry: String,

    /// JWT refresh token expiry (default: 7d)
    pub jwt_refresh_expiry: String,

    pub jwt_issuer: String,

    pub jwt_audience: String,

    /// Origins allowed by CORS and the CSRF check
    pub cors_allowed_origins: Vec<String>,

    /// Declared body size cap in bytes (default: 10 MiB)
    pub max_body_bytes: u64,

    /// Per-call timeout for the rate-limit store
    pub rate_limit_store_timeout: Duration,

    /// Reject auth-tier requests when the rate-limit store is down
    pub rate_limit_auth_fail_closed: bool,

    /// Reject strict-tier requests when the rate-limit store is down
    pub rate_limit_strict_fail_closed: bool,

    /// Interval between expired refresh token purges
    pub token_purge_interval: Duration,

    /// Send HSTS on HTTPS responses (default: on in production)
    pub enable_hsts: bool,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// In production mode, this function requires:
    /// - `JWT_ACCESS_SECRET` and `JWT_REFRESH_SECRET`: set, at least 32
    ///   characters, and different from each other
    /// - `DATABASE_URL`: Must be explicitly set (no insecure defaults)
    ///
    /// In development/staging mode, sensible defaults are used for convenience.
    pub fn from_env() -> Result<Self> {
        let environment = Environment::from_env();
        let is_production = environment.is_production();

        let jwt_access_secret =
            Self::load_jwt_secret("JWT_ACCESS_SECRET", DEV_ACCESS_SECRET, is_production)?;
        let jwt_refresh_secret =
            Self::load_jwt_secret("JWT_REFRESH_SECRET", DEV_REFRESH_SECRET, is_production)?;
        Self::validate_distinct_secrets(&jwt_access_secret, &jwt_refresh_secret, is_production)?;

        if is_production {
            Self::validate_database_url()?;
        }

        let common = CommonConfig::from_env()
            .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

        let store_timeout_ms: u64 =
            parse_env("RATE_LIMIT_STORE_TIMEOUT_MS", 2000).context("Invalid RATE_LIMIT_STORE_TIMEOUT_MS")?;
        let purge_interval_secs: u64 =
            parse_env("TOKEN_PURGE_INTERVAL_SECS", 3600).context("Invalid TOKEN_PURGE_INTERVAL_SECS")?;
        if purge_interval_secs == 0 {
            bail!("TOKEN_PURGE_INTERVAL_SECS must be greater than zero");
        }

        Ok(Self {
            common,

            port: parse_env("PORT", 8080).context("Invalid PORT value")?,

            jwt_access_secret,

            jwt_refresh_secret,

            jwt_access_expiry: get_env_or_default("JWT_ACCESS_EXPIRY", "15m"),

            jwt_refresh_expiry: get_env_or_default("JWT_REFRESH_EXPIRY", "7d"),

            jwt_issuer: get_env_or_default("JWT_ISSUER", "linkhoard-api"),

            jwt_audience: get_env_or_default("JWT_AUDIENCE", "linkhoard-client"),

            cors_allowed_origins: Self::load_cors_origins(is_production),

            max_body_bytes: parse_env("MAX_BODY_BYTES", DEFAULT_MAX_BODY_BYTES)
                .context("Invalid MAX_BODY_BYTES")?,

            rate_limit_store_timeout: Duration::from_millis(store_timeout_ms),

            rate_limit_auth_fail_closed: parse_flag("RATE_LIMIT_AUTH_FAIL_CLOSED", false),

            rate_limit_strict_fail_closed: parse_flag("RATE_LIMIT_STRICT_FAIL_CLOSED", false),

            token_purge_interval: Duration::from_secs(purge_interval_secs),

            enable_hsts: parse_flag("ENABLE_HSTS", is_production),
        })
    }

    /// Load and validate one JWT secret
    ///
    /// In production the variable must be set and at least
    /// MIN_JWT_SECRET_LENGTH characters; in development `dev_default` is
    /// used with a warning.
    fn load_jwt_secret(name: &str, dev_default: &str, is_production: bool) -> Result<String> {
        match env::var(name) {
            Ok(secret) if !secret.is_empty() => {
                if is_production && secret.len() < MIN_JWT_SECRET_LENGTH {
                    bail!(
                        "{} must be at least {} characters in production (got {})",
                        name,
                        MIN_JWT_SECRET_LENGTH,
                        secret.len()
                    );
                }
                Ok(secret)
            }
            _ if is_production => {
                bail!(
                    "{} environment variable is required in production. \
                     Please set a secure secret of at least {} characters.",
                    name,
                    MIN_JWT_SECRET_LENGTH
                );
            }
            _ => {
                tracing::warn!(
                    "{} not set, using insecure default. \
                     This is only acceptable in development mode.",
                    name
                );
                Ok(dev_default.to_string())
            }
        }
    }

    /// Access and refresh tokens must not share a signing key in production
    fn validate_distinct_secrets(access: &str, refresh: &str, is_production: bool) -> Result<()> {
        if access != refresh {
            return Ok(());
        }
        if is_production {
            bail!("JWT_ACCESS_SECRET and JWT_REFRESH_SECRET must differ in production");
        }
        tracing::warn!("JWT_ACCESS_SECRET and JWT_REFRESH_SECRET are identical");
        Ok(())
    }

    /// Validate that DATABASE_URL is explicitly set in production
    fn validate_database_url() -> Result<()> {
        match env::var("DATABASE_URL") {
            Ok(url) if !url.is_empty() => Ok(()),
            _ => {
                bail!(
                    "DATABASE_URL environment variable is required in production. \
                     Please set your PostgreSQL connection string."
                );
            }
        }
    }

    /// Parse `CORS_ORIGINS` (comma separated)
    ///
    /// Development falls back to the local web UI origin; production without
    /// the variable allows no cross-origin callers.
    fn load_cors_origins(is_production: bool) -> Vec<String> {
        match env::var("CORS_ORIGINS") {
            Ok(value) => value
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            Err(_) if is_production => {
                tracing::warn!(
                    "CORS_ORIGINS not configured in production mode. \
                     Cross-origin requests will be rejected."
                );
                Vec::new()
            }
            Err(_) => vec!["http://localhost:3000".to_string()],
        }
    }

    /// Token codec settings
    pub fn token_config(&self) -> TokenConfig {
        TokenConfig::new(self.jwt_access_secret.clone(), self.jwt_refresh_secret.clone())
            .with_expiry_strings(&self.jwt_access_expiry, &self.jwt_refresh_expiry)
            .with_issuer(self.jwt_issuer.clone())
            .with_audience(self.jwt_audience.clone())
    }

    /// Tier table with the configured failure modes applied
    pub fn rate_limit_tiers(&self) -> RateLimitTiers {
        let mut tiers = RateLimitTiers::default();
        if self.rate_limit_auth_fail_closed {
            tiers = tiers.with_failure_mode(RateLimitTier::Auth, FailureMode::Closed);
        }
        if self.rate_limit_strict_fail_closed {
            tiers = tiers.with_failure_mode(RateLimitTier::Strict, FailureMode::Closed);
        }
        tiers
    }

    /// Get database configuration
    pub fn database(&self) -> &DatabaseConfig {
        &self.common.database
    }

    /// Get Redis configuration
    pub fn redis(&self) -> &RedisConfig {
        &self.common.redis
    }

    /// Get environment mode
    pub fn environment(&self) -> Environment {
        self.common.environment
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.common.environment.is_production()
    }
}
