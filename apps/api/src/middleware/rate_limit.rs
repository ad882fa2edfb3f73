//! Sliding-window rate limiting
//!
//! Every check runs one atomic batch against a counting store: prune
//! members older than the window, count what is left, add a member for
//! this request and refresh the key TTL. A request is admitted when the
//! count before the add is under the tier's maximum; a rejected request
//! removes the member it added so it does not consume quota.
//!
//! The store is Redis in deployments (shared across instances) and an
//! in-memory map for single-instance development and tests. When the store
//! errors or times out, the tier's [`FailureMode`] decides: `Open` (the
//! default) admits the request and logs a warning, `Closed` rejects it.

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::identity::Identity;

pub static X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub static X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub static X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Default bound on a single counting-store call
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(2);

/// Addresses that bypass rate limiting by default
pub const DEFAULT_ALLOW_LIST: [&str; 3] = ["127.0.0.1", "::1", "::ffff:127.0.0.1"];

/// Named rate-limit policies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitTier {
    /// Floor applied to every route
    Default,
    /// Routes behind authentication, keyed per user
    Authenticated,
    /// Expensive operations
    Strict,
    /// Credential endpoints (login, refresh)
    Auth,
}

impl RateLimitTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Authenticated => "authenticated",
            Self::Strict => "strict",
            Self::Auth => "auth",
        }
    }
}

impl std::fmt::Display for RateLimitTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do when the counting store is unreachable
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailureMode {
    /// Admit the request
    #[default]
    Open,
    /// Reject the request as rate limited
    Closed,
}

/// Window, quota and rejection message of one tier
#[derive(Debug, Clone)]
pub struct TierPolicy {
    pub window: Duration,
    pub max_requests: u32,
    pub message: String,
    pub failure_mode: FailureMode,
}

impl TierPolicy {
    pub fn new(window_secs: u64, max_requests: u32, message: impl Into<String>) -> Self {
        Self {
            window: Duration::from_secs(window_secs),
            max_requests,
            message: message.into(),
            failure_mode: FailureMode::Open,
        }
    }

    pub fn with_failure_mode(mut self, failure_mode: FailureMode) -> Self {
        self.failure_mode = failure_mode;
        self
    }

    pub fn window_ms(&self) -> u64 {
        self.window.as_millis() as u64
    }

    /// Seconds a rejected client should wait
    pub fn window_secs(&self) -> u64 {
        self.window.as_secs().max(1)
    }
}

/// Tier table, built once at startup
#[derive(Debug, Clone)]
pub struct RateLimitTiers {
    default: TierPolicy,
    authenticated: TierPolicy,
    strict: TierPolicy,
    auth: TierPolicy,
}

impl Default for RateLimitTiers {
    fn default() -> Self {
        Self {
            default: TierPolicy::new(60, 100, "Too many requests, please try again later."),
            authenticated: TierPolicy::new(
                60,
                300,
                "Too many requests, please slow down.",
            ),
            strict: TierPolicy::new(
                60,
                10,
                "Too many requests to this endpoint, please try again in a minute.",
            ),
            auth: TierPolicy::new(
                3600,
                5,
                "Too many authentication attempts, please try again in an hour.",
            ),
        }
    }
}

impl RateLimitTiers {
    pub fn get(&self, tier: RateLimitTier) -> &TierPolicy {
        match tier {
            RateLimitTier::Default => &self.default,
            RateLimitTier::Authenticated => &self.authenticated,
            RateLimitTier::Strict => &self.strict,
            RateLimitTier::Auth => &self.auth,
        }
    }

    /// Replace the policy of one tier
    pub fn with_policy(mut self, tier: RateLimitTier, policy: TierPolicy) -> Self {
        match tier {
            RateLimitTier::Default => self.default = policy,
            RateLimitTier::Authenticated => self.authenticated = policy,
            RateLimitTier::Strict => self.strict = policy,
            RateLimitTier::Auth => self.auth = policy,
        }
        self
    }

    /// Change only the failure mode of one tier
    pub fn with_failure_mode(self, tier: RateLimitTier, failure_mode: FailureMode) -> Self {
        let policy = self.get(tier).clone().with_failure_mode(failure_mode);
        self.with_policy(tier, policy)
    }
}

/// Outcome of one rate-limit check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Epoch milliseconds at which the window has fully rolled over
    pub reset_ms: u64,
}

impl RateLimitDecision {
    /// Reset time in epoch seconds, rounded up
    pub fn reset_secs(&self) -> u64 {
        self.reset_ms.div_ceil(1000)
    }
}

/// Counting store failures
#[derive(Error, Debug)]
pub enum WindowStoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("counting store unavailable: {0}")]
    Unavailable(String),
}

/// Sorted-set counting store behind the limiter
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Prune members scored at or before `now_ms - window_ms`, count the
    /// rest, add `member` at `now_ms` and refresh the key TTL, atomically.
    /// Returns the count before the add.
    async fn hit(
        &self,
        key: &str,
        now_ms: u64,
        window_ms: u64,
        member: &str,
    ) -> Result<u64, WindowStoreError>;

    /// Remove a member previously added by [`WindowStore::hit`]
    async fn remove(&self, key: &str, member: &str) -> Result<(), WindowStoreError>;
}

fn ttl_secs(window_ms: u64) -> u64 {
    window_ms.div_ceil(1000).max(1)
}

/// Redis-backed window store shared by every instance
pub struct RedisWindowStore {
    client: redis::Client,
    connection: Mutex<Option<MultiplexedConnection>>,
}

impl RedisWindowStore {
    pub fn new(client: redis::Client) -> Self {
        Self {
            client,
            connection: Mutex::new(None),
        }
    }

    /// Cached multiplexed connection, opened on first use
    pub async fn connection(&self) -> Result<MultiplexedConnection, WindowStoreError> {
        let mut cached = self.connection.lock().await;
        if let Some(conn) = cached.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        *cached = Some(conn.clone());
        Ok(conn)
    }

    /// Drop the cached connection after an I/O failure
    async fn reset_connection(&self) {
        self.connection.lock().await.take();
    }
}

#[async_trait]
impl WindowStore for RedisWindowStore {
    async fn hit(
        &self,
        key: &str,
        now_ms: u64,
        window_ms: u64,
        member: &str,
    ) -> Result<u64, WindowStoreError> {
        let mut conn = self.connection().await?;

        let result: redis::RedisResult<(u64,)> = redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(now_ms.saturating_sub(window_ms))
            .ignore()
            .cmd("ZCARD")
            .arg(key)
            .cmd("ZADD")
            .arg(key)
            .arg(now_ms)
            .arg(member)
            .ignore()
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs(window_ms))
            .ignore()
            .query_async(&mut conn)
            .await;

        match result {
            Ok((count,)) => Ok(count),
            Err(e) => {
                if e.is_io_error() || e.is_connection_dropped() {
                    self.reset_connection().await;
                }
                Err(e.into())
            }
        }
    }

    async fn remove(&self, key: &str, member: &str) -> Result<(), WindowStoreError> {
        let mut conn = self.connection().await?;
        redis::cmd("ZREM")
            .arg(key)
            .arg(member)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }
}

/// One sliding window: scored members plus the key expiry
#[derive(Debug, Default)]
struct WindowEntry {
    members: Vec<(u64, String)>,
    expires_at_ms: u64,
}

/// In-memory window store for single-instance deployments and tests
///
/// Mirrors the Redis semantics including key expiry; idle keys are swept
/// at most once a minute.
#[derive(Debug, Default)]
pub struct InMemoryWindowStore {
    windows: RwLock<HashMap<String, WindowEntry>>,
    last_cleanup_ms: RwLock<u64>,
}

impl InMemoryWindowStore {
    const CLEANUP_INTERVAL_MS: u64 = 60_000;

    pub fn new() -> Self {
        Self::default()
    }

    /// Members currently stored under `key` (for monitoring and tests)
    pub async fn member_count(&self, key: &str) -> usize {
        self.windows
            .read()
            .await
            .get(key)
            .map_or(0, |entry| entry.members.len())
    }

    /// Number of tracked keys
    pub async fn key_count(&self) -> usize {
        self.windows.read().await.len()
    }

    async fn maybe_cleanup(&self, now_ms: u64) {
        {
            let last_cleanup = self.last_cleanup_ms.read().await;
            if now_ms.saturating_sub(*last_cleanup) < Self::CLEANUP_INTERVAL_MS {
                return;
            }
        }

        let mut last_cleanup = self.last_cleanup_ms.write().await;
        if now_ms.saturating_sub(*last_cleanup) < Self::CLEANUP_INTERVAL_MS {
            return;
        }
        *last_cleanup = now_ms;
        drop(last_cleanup);

        let mut windows = self.windows.write().await;
        let initial_count = windows.len();
        windows.retain(|_, entry| entry.expires_at_ms > now_ms);

        let removed = initial_count - windows.len();
        if removed > 0 {
            debug!(
                removed = removed,
                remaining = windows.len(),
                "Cleaned up expired rate limit windows"
            );
        }
    }
}

#[async_trait]
impl WindowStore for InMemoryWindowStore {
    async fn hit(
        &self,
        key: &str,
        now_ms: u64,
        window_ms: u64,
        member: &str,
    ) -> Result<u64, WindowStoreError> {
        self.maybe_cleanup(now_ms).await;

        let mut windows = self.windows.write().await;
        let entry = windows.entry(key.to_string()).or_default();
        if entry.expires_at_ms <= now_ms {
            entry.members.clear();
        }

        let cutoff = now_ms.saturating_sub(window_ms);
        entry.members.retain(|(score, _)| *score > cutoff);

        let count = entry.members.len() as u64;
        entry.members.push((now_ms, member.to_string()));
        entry.expires_at_ms = now_ms + ttl_secs(window_ms) * 1000;

        Ok(count)
    }

    async fn remove(&self, key: &str, member: &str) -> Result<(), WindowStoreError> {
        if let Some(entry) = self.windows.write().await.get_mut(key) {
            entry.members.retain(|(_, m)| m != member);
        }
        Ok(())
    }
}

fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Tier-aware sliding-window rate limiter. Cheap to clone.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn WindowStore>,
    tiers: Arc<RateLimitTiers>,
    allow_list: Arc<HashSet<IpAddr>>,
    store_timeout: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn WindowStore>, tiers: RateLimitTiers) -> Self {
        Self {
            store,
            tiers: Arc::new(tiers),
            allow_list: Arc::new(
                DEFAULT_ALLOW_LIST
                    .iter()
                    .filter_map(|ip| ip.parse().ok())
                    .collect(),
            ),
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    pub fn with_allow_list(mut self, allow_list: impl IntoIterator<Item = IpAddr>) -> Self {
        self.allow_list = Arc::new(allow_list.into_iter().collect());
        self
    }

    pub fn tiers(&self) -> &RateLimitTiers {
        &self.tiers
    }

    /// Whether `client_ip` is on the allow-list
    pub fn is_allow_listed(&self, client_ip: &str) -> bool {
        client_ip
            .parse::<IpAddr>()
            .is_ok_and(|ip| self.allow_list.contains(&ip))
    }

    /// Whether a request bypasses rate limiting
    ///
    /// Forwarding headers are client-controlled, so the socket peer must be
    /// allow-listed itself; the header-derived client must be too, so a
    /// local reverse proxy does not exempt the callers it forwards.
    pub fn is_exempt(&self, peer: Option<IpAddr>, client_ip: &str) -> bool {
        peer.is_some_and(|ip| self.allow_list.contains(&ip)) && self.is_allow_listed(client_ip)
    }

    /// Check `identifier` against `tier` at the current time
    pub async fn check(&self, identifier: &str, tier: RateLimitTier) -> RateLimitDecision {
        self.check_at(identifier, tier, now_ms()).await
    }

    /// Check `identifier` against `tier` as if the clock read `now_ms`
    pub async fn check_at(
        &self,
        identifier: &str,
        tier: RateLimitTier,
        now_ms: u64,
    ) -> RateLimitDecision {
        let policy = self.tiers.get(tier);
        let window_ms = policy.window_ms();
        let key = format!("rate_limit:{}:{}", tier, identifier);
        let member = format!("{}-{}", now_ms, Uuid::new_v4());
        let reset_ms = now_ms + window_ms;

        let hit = tokio::time::timeout(
            self.store_timeout,
            self.store.hit(&key, now_ms, window_ms, &member),
        )
        .await
        .unwrap_or_else(|_| {
            Err(WindowStoreError::Unavailable(format!(
                "timed out after {}ms",
                self.store_timeout.as_millis()
            )))
        });

        let count = match hit {
            Ok(count) => count,
            Err(e) => return self.store_failure(&key, tier, policy, reset_ms, e),
        };

        let max = u64::from(policy.max_requests);
        let allowed = count < max;
        if !allowed {
            self.remove_member(&key, &member).await;
            debug!(key = %key, count, "Rate limit exceeded");
        }

        RateLimitDecision {
            allowed,
            limit: policy.max_requests,
            remaining: max.saturating_sub(count + 1) as u32,
            reset_ms,
        }
    }

    fn store_failure(
        &self,
        key: &str,
        tier: RateLimitTier,
        policy: &TierPolicy,
        reset_ms: u64,
        error: WindowStoreError,
    ) -> RateLimitDecision {
        match policy.failure_mode {
            FailureMode::Open => {
                warn!(error = %error, key = %key, tier = %tier, "Rate limit store failed, admitting request");
                RateLimitDecision {
                    allowed: true,
                    limit: policy.max_requests,
                    remaining: policy.max_requests,
                    reset_ms,
                }
            }
            FailureMode::Closed => {
                warn!(error = %error, key = %key, tier = %tier, "Rate limit store failed, rejecting request");
                RateLimitDecision {
                    allowed: false,
                    limit: policy.max_requests,
                    remaining: 0,
                    reset_ms,
                }
            }
        }
    }

    async fn remove_member(&self, key: &str, member: &str) {
        match tokio::time::timeout(self.store_timeout, self.store.remove(key, member)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, key = %key, "Failed to remove rejected rate limit member"),
            Err(_) => warn!(key = %key, "Timed out removing rejected rate limit member"),
        }
    }
}

/// Extract client IP from proxy headers, then the peer address
///
/// Order: first valid `X-Forwarded-For` entry, `X-Real-IP`, the socket
/// peer, and finally the literal `unknown`.
pub fn extract_client_ip(
    headers: &HeaderMap,
    connect_info: Option<&ConnectInfo<SocketAddr>>,
) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        if let Ok(value) = forwarded.to_str() {
            if let Some(ip) = value.split(',').next() {
                let ip = ip.trim();
                if ip.parse::<IpAddr>().is_ok() {
                    return ip.to_string();
                }
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(value) = real_ip.to_str() {
            let ip = value.trim();
            if ip.parse::<IpAddr>().is_ok() {
                return ip.to_string();
            }
        }
    }

    if let Some(connect_info) = connect_info {
        return connect_info.0.ip().to_string();
    }

    "unknown".to_string()
}

/// Middleware state: the shared limiter plus the tier this layer enforces
#[derive(Clone)]
pub struct TierLimit {
    pub limiter: RateLimiter,
    pub tier: RateLimitTier,
}

impl TierLimit {
    pub fn new(limiter: RateLimiter, tier: RateLimitTier) -> Self {
        Self { limiter, tier }
    }
}

/// Rate-limit middleware for one tier
///
/// Use with `axum::middleware::from_fn_with_state(TierLimit::new(..), rate_limit)`.
/// Headers are only set when absent, so when several tiers wrap a route
/// the innermost one reports.
pub async fn rate_limit(State(state): State<TierLimit>, request: Request, next: Next) -> Response {
    let connect_info = request.extensions().get::<ConnectInfo<SocketAddr>>();
    let client_ip = extract_client_ip(request.headers(), connect_info);
    let peer = connect_info.map(|info| info.0.ip());

    if state.limiter.is_exempt(peer, &client_ip) {
        return next.run(request).await;
    }

    let identifier = match (state.tier, request.extensions().get::<Identity>()) {
        (RateLimitTier::Authenticated, Some(identity)) => format!("user:{}", identity.id),
        _ => format!("ip:{}", client_ip),
    };

    let decision = state.limiter.check(&identifier, state.tier).await;

    let mut response = if decision.allowed {
        next.run(request).await
    } else {
        let policy = state.limiter.tiers().get(state.tier);
        debug!(
            identifier = %identifier,
            tier = %state.tier,
            "Rate limit exceeded"
        );
        ApiError::RateLimited {
            retry_after: policy.window_secs(),
            message: policy.message.clone(),
        }
        .into_response()
    };

    set_rate_limit_headers(response.headers_mut(), &decision);
    response
}

fn set_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    if headers.contains_key(&X_RATELIMIT_LIMIT) {
        return;
    }
    headers.insert(X_RATELIMIT_LIMIT.clone(), HeaderValue::from(decision.limit));
    headers.insert(
        X_RATELIMIT_REMAINING.clone(),
        HeaderValue::from(decision.remaining),
    );
    headers.insert(
        X_RATELIMIT_RESET.clone(),
        HeaderValue::from(decision.reset_secs()),
    );
}
