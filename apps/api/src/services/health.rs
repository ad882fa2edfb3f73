//! Dependency checks for the readiness probe
//!
//! - PostgreSQL (token store and user lookups)
//! - Redis (rate-limit windows)
//!
//! A dependency that is not configured is reported as skipped, not
//! unhealthy; the in-memory stores stand in for it.

use std::time::{Duration, Instant};

use redis::aio::MultiplexedConnection;
use serde::Serialize;
use sqlx::PgPool;

/// Upper bound on a single dependency check
const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Status of an individual service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Healthy,
    Unhealthy,
    /// Not configured; an in-memory fallback is in use
    Skipped,
}

/// Result of a single service health check
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealth {
    pub name: &'static str,
    pub status: ServiceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServiceHealth {
    pub fn healthy(name: &'static str, response_time: Duration) -> Self {
        Self {
            name,
            status: ServiceStatus::Healthy,
            response_time_ms: Some(response_time.as_millis() as u64),
            error: None,
        }
    }

    pub fn unhealthy(name: &'static str, error: impl Into<String>, response_time: Duration) -> Self {
        Self {
            name,
            status: ServiceStatus::Unhealthy,
            response_time_ms: Some(response_time.as_millis() as u64),
            error: Some(error.into()),
        }
    }

    pub fn skipped(name: &'static str) -> Self {
        Self {
            name,
            status: ServiceStatus::Skipped,
            response_time_ms: None,
            error: None,
        }
    }
}

/// Aggregated health check response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResponse {
    /// Healthy only if every configured service is healthy
    pub status: ServiceStatus,
    pub services: Vec<ServiceHealth>,
    pub total_time_ms: u64,
    pub version: &'static str,
}

impl HealthCheckResponse {
    pub fn new(services: Vec<ServiceHealth>, total_time: Duration) -> Self {
        let status = if services.iter().all(|s| s.status != ServiceStatus::Unhealthy) {
            ServiceStatus::Healthy
        } else {
            ServiceStatus::Unhealthy
        };

        Self {
            status,
            services,
            total_time_ms: total_time.as_millis() as u64,
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == ServiceStatus::Healthy
    }
}

/// Checks the backends the admission layer depends on
#[derive(Clone, Default)]
pub struct HealthService {
    pool: Option<PgPool>,
    redis: Option<MultiplexedConnection>,
}

impl HealthService {
    pub fn new(pool: Option<PgPool>, redis: Option<MultiplexedConnection>) -> Self {
        Self { pool, redis }
    }

    /// Check PostgreSQL connectivity
    pub async fn check_database(&self) -> ServiceHealth {
        let Some(pool) = &self.pool else {
            return ServiceHealth::skipped("database");
        };

        let start = Instant::now();
        let query = sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(pool);
        match tokio::time::timeout(CHECK_TIMEOUT, query).await {
            Ok(Ok(_)) => ServiceHealth::healthy("database", start.elapsed()),
            Ok(Err(e)) => {
                ServiceHealth::unhealthy("database", format!("Query failed: {}", e), start.elapsed())
            }
            Err(_) => ServiceHealth::unhealthy("database", "Query timed out", start.elapsed()),
        }
    }

    /// Check Redis connectivity with a PING
    pub async fn check_redis(&self) -> ServiceHealth {
        let Some(conn) = &self.redis else {
            return ServiceHealth::skipped("redis");
        };

        let start = Instant::now();
        let mut conn = conn.clone();
        let cmd = redis::cmd("PING");
        let ping = cmd.query_async::<_, String>(&mut conn);
        match tokio::time::timeout(CHECK_TIMEOUT, ping).await {
            Ok(Ok(response)) if response == "PONG" => {
                ServiceHealth::healthy("redis", start.elapsed())
            }
            Ok(Ok(response)) => ServiceHealth::unhealthy(
                "redis",
                format!("Unexpected PING response: {}", response),
                start.elapsed(),
            ),
            Ok(Err(e)) => {
                ServiceHealth::unhealthy("redis", format!("PING failed: {}", e), start.elapsed())
            }
            Err(_) => ServiceHealth::unhealthy("redis", "PING timed out", start.elapsed()),
        }
    }

    /// Run all checks concurrently
    pub async fn check_all(&self) -> HealthCheckResponse {
        let start = Instant::now();
        let (database, redis) = tokio::join!(self.check_database(), self.check_redis());
        HealthCheckResponse::new(vec![database, redis], start.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overall_status() {
        let healthy = HealthCheckResponse::new(
            vec![
                ServiceHealth::healthy("database", Duration::from_millis(3)),
                ServiceHealth::skipped("redis"),
            ],
            Duration::from_millis(3),
        );
        assert!(healthy.is_healthy());

        let unhealthy = HealthCheckResponse::new(
            vec![
                ServiceHealth::healthy("database", Duration::from_millis(3)),
                ServiceHealth::unhealthy("redis", "PING failed", Duration::from_millis(1)),
            ],
            Duration::from_millis(4),
        );
        assert!(!unhealthy.is_healthy());
    }

    #[tokio::test]
    async fn test_unconfigured_services_are_skipped() {
        let response = HealthService::default().check_all().await;
        assert!(response.is_healthy());
        assert!(response
            .services
            .iter()
            .all(|s| s.status == ServiceStatus::Skipped));
    }
}
