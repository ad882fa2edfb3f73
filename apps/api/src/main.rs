use std::net::SocketAddr;
use std::sync::Arc;

use redis::aio::MultiplexedConnection;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use linkhoard_api::config::Config;
use linkhoard_api::middleware::{
    BodyLimit, InMemoryWindowStore, RateLimiter, RedisWindowStore, RequestIdConfig,
    SecurityHeadersConfig, SecurityPipeline, WindowStore,
};
use linkhoard_api::repositories::{PgRefreshTokenStore, PgUserRepository};
use linkhoard_api::routes::{build_app, AppState};
use linkhoard_api::services::{spawn_purge_task, AuthService, HealthService, TokenService};

/// Open Redis and confirm it answers PING within the configured timeout
async fn connect_redis(config: &Config) -> Option<(redis::Client, MultiplexedConnection)> {
    let redis_url = config.redis().connection_url();
    let client = match redis::Client::open(redis_url.as_str()) {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(error = %e, "Redis client creation failed");
            return None;
        }
    };

    let connect = async {
        let mut conn = client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok::<_, redis::RedisError>(conn)
    };

    match tokio::time::timeout(config.redis().connect_timeout(), connect).await {
        Ok(Ok(conn)) => {
            tracing::info!("Redis connected for rate limiting");
            Some((client, conn))
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Redis connection failed");
            None
        }
        Err(_) => {
            tracing::warn!("Redis connection timed out");
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "linkhoard_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    tracing::info!(
        environment = %config.environment(),
        "Starting Linkhoard API server on port {}",
        config.port
    );

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.database().max_connections)
        .acquire_timeout(std::time::Duration::from_secs(
            config.database().connect_timeout_secs,
        ))
        .connect(&config.database().url)
        .await?;
    tracing::info!("Database connection established");

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Migrations completed successfully");

    let users = Arc::new(PgUserRepository::new(pool.clone()));
    let refresh_tokens = Arc::new(PgRefreshTokenStore::new(pool.clone()));

    let tokens = TokenService::new(config.token_config());
    let auth_service = AuthService::new(tokens, users, refresh_tokens.clone())?;
    tracing::info!(
        access_ttl_secs = auth_service.tokens().access_ttl_secs(),
        refresh_ttl_secs = auth_service.tokens().refresh_ttl_secs(),
        "AuthService initialized"
    );

    let purge_task = spawn_purge_task(refresh_tokens, config.token_purge_interval);

    let redis = connect_redis(&config).await;
    let (window_store, health_redis) = match redis {
        Some((client, conn)) => (
            Arc::new(RedisWindowStore::new(client)) as Arc<dyn WindowStore>,
            Some(conn),
        ),
        None => {
            tracing::warn!(
                "Rate limiting falls back to a per-process in-memory store. \
                 Configure Redis (REDIS_URL) to share limits across instances."
            );
            (Arc::new(InMemoryWindowStore::new()) as Arc<dyn WindowStore>, None)
        }
    };

    let limiter = RateLimiter::new(window_store, config.rate_limit_tiers())
        .with_store_timeout(config.rate_limit_store_timeout);

    let security_headers = if config.is_production() {
        SecurityHeadersConfig::production()
    } else {
        SecurityHeadersConfig::development()
    }
    .with_hsts(config.enable_hsts);

    let pipeline = SecurityPipeline::new(limiter.clone(), config.cors_allowed_origins.clone())
        .with_request_id(RequestIdConfig {
            expose_internal_errors: !config.is_production(),
        })
        .with_security_headers(security_headers)
        .with_body_limit(BodyLimit::new(config.max_body_bytes));

    let state = AppState::new(
        auth_service,
        limiter,
        HealthService::new(Some(pool), health_redis),
    );
    let app = build_app(state, pipeline);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    purge_task.abort();
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
