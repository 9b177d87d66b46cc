//! Courier outbound message dispatch service.
//!
//! Entry point: wires configuration, Postgres, Redis, the dispatch service,
//! the scheduler, and the HTTP surface, then coordinates graceful startup
//! and shutdown. Shutdown order matters: the scheduler drains its in-flight
//! cycle (committing or rolling back batch transactions) before the HTTP
//! server stops and the pools close.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use courier_api::{AppState, Config};
use courier_core::{cache::RedisSentCache, storage::PgMessageStore, time::SystemClock};
use courier_dispatch::{client::WebhookClient, scheduler::Scheduler, service::MessageService};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config.log_level);

    info!(
        database_url = %config.database_url_masked(),
        app_env = %config.app_env,
        "starting courier message dispatch service"
    );

    let pool = create_database_pool(&config).await?;
    info!("database connection pool established");

    sqlx::migrate!("./migrations").run(&pool).await.context("failed to run migrations")?;
    info!("database migrations completed");

    let cache = RedisSentCache::connect(&config.redis_url(), config.cache_ttl())
        .await
        .context("failed to connect to redis")?;
    info!("connected to redis cache");

    let store = PgMessageStore::new(pool.clone(), config.message_char_limit);
    let webhook =
        WebhookClient::new(config.webhook_config()).context("failed to build webhook client")?;

    let service = Arc::new(MessageService::new(
        Arc::new(store.clone()),
        Arc::new(cache.clone()),
        Arc::new(webhook),
        config.message_char_limit,
        config.message_max_retries,
    ));

    let scheduler = Arc::new(Scheduler::new(
        service.clone(),
        config.scheduler_config(),
        Arc::new(SystemClock::new()),
    ));

    let state = AppState { service, scheduler: scheduler.clone(), store, cache };
    let router = courier_api::create_router(state, config.api_token());

    let addr = config.server_addr()?;
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(courier_api::serve(addr, router, shutdown.clone()));

    info!(%addr, "courier is ready");

    shutdown_signal().await;
    info!("shutdown signal received, starting graceful shutdown");

    // Scheduler first: its workers hold row locks that must be released
    // before the process exits.
    if let Err(e) = scheduler.stop().await {
        error!(error = %e, "scheduler did not stop cleanly");
    }

    shutdown.cancel();
    match tokio::time::timeout(config.graceful_shutdown_timeout(), server).await {
        Ok(Ok(Ok(()))) => info!("server stopped"),
        Ok(Ok(Err(e))) => error!(error = %e, "server failed"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => info!("shutdown grace period expired"),
    }

    pool.close().await;
    info!("database connections closed");

    info!("courier shutdown complete");
    Ok(())
}

/// Initializes tracing with environment-based configuration.
///
/// `RUST_LOG` wins when set; otherwise the configured log level applies to
/// the courier crates with `info` elsewhere.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("info,courier={log_level}")))
        .expect("invalid log filter");

    let fmt_layer = fmt::layer().with_target(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Creates the database connection pool with bounded startup retries.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    let mut retries = 0;
    loop {
        match PgPoolOptions::new()
            .max_connections(config.db_max_open_conns)
            .min_connections(config.db_max_idle_conns)
            .acquire_timeout(Duration::from_secs(10))
            .max_lifetime(config.db_conn_max_lifetime())
            .connect(&config.database_url())
            .await
        {
            Ok(pool) => {
                sqlx::query("SELECT 1")
                    .fetch_one(&pool)
                    .await
                    .context("failed to verify database connection")?;
                return Ok(pool);
            },
            Err(_) if retries < MAX_RETRIES => {
                retries += 1;
                info!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    "database connection failed, retrying"
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("failed to create database connection pool after retries");
            },
        }
    }
}

/// Waits for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received CTRL+C");
        },
        () = terminate => {
            info!("received SIGTERM");
        },
    }
}
