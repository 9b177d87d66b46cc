//! Seed utility: inserts a batch of pending messages for load exercising.
//!
//! Count comes from `SEED_MESSAGE_COUNT` (default 100). Run against the
//! same configuration as the service.

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use courier_api::Config;
use courier_core::{
    models::{Message, MessageContent, PhoneNumber},
    storage::{MessageStore, PgMessageStore},
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let config = Config::load()?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url())
        .await
        .context("failed to connect to database")?;

    sqlx::migrate!("./migrations").run(&pool).await.context("failed to run migrations")?;

    let store = PgMessageStore::new(pool.clone(), config.message_char_limit);

    let count = config.seed_message_count;
    info!(count, "seeding pending messages");

    for i in 0..count {
        let phone = PhoneNumber::parse(&format!("+9055512{:05}", i % 100_000))
            .context("seed phone number must be valid")?;
        let content = MessageContent::parse(
            &format!("Seed message {i}"),
            config.message_char_limit,
        )
        .context("seed content must be valid")?;

        let message = Message::new(phone, content, config.message_max_retries);
        store.create(&message).await.context("failed to insert seed message")?;
    }

    info!(count, "seeding complete");

    pool.close().await;
    Ok(())
}
