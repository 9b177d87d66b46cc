//! Configuration management for the courier service.
//!
//! Configuration is loaded in priority order:
//!
//! 1. Environment variables (highest priority)
//! 2. Configuration file (`config.toml`)
//! 3. Built-in defaults (lowest priority)
//!
//! The service runs out of the box against local Postgres and Redis; use
//! environment variables for deployment-specific overrides.

use std::{net::SocketAddr, time::Duration};

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use courier_dispatch::{client::WebhookConfig, scheduler::SchedulerConfig};

const CONFIG_FILE: &str = "config.toml";

/// Complete service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Database
    /// PostgreSQL host. Environment variable: `DB_HOST`.
    #[serde(default = "default_db_host")]
    pub db_host: String,
    /// PostgreSQL port. Environment variable: `DB_PORT`.
    #[serde(default = "default_db_port")]
    pub db_port: u16,
    /// PostgreSQL user. Environment variable: `DB_USER`.
    #[serde(default = "default_db_user")]
    pub db_user: String,
    /// PostgreSQL password. Environment variable: `DB_PASSWORD`.
    #[serde(default = "default_db_password")]
    pub db_password: String,
    /// Database name. Environment variable: `DB_NAME`.
    #[serde(default = "default_db_name")]
    pub db_name: String,
    /// SSL mode passed through to the connection string. `DB_SSL_MODE`.
    #[serde(default = "default_db_ssl_mode")]
    pub db_ssl_mode: String,
    /// Maximum pool connections. `DB_MAX_OPEN_CONNS`.
    #[serde(default = "default_db_max_open_conns")]
    pub db_max_open_conns: u32,
    /// Minimum idle pool connections. `DB_MAX_IDLE_CONNS`.
    #[serde(default = "default_db_max_idle_conns")]
    pub db_max_idle_conns: u32,
    /// Maximum connection lifetime in seconds. `DB_CONN_MAX_LIFETIME_SECONDS`.
    #[serde(default = "default_db_conn_max_lifetime")]
    pub db_conn_max_lifetime_seconds: u64,

    // Redis
    /// Redis host. `REDIS_HOST`.
    #[serde(default = "default_redis_host")]
    pub redis_host: String,
    /// Redis port. `REDIS_PORT`.
    #[serde(default = "default_redis_port")]
    pub redis_port: u16,
    /// Redis password; empty disables auth. `REDIS_PASSWORD`.
    #[serde(default)]
    pub redis_password: String,
    /// Redis logical database. `REDIS_DB`.
    #[serde(default)]
    pub redis_db: i64,
    /// TTL of sent-send cache entries, in hours. `REDIS_CACHE_TTL_HOURS`.
    #[serde(default = "default_redis_cache_ttl_hours")]
    pub redis_cache_ttl_hours: u64,

    // Application
    /// HTTP listen port. `APP_PORT`.
    #[serde(default = "default_app_port")]
    pub app_port: u16,
    /// Deployment environment label. `APP_ENV`.
    #[serde(default = "default_app_env")]
    pub app_env: String,
    /// Log filter when `RUST_LOG` is not set. `LOG_LEVEL`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Grace period for in-flight requests on shutdown.
    /// `GRACEFUL_SHUTDOWN_TIMEOUT_SECONDS`.
    #[serde(default = "default_graceful_shutdown_timeout")]
    pub graceful_shutdown_timeout_seconds: u64,
    /// Bearer token guarding the administrative API; empty leaves the API
    /// open. `API_TOKEN`.
    #[serde(default)]
    pub api_token: String,

    // Message processing
    /// Messages claimed per cycle. `MESSAGE_BATCH_SIZE`.
    #[serde(default = "default_message_batch_size")]
    pub message_batch_size: usize,
    /// Seconds between cycles. `MESSAGE_INTERVAL_SECONDS`.
    #[serde(default = "default_message_interval_seconds")]
    pub message_interval_seconds: u64,
    /// Attempt budget per message. `MESSAGE_MAX_RETRIES`.
    #[serde(default = "default_message_max_retries")]
    pub message_max_retries: i32,
    /// Content length bound in characters. `MESSAGE_CHAR_LIMIT`.
    #[serde(default = "default_message_char_limit")]
    pub message_char_limit: usize,
    /// Concurrent workers per cycle. `MESSAGE_WORKER_COUNT`.
    #[serde(default = "default_message_worker_count")]
    pub message_worker_count: usize,

    // Webhook
    /// Delivery endpoint URL. `WEBHOOK_URL`.
    #[serde(default = "default_webhook_url")]
    pub webhook_url: String,
    /// Value of the `x-ins-auth-key` header. `WEBHOOK_AUTH_KEY`.
    #[serde(default = "default_webhook_auth_key")]
    pub webhook_auth_key: String,
    /// Per-request timeout in seconds. `WEBHOOK_TIMEOUT_SECONDS`.
    #[serde(default = "default_webhook_timeout_seconds")]
    pub webhook_timeout_seconds: u64,
    /// Token-bucket rate and burst. `WEBHOOK_RATE_LIMIT_PER_SECOND`.
    #[serde(default = "default_webhook_rate_limit")]
    pub webhook_rate_limit_per_second: u32,

    // Seed utility
    /// Messages inserted by the seed binary. `SEED_MESSAGE_COUNT`.
    #[serde(default = "default_seed_message_count")]
    pub seed_message_count: usize,
}

impl Config {
    /// Loads configuration from defaults, `config.toml`, and the
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns an error when extraction fails or validation rejects the
    /// merged values.
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(""));

        let config: Self = figment.extract().context("failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Postgres connection string assembled from the parts.
    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.db_user, self.db_password, self.db_host, self.db_port, self.db_name,
            self.db_ssl_mode
        )
    }

    /// Connection string with the password masked for logging.
    pub fn database_url_masked(&self) -> String {
        format!(
            "postgres://{}:***@{}:{}/{}?sslmode={}",
            self.db_user, self.db_host, self.db_port, self.db_name, self.db_ssl_mode
        )
    }

    /// Redis connection URL.
    pub fn redis_url(&self) -> String {
        if self.redis_password.is_empty() {
            format!("redis://{}:{}/{}", self.redis_host, self.redis_port, self.redis_db)
        } else {
            format!(
                "redis://:{}@{}:{}/{}",
                self.redis_password, self.redis_host, self.redis_port, self.redis_db
            )
        }
    }

    /// TTL applied to sent-send cache entries.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.redis_cache_ttl_hours * 60 * 60)
    }

    /// Maximum connection lifetime for the pool.
    pub fn db_conn_max_lifetime(&self) -> Duration {
        Duration::from_secs(self.db_conn_max_lifetime_seconds)
    }

    /// Grace period for shutdown.
    pub fn graceful_shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.graceful_shutdown_timeout_seconds)
    }

    /// The bearer token, or `None` when the API is open.
    pub fn api_token(&self) -> Option<String> {
        if self.api_token.is_empty() {
            None
        } else {
            Some(self.api_token.clone())
        }
    }

    /// Converts to the webhook client's configuration.
    pub fn webhook_config(&self) -> WebhookConfig {
        WebhookConfig {
            url: self.webhook_url.clone(),
            auth_key: self.webhook_auth_key.clone(),
            timeout: Duration::from_secs(self.webhook_timeout_seconds),
            rate_limit_per_second: self.webhook_rate_limit_per_second,
        }
    }

    /// Converts to the scheduler's configuration.
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            batch_size: self.message_batch_size,
            interval: Duration::from_secs(self.message_interval_seconds),
            worker_count: self.message_worker_count,
        }
    }

    /// Socket address the HTTP server binds to.
    ///
    /// # Errors
    ///
    /// Returns an error when the port does not form a valid address.
    pub fn server_addr(&self) -> Result<SocketAddr> {
        format!("0.0.0.0:{}", self.app_port).parse().context("invalid server address")
    }

    fn validate(&self) -> Result<()> {
        if self.db_host.is_empty() {
            anyhow::bail!("DB_HOST is required");
        }
        if self.db_user.is_empty() {
            anyhow::bail!("DB_USER is required");
        }
        if self.db_name.is_empty() {
            anyhow::bail!("DB_NAME is required");
        }
        if self.webhook_url.is_empty() {
            anyhow::bail!("WEBHOOK_URL is required");
        }
        if self.webhook_auth_key.is_empty() {
            anyhow::bail!("WEBHOOK_AUTH_KEY is required");
        }
        if self.message_batch_size < 1 {
            anyhow::bail!("MESSAGE_BATCH_SIZE must be at least 1");
        }
        if self.message_interval_seconds < 1 {
            anyhow::bail!("MESSAGE_INTERVAL_SECONDS must be at least 1");
        }
        if self.message_char_limit < 1 {
            anyhow::bail!("MESSAGE_CHAR_LIMIT must be at least 1");
        }
        if self.message_max_retries < 1 {
            anyhow::bail!("MESSAGE_MAX_RETRIES must be at least 1");
        }
        if self.message_worker_count < 1 {
            anyhow::bail!("MESSAGE_WORKER_COUNT must be at least 1");
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_host: default_db_host(),
            db_port: default_db_port(),
            db_user: default_db_user(),
            db_password: default_db_password(),
            db_name: default_db_name(),
            db_ssl_mode: default_db_ssl_mode(),
            db_max_open_conns: default_db_max_open_conns(),
            db_max_idle_conns: default_db_max_idle_conns(),
            db_conn_max_lifetime_seconds: default_db_conn_max_lifetime(),
            redis_host: default_redis_host(),
            redis_port: default_redis_port(),
            redis_password: String::new(),
            redis_db: 0,
            redis_cache_ttl_hours: default_redis_cache_ttl_hours(),
            app_port: default_app_port(),
            app_env: default_app_env(),
            log_level: default_log_level(),
            graceful_shutdown_timeout_seconds: default_graceful_shutdown_timeout(),
            api_token: String::new(),
            message_batch_size: default_message_batch_size(),
            message_interval_seconds: default_message_interval_seconds(),
            message_max_retries: default_message_max_retries(),
            message_char_limit: default_message_char_limit(),
            message_worker_count: default_message_worker_count(),
            webhook_url: default_webhook_url(),
            webhook_auth_key: default_webhook_auth_key(),
            webhook_timeout_seconds: default_webhook_timeout_seconds(),
            webhook_rate_limit_per_second: default_webhook_rate_limit(),
            seed_message_count: default_seed_message_count(),
        }
    }
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    5432
}

fn default_db_user() -> String {
    "courier".to_string()
}

fn default_db_password() -> String {
    "courier".to_string()
}

fn default_db_name() -> String {
    "courier".to_string()
}

fn default_db_ssl_mode() -> String {
    "disable".to_string()
}

fn default_db_max_open_conns() -> u32 {
    25
}

fn default_db_max_idle_conns() -> u32 {
    5
}

fn default_db_conn_max_lifetime() -> u64 {
    300
}

fn default_redis_host() -> String {
    "localhost".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_redis_cache_ttl_hours() -> u64 {
    168
}

fn default_app_port() -> u16 {
    8080
}

fn default_app_env() -> String {
    "development".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_graceful_shutdown_timeout() -> u64 {
    30
}

fn default_message_batch_size() -> usize {
    2
}

fn default_message_interval_seconds() -> u64 {
    10
}

fn default_message_max_retries() -> i32 {
    3
}

fn default_message_char_limit() -> usize {
    160
}

fn default_message_worker_count() -> usize {
    5
}

fn default_webhook_url() -> String {
    "http://localhost:9090/webhook".to_string()
}

fn default_webhook_auth_key() -> String {
    "dev-auth-key".to_string()
}

fn default_webhook_timeout_seconds() -> u64 {
    30
}

fn default_webhook_rate_limit() -> u32 {
    10
}

fn default_seed_message_count() -> usize {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.message_char_limit, 160);
        assert_eq!(config.message_max_retries, 3);
        assert_eq!(config.redis_cache_ttl_hours, 168);
    }

    #[test]
    fn invalid_values_rejected() {
        let config = Config { message_batch_size: 0, ..Default::default() };
        assert!(config.validate().is_err());

        let config = Config { message_worker_count: 0, ..Default::default() };
        assert!(config.validate().is_err());

        let config = Config { webhook_url: String::new(), ..Default::default() };
        assert!(config.validate().is_err());

        let config = Config { message_char_limit: 0, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn database_url_masks_password() {
        let config = Config { db_password: "secret123".to_string(), ..Default::default() };
        assert!(config.database_url().contains("secret123"));
        let masked = config.database_url_masked();
        assert!(!masked.contains("secret123"));
        assert!(masked.contains("***"));
    }

    #[test]
    fn redis_url_includes_password_only_when_set() {
        let config = Config::default();
        assert_eq!(config.redis_url(), "redis://localhost:6379/0");

        let config = Config { redis_password: "hunter2".to_string(), ..Default::default() };
        assert_eq!(config.redis_url(), "redis://:hunter2@localhost:6379/0");
    }

    #[test]
    fn empty_api_token_means_open_api() {
        assert!(Config::default().api_token().is_none());

        let config = Config { api_token: "tok".to_string(), ..Default::default() };
        assert_eq!(config.api_token().as_deref(), Some("tok"));
    }

    #[test]
    fn cache_ttl_converts_hours() {
        let config = Config { redis_cache_ttl_hours: 2, ..Default::default() };
        assert_eq!(config.cache_ttl(), Duration::from_secs(7200));
    }
}
