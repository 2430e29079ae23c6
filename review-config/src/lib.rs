//! Environment-variable configuration for the review service.
//!
//! Resolution order (lowest to highest priority):
//! 1. `.env` file in the working directory, if present (never overwrites an
//!    already-set environment variable).
//! 2. Process environment variables.
//!
//! There is no YAML layer here — unlike the web-framework side of this
//! workspace, this service's original source is a flat `pydantic-settings`
//! `BaseSettings`, and this loader mirrors that one-to-one rather than
//! introducing profile files this service has no use for.

pub mod error;

pub use error::ConfigError;

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Settings {
    pub db_host: String,
    pub db_port: u16,
    pub db_user: String,
    pub db_password: String,
    pub db_name: String,

    pub redis_host: String,
    pub redis_port: u16,
    pub redis_db: u8,
    pub redis_user: Option<String>,
    pub redis_password: Option<String>,

    pub redis_stream_key: String,
    pub redis_consumer_group: String,
    pub redis_consumer_name: String,
    pub redis_rules_channel: String,
    pub redis_action_stream_key: String,

    pub batch_size: usize,
    pub worker_concurrency: usize,
    pub enable_stream_recovery: bool,
    pub stream_recovery_interval: Duration,
    pub stream_min_idle_time: Duration,
    pub rule_sync_interval: Duration,

    pub rpc_enabled: bool,
    pub rpc_url: String,
    pub rpc_timeout: Duration,

    pub log_level: String,
    pub log_format: String,
}

impl Settings {
    /// Load settings from `.env` (if present) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!(path = %path.display(), "loaded .env file"),
            Err(dotenvy::Error::Io(_)) => {}
            Err(e) => tracing::warn!(error = %e, "failed parsing .env file"),
        }

        Ok(Settings {
            db_host: env_or("DB_HOST", "localhost"),
            db_port: env_parsed_or("DB_PORT", 5432)?,
            db_user: env_or("DB_USER", "postgres"),
            db_password: env_or("DB_PASSWORD", ""),
            db_name: env_or("DB_NAME", "review"),

            redis_host: env_or("REDIS_HOST", "localhost"),
            redis_port: env_parsed_or("REDIS_PORT", 6379)?,
            redis_db: env_parsed_or("REDIS_DB", 0)?,
            redis_user: env::var("REDIS_USER").ok(),
            redis_password: env::var("REDIS_PASSWORD").ok(),

            redis_stream_key: env_or("REDIS_STREAM_KEY", "scraper:tieba:events"),
            redis_consumer_group: env_or("REDIS_CONSUMER_GROUP", "reviewer_group"),
            redis_consumer_name: env_or("REDIS_CONSUMER_NAME", "reviewer_worker_1"),
            redis_rules_channel: env_or("REDIS_RULES_CHANNEL", "reviewer:rules:update"),
            redis_action_stream_key: env_or("REDIS_ACTION_STREAM_KEY", "reviewer:actions:stream"),

            batch_size: env_parsed_or("BATCH_SIZE", 10)?,
            worker_concurrency: env_parsed_or("WORKER_CONCURRENCY", 10)?,
            enable_stream_recovery: env_parsed_or("ENABLE_STREAM_RECOVERY", false)?,
            stream_recovery_interval: Duration::from_secs(env_parsed_or("STREAM_RECOVERY_INTERVAL", 60)?),
            stream_min_idle_time: Duration::from_millis(env_parsed_or("STREAM_MIN_IDLE_TIME", 60_000)?),
            rule_sync_interval: Duration::from_secs(env_parsed_or("RULE_SYNC_INTERVAL", 300)?),

            rpc_enabled: env_parsed_or("RPC_ENABLED", false)?,
            rpc_url: env_or("RPC_URL", "http://localhost:50051"),
            rpc_timeout: Duration::from_secs(env_parsed_or("RPC_TIMEOUT", 5)?),

            log_level: env_or("LOG_LEVEL", "info"),
            log_format: env_or("LOG_FORMAT", "pretty"),
        })
    }

    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            urlencode(&self.db_user),
            urlencode(&self.db_password),
            self.db_host,
            self.db_port,
            self.db_name
        )
    }

    pub fn redis_url(&self) -> String {
        let auth = match (&self.redis_user, &self.redis_password) {
            (Some(u), Some(p)) => format!("{}:{}@", urlencode(u), urlencode(p)),
            (None, Some(p)) => format!(":{}@", urlencode(p)),
            _ => String::new(),
        };
        format!("redis://{auth}{}:{}/{}", self.redis_host, self.redis_port, self.redis_db)
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + Copy,
{
    match env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value: raw,
            expected: std::any::type_name::<T>(),
        }),
        Err(_) => Ok(default),
    }
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_apply_when_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        for key in ["DB_HOST", "BATCH_SIZE", "RPC_ENABLED"] {
            env::remove_var(key);
        }
        let settings = Settings::load().unwrap();
        assert_eq!(settings.db_host, "localhost");
        assert_eq!(settings.batch_size, 10);
        assert!(!settings.rpc_enabled);
    }

    #[test]
    fn redis_url_percent_encodes_credentials() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("REDIS_USER", "a user");
        env::set_var("REDIS_PASSWORD", "p@ss");
        let settings = Settings::load().unwrap();
        assert!(settings.redis_url().contains("a%20user:p%40ss@"));
        env::remove_var("REDIS_USER");
        env::remove_var("REDIS_PASSWORD");
    }
}
