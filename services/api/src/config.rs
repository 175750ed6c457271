//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use reading_log_core::streak::ReadingCalendar;
use reading_log_core::RateLimitPolicy;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Where push notifications are delivered.
#[derive(Clone, Debug)]
pub struct PushConfig {
    pub endpoint: String,
    pub server_key: String,
    /// Upper bound on one delivery request, connect included.
    pub timeout: Duration,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// `None` runs the service on the in-memory store.
    pub database_url: Option<String>,
    pub log_level: Level,
    pub db_max_connections: u32,
    pub calendar: ReadingCalendar,
    pub verify_rate_limit: RateLimitPolicy,
    /// `None` logs and drops outgoing notifications.
    pub push: Option<PushConfig>,
    pub cors_origin: String,
    /// Shared secret the event runtime and scheduler present on `/triggers`
    /// and `/jobs`.
    pub internal_secret: String,
    /// Take the client address from `X-Forwarded-For`. Enable only behind a
    /// proxy that overwrites the header.
    pub trust_proxy_headers: bool,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Server and Database Settings ---
        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url = std::env::var("DATABASE_URL").ok().filter(|url| !url.is_empty());
        let db_max_connections = parse_var("DB_MAX_CONNECTIONS", 5u32)?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Load Domain Settings ---
        let offset_minutes = parse_var("REFERENCE_UTC_OFFSET_MINUTES", 0i32)?;
        let calendar = ReadingCalendar::from_offset_minutes(offset_minutes).ok_or_else(|| {
            ConfigError::InvalidValue(
                "REFERENCE_UTC_OFFSET_MINUTES".to_string(),
                format!("{} minutes is not a valid UTC offset", offset_minutes),
            )
        })?;

        let max_attempts = parse_var("VERIFY_RATE_LIMIT_MAX", 10u32)?;
        let window_secs = parse_var("VERIFY_RATE_LIMIT_WINDOW_SECS", 60u32)?;
        if max_attempts == 0 || window_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "VERIFY_RATE_LIMIT_MAX/VERIFY_RATE_LIMIT_WINDOW_SECS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }
        let verify_rate_limit = RateLimitPolicy {
            max_attempts,
            window: chrono::Duration::seconds(i64::from(window_secs)),
        };

        // --- Load Push Delivery Settings (as optional) ---
        let push_timeout_secs = parse_var("PUSH_TIMEOUT_SECS", 10u64)?;
        if push_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "PUSH_TIMEOUT_SECS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }
        let push = match (std::env::var("PUSH_ENDPOINT"), std::env::var("PUSH_SERVER_KEY")) {
            (Ok(endpoint), Ok(server_key)) => Some(PushConfig {
                endpoint,
                server_key,
                timeout: Duration::from_secs(push_timeout_secs),
            }),
            (Ok(_), Err(_)) => return Err(ConfigError::MissingVar("PUSH_SERVER_KEY".to_string())),
            _ => None,
        };

        let cors_origin =
            std::env::var("CORS_ORIGIN").unwrap_or_else(|_| "http://localhost:3000".to_string());

        // --- Load Internal Endpoint and Proxy Settings ---
        let internal_secret = std::env::var("INTERNAL_API_SECRET")
            .ok()
            .filter(|secret| !secret.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar("INTERNAL_API_SECRET".to_string()))?;
        let trust_proxy_headers = parse_var("TRUST_PROXY_HEADERS", false)?;

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            db_max_connections,
            calendar,
            verify_rate_limit,
            push,
            cors_origin,
            internal_secret,
            trust_proxy_headers,
        })
    }
}

/// Reads and parses an optional variable, falling back to `default` when unset.
fn parse_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}
