//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

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

/// Login sessions last between one day and ten years.
const AUTH_SESSION_TTL_DAYS_RANGE: std::ops::RangeInclusive<i64> = 1..=3650;

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub cors_origin: String,
    pub profile_cache_ttl: Duration,
    pub signup_profile_wait: Duration,
    pub allow_past_class_scans: bool,
    pub require_email_confirmation: bool,
    pub auth_session_ttl_days: i64,
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
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Server and Database Settings ---
        let bind_address_str = lookup("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url = lookup("DATABASE_URL")
            .ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let cors_origin =
            lookup("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:5173".to_string());

        // --- Session and Attendance Settings ---
        let profile_cache_ttl =
            Duration::from_secs(parse_or(&lookup, "PROFILE_CACHE_TTL_SECS", 5)?);
        let signup_profile_wait =
            Duration::from_secs(parse_or(&lookup, "SIGNUP_PROFILE_WAIT_SECS", 2)?);
        let allow_past_class_scans = parse_or(&lookup, "ALLOW_PAST_CLASS_SCANS", true)?;
        let require_email_confirmation =
            parse_or(&lookup, "REQUIRE_EMAIL_CONFIRMATION", false)?;
        let auth_session_ttl_days: i64 = parse_or(&lookup, "AUTH_SESSION_TTL_DAYS", 30)?;
        if !AUTH_SESSION_TTL_DAYS_RANGE.contains(&auth_session_ttl_days) {
            return Err(ConfigError::InvalidValue(
                "AUTH_SESSION_TTL_DAYS".to_string(),
                format!(
                    "{} is outside {}..={}",
                    auth_session_ttl_days,
                    AUTH_SESSION_TTL_DAYS_RANGE.start(),
                    AUTH_SESSION_TTL_DAYS_RANGE.end()
                ),
            ));
        }

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            cors_origin,
            profile_cache_ttl,
            signup_profile_wait,
            allow_past_class_scans,
            require_email_confirmation,
            auth_session_ttl_days,
        })
    }
}

/// Parses an optional variable, falling back to `default` when it is unset.
fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        None => Ok(default),
    }
}
