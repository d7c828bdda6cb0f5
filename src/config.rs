//! Configuration loader for the `water-quality-monitor` service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). By consolidating configuration logic here, we
//! avoid scattering `env::var` calls throughout the codebase.
//!
use std::{env, time::Duration};

use anyhow::{anyhow, Result};

use crate::DEFAULT_ALERT_TTL;

/// Parse an optional integer environment variable with a default value.
macro_rules! parse_env_u32 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<u32>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse an optional 64-bit integer environment variable with a default value.
macro_rules! parse_env_u64 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<u64>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// Reading source base URL, e.g. `http://localhost:8080/api/sensors`.
    pub readings_url: String,

    /// Anomaly push channel stream URL.
    pub channel_url: String,

    /// Port the presentation API listens on.
    pub http_port: u16,

    /// Period between dashboard refreshes; zero refreshes once at startup.
    pub refresh_interval: Duration,

    /// How long an alert stays up unless dismissed.
    pub alert_ttl: Duration,

    /// Timeout applied to each reading source request.
    pub api_timeout: Duration,

    /// Upper bound for the push channel reconnect backoff.
    pub reconnect_max: Duration,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `READINGS_API_URL` – reading source base URL
/// - `ANOMALY_CHANNEL_URL` – anomaly push channel URL
///
/// Optional:
/// - `HTTP_PORT` – listen port (default: 8081)
/// - `REFRESH_INTERVAL_SECS` – dashboard refresh period (default: 30)
/// - `ALERT_TTL_MS` – alert time-to-live (default: 10000)
/// - `API_TIMEOUT_SECS` – reading source request timeout (default: 10)
/// - `CHANNEL_RECONNECT_MAX_SECS` – max reconnect backoff (default: 30)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let readings_url = require_env!("READINGS_API_URL");
    let channel_url = require_env!("ANOMALY_CHANNEL_URL");
    let http_port = parse_env_u32!("HTTP_PORT", 8081);
    let refresh_secs = parse_env_u64!("REFRESH_INTERVAL_SECS", 30);
    let alert_ttl_ms = parse_env_u64!("ALERT_TTL_MS", DEFAULT_ALERT_TTL.as_millis() as u64);
    let api_timeout_secs = parse_env_u64!("API_TIMEOUT_SECS", 10);
    let reconnect_max_secs = parse_env_u64!("CHANNEL_RECONNECT_MAX_SECS", 30);

    let http_port = u16::try_from(http_port)
        .map_err(|_| anyhow!("Invalid HTTP_PORT: {} is out of range", http_port))?;

    Ok(Config {
        readings_url,
        channel_url,
        http_port,
        refresh_interval: Duration::from_secs(refresh_secs),
        alert_ttl: Duration::from_millis(alert_ttl_ms),
        api_timeout: Duration::from_secs(api_timeout_secs),
        reconnect_max: Duration::from_secs(reconnect_max_secs),
    })
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    pub fn log_config(&self) {
        // ---
        tracing::info!("Configuration loaded:");
        tracing::info!("  READINGS_API_URL           : {}", self.readings_url);
        tracing::info!("  ANOMALY_CHANNEL_URL        : {}", self.channel_url);
        tracing::info!("  HTTP_PORT                  : {}", self.http_port);
        tracing::info!("  REFRESH_INTERVAL_SECS      : {}", self.refresh_interval.as_secs());
        tracing::info!("  ALERT_TTL_MS               : {}", self.alert_ttl.as_millis());
        tracing::info!("  API_TIMEOUT_SECS           : {}", self.api_timeout.as_secs());
        tracing::info!("  CHANNEL_RECONNECT_MAX_SECS : {}", self.reconnect_max.as_secs());
    }
}
