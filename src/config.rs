//! Sync-layer configuration parsed from environment variables.
//!
//! Every knob has a default, so an empty environment yields a working
//! configuration pointed at a local server. Unparseable numeric values fall
//! back to their defaults; only a base URL with an unsupported scheme is an
//! error.

use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 3_000;
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_ACTIVITY_CAPACITY: usize = 50;
pub const DEFAULT_NEW_ACTIVITY_TTL_MS: u64 = 3_000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid base URL (expected http:// or https://): {0}")]
    InvalidBaseUrl(String),
}

/// Reconnect and heartbeat policy for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Fixed delay before each automatic reconnect attempt.
    pub reconnect_interval: Duration,
    /// Automatic reconnect attempts before the channel settles disconnected.
    pub max_reconnect_attempts: u32,
    /// Ping period while connected. Zero disables the heartbeat.
    pub heartbeat_interval: Duration,
}

impl ChannelConfig {
    #[must_use]
    pub fn heartbeat_enabled(&self) -> bool {
        !self.heartbeat_interval.is_zero()
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::from_millis(DEFAULT_RECONNECT_INTERVAL_MS),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
        }
    }
}

/// Polling and activity-feed policy for a session aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorConfig {
    /// Period of the backstop snapshot poll.
    pub refresh_interval: Duration,
    /// Whether the backstop poll runs at all.
    pub auto_refresh: bool,
    /// Activity entries retained before the oldest is evicted.
    pub activity_capacity: usize,
    /// How long a "N new" activity indicator stays raised.
    pub new_activity_ttl: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_millis(DEFAULT_REFRESH_INTERVAL_MS),
            auto_refresh: true,
            activity_capacity: DEFAULT_ACTIVITY_CAPACITY,
            new_activity_ttl: Duration::from_millis(DEFAULT_NEW_ACTIVITY_TTL_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// HTTP(S) origin of the survey server, without trailing slash.
    pub base_url: String,
    pub channel: ChannelConfig,
    pub aggregator: AggregatorConfig,
}

impl SyncConfig {
    /// Build config from the process environment.
    ///
    /// Optional:
    /// - `LIVESYNC_BASE_URL`: default `http://127.0.0.1:8000`
    /// - `LIVESYNC_RECONNECT_INTERVAL_MS`: default 3000
    /// - `LIVESYNC_MAX_RECONNECT_ATTEMPTS`: default 5
    /// - `LIVESYNC_HEARTBEAT_INTERVAL_MS`: default 30000, 0 disables
    /// - `LIVESYNC_REFRESH_INTERVAL_MS`: default 5000
    /// - `LIVESYNC_AUTO_REFRESH`: default true
    /// - `LIVESYNC_ACTIVITY_CAPACITY`: default 50
    /// - `LIVESYNC_NEW_ACTIVITY_TTL_MS`: default 3000
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBaseUrl`] when the base URL is not http(s).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBaseUrl`] when the base URL is not http(s).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let base_url = lookup("LIVESYNC_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_owned());

        let channel = ChannelConfig {
            reconnect_interval: Duration::from_millis(parse_or(
                &lookup,
                "LIVESYNC_RECONNECT_INTERVAL_MS",
                DEFAULT_RECONNECT_INTERVAL_MS,
            )),
            max_reconnect_attempts: parse_or(
                &lookup,
                "LIVESYNC_MAX_RECONNECT_ATTEMPTS",
                DEFAULT_MAX_RECONNECT_ATTEMPTS,
            ),
            heartbeat_interval: Duration::from_millis(parse_or(
                &lookup,
                "LIVESYNC_HEARTBEAT_INTERVAL_MS",
                DEFAULT_HEARTBEAT_INTERVAL_MS,
            )),
        };

        let aggregator = AggregatorConfig {
            refresh_interval: Duration::from_millis(parse_or(
                &lookup,
                "LIVESYNC_REFRESH_INTERVAL_MS",
                DEFAULT_REFRESH_INTERVAL_MS,
            )),
            auto_refresh: parse_bool_or(&lookup, "LIVESYNC_AUTO_REFRESH", true),
            activity_capacity: parse_or(&lookup, "LIVESYNC_ACTIVITY_CAPACITY", DEFAULT_ACTIVITY_CAPACITY)
                .max(1),
            new_activity_ttl: Duration::from_millis(parse_or(
                &lookup,
                "LIVESYNC_NEW_ACTIVITY_TTL_MS",
                DEFAULT_NEW_ACTIVITY_TTL_MS,
            )),
        };

        Self::with_base_url(&base_url).map(|cfg| Self { channel, aggregator, ..cfg })
    }

    /// Default policies against the given base URL.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBaseUrl`] when the base URL is not http(s).
    pub fn with_base_url(base_url: &str) -> Result<Self, ConfigError> {
        let trimmed = base_url.trim().trim_end_matches('/');
        if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
            return Err(ConfigError::InvalidBaseUrl(base_url.to_owned()));
        }
        Ok(Self {
            base_url: trimmed.to_owned(),
            channel: ChannelConfig::default(),
            aggregator: AggregatorConfig::default(),
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn parse_bool_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    match lookup(key).as_deref().map(str::trim) {
        Some("1" | "true" | "yes" | "on") => true,
        Some("0" | "false" | "no" | "off") => false,
        _ => default,
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
