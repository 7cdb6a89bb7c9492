//! Engine configuration (environment-driven with defaults).

use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

pub const REFRESH_INTERVAL_MINS: &str = "FORGESTOCK_REFRESH_INTERVAL_MINS";
pub const REFRESH_MAX_RETRIES: &str = "FORGESTOCK_REFRESH_MAX_RETRIES";
pub const REFRESH_BACKOFF_MS: &str = "FORGESTOCK_REFRESH_BACKOFF_MS";
pub const CONVERSION_UPDATE_ATTEMPTS: &str = "FORGESTOCK_CONVERSION_UPDATE_ATTEMPTS";
pub const AUTO_SYNC_ON_CREATE: &str = "FORGESTOCK_AUTO_SYNC_ON_CREATE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Cadence of the background linked-batch refresh.
    pub refresh_interval: Duration,
    /// Retries after a failed refresh pass before waiting for the next tick.
    pub refresh_max_retries: u32,
    pub refresh_base_backoff: Duration,
    /// Optimistic write attempts for reservation updates (conversion, sync).
    pub update_attempts: u32,
    /// Run delivery sync for the consumer right after a reservation is created.
    pub auto_sync_on_create: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(5 * 60),
            refresh_max_retries: 3,
            refresh_base_backoff: Duration::from_millis(250),
            update_attempts: 3,
            auto_sync_on_create: true,
        }
    }
}

impl EngineConfig {
    /// Read overrides from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read overrides through `lookup`; unset keys keep their defaults and
    /// unparseable values are logged and ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let refresh_mins: u64 = parse_or(
            &lookup,
            REFRESH_INTERVAL_MINS,
            defaults.refresh_interval.as_secs() / 60,
        );
        let backoff_ms: u64 = parse_or(
            &lookup,
            REFRESH_BACKOFF_MS,
            defaults.refresh_base_backoff.as_millis() as u64,
        );

        Self {
            refresh_interval: Duration::from_secs(refresh_mins.max(1) * 60),
            refresh_max_retries: parse_or(&lookup, REFRESH_MAX_RETRIES, defaults.refresh_max_retries),
            refresh_base_backoff: Duration::from_millis(backoff_ms),
            update_attempts: parse_or(&lookup, CONVERSION_UPDATE_ATTEMPTS, defaults.update_attempts)
                .max(1),
            auto_sync_on_create: parse_or(&lookup, AUTO_SYNC_ON_CREATE, defaults.auto_sync_on_create),
        }
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn with_auto_sync_on_create(mut self, enabled: bool) -> Self {
        self.auto_sync_on_create = enabled;
        self
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Copy,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "ignoring unparseable configuration value");
            default
        }),
    }
}
