//! Configuration Module
//!
//! Handles loading and managing cache configuration, optionally from
//! environment variables.

use std::env;
use std::time::Duration;

use chrono::TimeDelta;

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL applied when a call does not pass one. `None` = entries never expire
    pub default_ttl: Option<TimeDelta>,
    /// How long `remove_and_kill` waits for a cancelled computation to settle
    pub kill_grace: Duration,
    /// Background cleanup task interval
    pub cleanup_interval: Duration,
}

impl CacheConfig {
    /// Creates a config with the given default TTL and default timings.
    pub fn with_default_ttl(default_ttl: Option<TimeDelta>) -> Self {
        Self {
            default_ttl,
            ..Self::default()
        }
    }

    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// Opt-in helper for the embedding application. The cache never reads
    /// the environment itself; `Cache::new` and `Cache::with_config` use
    /// only what they are given.
    ///
    /// # Environment Variables
    /// - `CACHE_DEFAULT_TTL_MS` - Default TTL in milliseconds, may be negative;
    ///   `none` disables expiry (default: none)
    /// - `CACHE_KILL_GRACE_MS` - Kill grace period in milliseconds (default: 1000)
    /// - `CACHE_CLEANUP_INTERVAL_MS` - Cleanup frequency in milliseconds (default: 1000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_ttl: env::var("CACHE_DEFAULT_TTL_MS")
                .ok()
                .and_then(|v| parse_ttl_ms(&v))
                .unwrap_or(defaults.default_ttl),
            kill_grace: env::var("CACHE_KILL_GRACE_MS")
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.kill_grace),
            cleanup_interval: env::var("CACHE_CLEANUP_INTERVAL_MS")
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.cleanup_interval),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: None,
            kill_grace: Duration::from_secs(1),
            cleanup_interval: Duration::from_secs(1),
        }
    }
}

/// Parses a TTL override. The outer `None` means "unparsable, use the default".
fn parse_ttl_ms(raw: &str) -> Option<Option<TimeDelta>> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("none") {
        return Some(None);
    }
    raw.parse::<i64>()
        .ok()
        .and_then(TimeDelta::try_milliseconds)
        .map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = CacheConfig::default();
        assert!(config.default_ttl.is_none());
        assert_eq!(config.kill_grace, Duration::from_secs(1));
        assert_eq!(config.cleanup_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_config_with_default_ttl() {
        let config = CacheConfig::with_default_ttl(Some(TimeDelta::seconds(5)));
        assert_eq!(config.default_ttl, Some(TimeDelta::seconds(5)));
        assert_eq!(config.kill_grace, Duration::from_secs(1));
    }

    #[test]
    fn test_parse_ttl_ms() {
        assert_eq!(parse_ttl_ms("250"), Some(Some(TimeDelta::milliseconds(250))));
        assert_eq!(parse_ttl_ms("-10"), Some(Some(TimeDelta::milliseconds(-10))));
        assert_eq!(parse_ttl_ms(" None "), Some(None));
        assert_eq!(parse_ttl_ms("soon"), None);
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Clear any existing env vars to test defaults
        env::remove_var("CACHE_DEFAULT_TTL_MS");
        env::remove_var("CACHE_KILL_GRACE_MS");
        env::remove_var("CACHE_CLEANUP_INTERVAL_MS");

        let config = CacheConfig::from_env();
        assert!(config.default_ttl.is_none());
        assert_eq!(config.kill_grace, Duration::from_secs(1));
        assert_eq!(config.cleanup_interval, Duration::from_secs(1));
    }
}
