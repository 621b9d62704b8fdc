//! Runtime configuration loaded from environment variables.
//!
//! Every variable is optional:
//! - `BARFEED_REFRESH_INTERVAL_SECS` - candle refresh period (default 20,
//!   must not be 0)
//! - `BARFEED_CHANNEL_CAPACITY` - per-symbol realtime buffer (default 1024,
//!   must not be 0)
//! - `BARFEED_LOOKBACK_CANDLES` - candles requested per refresh (default 300)
//! - `BARFEED_CACHE_DIR` - asset cache directory (default
//!   `$XDG_CACHE_HOME/barfeed`, then `$HOME/.cache/barfeed`)
//! - `BARFEED_CACHE_TTL_HOURS` - asset cache lifetime (default 24)
//! - `BARFEED_RATE_LIMIT` and `BARFEED_RATE_INTERVAL_SECS` - fixed request
//!   budget; when both are unset the limit is learned from response headers

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::BarfeedError;
use crate::rate_limit::RateLimiter;
use crate::realtime::DEFAULT_CHANNEL_CAPACITY;

const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 20;
const DEFAULT_LOOKBACK_CANDLES: usize = 300;
const DEFAULT_CACHE_TTL_HOURS: u64 = 24;

/// Top-level application configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub refresh_interval: Duration,
    pub channel_capacity: usize,
    pub lookback_candles: usize,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
}

/// Asset cache location and lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub dir: PathBuf,
    pub ttl: Duration,
}

/// How the HTTP rate limiter is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitConfig {
    /// `limit` requests per `interval`.
    Manual { limit: u32, interval: Duration },
    /// Learn the limit from the first response's headers.
    FromHeaders,
}

impl RateLimitConfig {
    pub fn build(self) -> RateLimiter {
        match self {
            Self::Manual { limit, interval } => RateLimiter::manual(limit, interval),
            Self::FromHeaders => RateLimiter::from_headers(),
        }
    }
}

/// Loads the application configuration from environment variables.
///
/// # Errors
///
/// Returns [`BarfeedError::Config`] if a number does not parse, if an
/// interval, capacity or rate limit is zero, if only one
/// of the two rate limit variables is set, or if no cache directory can be
/// determined.
pub fn fetch_config() -> crate::Result<AppConfig> {
    let refresh_interval = Duration::from_secs(
        positive_var("BARFEED_REFRESH_INTERVAL_SECS")?.unwrap_or(DEFAULT_REFRESH_INTERVAL_SECS),
    );
    let channel_capacity =
        positive_var("BARFEED_CHANNEL_CAPACITY")?.unwrap_or(DEFAULT_CHANNEL_CAPACITY);
    let lookback_candles =
        parsed_var("BARFEED_LOOKBACK_CANDLES")?.unwrap_or(DEFAULT_LOOKBACK_CANDLES);

    let ttl_hours: u64 = parsed_var("BARFEED_CACHE_TTL_HOURS")?.unwrap_or(DEFAULT_CACHE_TTL_HOURS);
    let ttl_secs = ttl_hours.checked_mul(3600).ok_or_else(|| {
        BarfeedError::Config(format!("BARFEED_CACHE_TTL_HOURS is too large: {ttl_hours}"))
    })?;
    let cache = CacheConfig {
        dir: cache_dir()?,
        ttl: Duration::from_secs(ttl_secs),
    };

    let limit = positive_var::<u32>("BARFEED_RATE_LIMIT")?;
    let interval = positive_var::<u64>("BARFEED_RATE_INTERVAL_SECS")?;
    let rate_limit = match (limit, interval) {
        (Some(limit), Some(secs)) => RateLimitConfig::Manual {
            limit,
            interval: Duration::from_secs(secs),
        },
        (None, None) => RateLimitConfig::FromHeaders,
        (Some(_), None) => {
            return Err(BarfeedError::Config(
                "BARFEED_RATE_LIMIT is set but BARFEED_RATE_INTERVAL_SECS is missing".to_string(),
            ));
        }
        (None, Some(_)) => {
            return Err(BarfeedError::Config(
                "BARFEED_RATE_INTERVAL_SECS is set but BARFEED_RATE_LIMIT is missing".to_string(),
            ));
        }
    };

    Ok(AppConfig {
        refresh_interval,
        channel_capacity,
        lookback_candles,
        cache,
        rate_limit,
    })
}

fn cache_dir() -> crate::Result<PathBuf> {
    if let Some(dir) = non_empty_var("BARFEED_CACHE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if let Some(xdg) = non_empty_var("XDG_CACHE_HOME") {
        return Ok(PathBuf::from(xdg).join("barfeed"));
    }
    if let Some(home) = non_empty_var("HOME") {
        return Ok(PathBuf::from(home).join(".cache").join("barfeed"));
    }
    Err(BarfeedError::Config(
        "cannot determine cache directory: set BARFEED_CACHE_DIR".to_string(),
    ))
}

/// Parses a non-empty environment variable.
fn parsed_var<T: FromStr>(name: &str) -> crate::Result<Option<T>> {
    non_empty_var(name)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| BarfeedError::Config(format!("{name} is not a valid number: {value}")))
        })
        .transpose()
}

/// Parses a non-empty environment variable that must not be zero.
fn positive_var<T>(name: &str) -> crate::Result<Option<T>>
where
    T: FromStr + Default + PartialEq,
{
    match parsed_var::<T>(name)? {
        Some(value) if value == T::default() => Err(BarfeedError::Config(format!(
            "{name} must be greater than zero"
        ))),
        value => Ok(value),
    }
}

/// Returns the value of an environment variable if it exists and is non-empty.
fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_VARS: [&str; 7] = [
        "BARFEED_REFRESH_INTERVAL_SECS",
        "BARFEED_CHANNEL_CAPACITY",
        "BARFEED_LOOKBACK_CANDLES",
        "BARFEED_CACHE_DIR",
        "BARFEED_CACHE_TTL_HOURS",
        "BARFEED_RATE_LIMIT",
        "BARFEED_RATE_INTERVAL_SECS",
    ];

    /// Helper that temporarily sets env vars, runs `f`, then restores originals.
    ///
    /// All `BARFEED_*` variables not listed in `vars` are cleared first.
    fn with_env<F: FnOnce()>(vars: &[(&str, Option<&str>)], f: F) {
        let _guard = ENV_LOCK.lock();

        let names: Vec<&str> = ALL_VARS
            .iter()
            .copied()
            .chain(vars.iter().map(|(k, _)| *k))
            .collect();
        let originals: Vec<(&str, Option<String>)> = names
            .iter()
            .map(|k| (*k, std::env::var(k).ok()))
            .collect();

        for k in ALL_VARS {
            // SAFETY: env access in this module is serialised by ENV_LOCK.
            unsafe { std::env::remove_var(k) };
        }
        for (k, v) in vars {
            // SAFETY: as above.
            unsafe {
                match v {
                    Some(val) => std::env::set_var(k, val),
                    None => std::env::remove_var(k),
                }
            }
        }

        f();

        for (k, original) in originals.into_iter().rev() {
            // SAFETY: restoring original values under the same lock.
            unsafe {
                match original {
                    Some(val) => std::env::set_var(k, val),
                    None => std::env::remove_var(k),
                }
            }
        }
    }

    static ENV_LOCK: parking_lot::Mutex<()> = parking_lot::Mutex::new(());

    #[test]
    fn defaults_without_env_vars() {
        with_env(&[("BARFEED_CACHE_DIR", Some("/tmp/barfeed-test"))], || {
            let config = fetch_config().unwrap();
            assert_eq!(config.refresh_interval, Duration::from_secs(20));
            assert_eq!(config.channel_capacity, 1024);
            assert_eq!(config.lookback_candles, 300);
            assert_eq!(config.cache.dir, PathBuf::from("/tmp/barfeed-test"));
            assert_eq!(config.cache.ttl, Duration::from_secs(24 * 3600));
            assert_eq!(config.rate_limit, RateLimitConfig::FromHeaders);
        });
    }

    #[test]
    fn cache_dir_falls_back_to_xdg() {
        with_env(&[("XDG_CACHE_HOME", Some("/var/cache/me"))], || {
            let config = fetch_config().unwrap();
            assert_eq!(config.cache.dir, PathBuf::from("/var/cache/me/barfeed"));
        });
    }

    #[test]
    fn cache_dir_falls_back_to_home() {
        with_env(&[("XDG_CACHE_HOME", None), ("HOME", Some("/home/me"))], || {
            let config = fetch_config().unwrap();
            assert_eq!(config.cache.dir, PathBuf::from("/home/me/.cache/barfeed"));
        });
    }

    #[test]
    fn missing_cache_dir_is_error() {
        with_env(&[("XDG_CACHE_HOME", None), ("HOME", None)], || {
            let err = fetch_config().unwrap_err();
            assert!(matches!(err, BarfeedError::Config(_)));
        });
    }

    #[test]
    fn manual_rate_limit() {
        with_env(
            &[
                ("BARFEED_CACHE_DIR", Some("/tmp/barfeed-test")),
                ("BARFEED_RATE_LIMIT", Some("200")),
                ("BARFEED_RATE_INTERVAL_SECS", Some("60")),
            ],
            || {
                let config = fetch_config().unwrap();
                assert_eq!(
                    config.rate_limit,
                    RateLimitConfig::Manual {
                        limit: 200,
                        interval: Duration::from_secs(60)
                    }
                );
            },
        );
    }

    #[test]
    fn rate_limit_without_interval_is_error() {
        with_env(
            &[
                ("BARFEED_CACHE_DIR", Some("/tmp/barfeed-test")),
                ("BARFEED_RATE_LIMIT", Some("200")),
            ],
            || {
                let err = fetch_config().unwrap_err();
                assert!(
                    matches!(err, BarfeedError::Config(ref msg) if msg.contains("BARFEED_RATE_INTERVAL_SECS"))
                );
            },
        );
    }

    #[test]
    fn bad_number_names_the_variable() {
        with_env(
            &[
                ("BARFEED_CACHE_DIR", Some("/tmp/barfeed-test")),
                ("BARFEED_LOOKBACK_CANDLES", Some("lots")),
            ],
            || {
                let err = fetch_config().unwrap_err();
                assert!(
                    matches!(err, BarfeedError::Config(ref msg) if msg.contains("BARFEED_LOOKBACK_CANDLES"))
                );
            },
        );
    }

    #[test]
    fn zero_refresh_interval_is_error() {
        with_env(
            &[
                ("BARFEED_CACHE_DIR", Some("/tmp/barfeed-test")),
                ("BARFEED_REFRESH_INTERVAL_SECS", Some("0")),
            ],
            || {
                let err = fetch_config().unwrap_err();
                assert!(
                    matches!(err, BarfeedError::Config(ref msg) if msg.contains("BARFEED_REFRESH_INTERVAL_SECS"))
                );
            },
        );
    }

    #[test]
    fn zero_rate_interval_is_error() {
        with_env(
            &[
                ("BARFEED_CACHE_DIR", Some("/tmp/barfeed-test")),
                ("BARFEED_RATE_LIMIT", Some("10")),
                ("BARFEED_RATE_INTERVAL_SECS", Some("0")),
            ],
            || {
                let err = fetch_config().unwrap_err();
                assert!(
                    matches!(err, BarfeedError::Config(ref msg) if msg.contains("greater than zero"))
                );
            },
        );
    }

    #[test]
    fn huge_cache_ttl_is_error() {
        with_env(
            &[
                ("BARFEED_CACHE_DIR", Some("/tmp/barfeed-test")),
                ("BARFEED_CACHE_TTL_HOURS", Some("18446744073709551615")),
            ],
            || {
                let err = fetch_config().unwrap_err();
                assert!(
                    matches!(err, BarfeedError::Config(ref msg) if msg.contains("BARFEED_CACHE_TTL_HOURS"))
                );
            },
        );
    }

    #[test]
    fn empty_value_counts_as_unset() {
        with_env(
            &[
                ("BARFEED_CACHE_DIR", Some("/tmp/barfeed-test")),
                ("BARFEED_REFRESH_INTERVAL_SECS", Some("")),
            ],
            || {
                let config = fetch_config().unwrap();
                assert_eq!(config.refresh_interval, Duration::from_secs(20));
            },
        );
    }
}
