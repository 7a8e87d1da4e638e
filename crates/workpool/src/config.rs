//! Pool configuration.
//!
//! A single immutable structure supplied at construction. Every field has a default, so a
//! partial JSON document (or none at all) yields a usable configuration. Keys are snake_case;
//! the legacy camelCase option names are accepted as aliases.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_LOG_FILE: &str = "./producer_consumer.log";
pub const DEFAULT_EXIT_MESSAGE: &str = "master process finished";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("min_workers must be at least 1")]
    NoMinWorkers,
    #[error("max_workers ({max}) must be >= min_workers ({min})")]
    MaxBelowMin { max: usize, min: usize },
    #[error("max_consume_retries must be at least 1")]
    NoConsumeAttempts,
    #[error("spawn_attempts must be at least 1")]
    NoSpawnAttempts,
    #[error("scaling_check_interval must be non-zero")]
    ZeroCheckInterval,
    #[error("invalid configuration document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Exponential delay between consume attempts.
///
/// The delay before retry `n` (0-based) is `first × factor^n`, clamped to `max`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryBackoff {
    #[serde(with = "secs")]
    pub first: Duration,
    #[serde(with = "secs")]
    pub max: Duration,
    pub factor: f64,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self {
            first: Duration::from_millis(50),
            max: Duration::from_secs(5),
            factor: 2.0,
        }
    }
}

impl RetryBackoff {
    pub fn delay(&self, retry: u32) -> Duration {
        let exp = retry.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);
        if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Upper bound on live workers (permanent + elastic).
    #[serde(alias = "maxWorkerNum")]
    pub max_workers: usize,
    /// Permanently resident workers.
    #[serde(alias = "minWorkerNum")]
    pub min_workers: usize,
    /// Sleep after an empty dequeue.
    #[serde(alias = "waitTaskTime", with = "secs")]
    pub idle_poll_interval: Duration,
    /// Consecutive empty dequeues before an elastic worker exits.
    #[serde(alias = "waitTaskLoopTimes")]
    pub max_idle_loops: u64,
    /// Consume attempts per item.
    #[serde(alias = "consumeTryTimes")]
    pub max_consume_retries: u32,
    #[serde(alias = "checkInterval", with = "secs")]
    pub scaling_check_interval: Duration,
    /// Attempts per worker spawn before giving up until the next tick.
    #[serde(alias = "forkTryTimes")]
    pub spawn_attempts: u32,
    /// Delay before a freshly spawned worker enters its loop.
    #[serde(with = "secs")]
    pub startup_delay: Duration,
    #[serde(alias = "logFile")]
    pub log_file: Option<PathBuf>,
    pub exit_message: String,
    pub retry_backoff: Option<RetryBackoff>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: 10,
            min_workers: 3,
            idle_poll_interval: Duration::from_millis(10),
            max_idle_loops: 50,
            max_consume_retries: 3,
            scaling_check_interval: Duration::from_secs(1),
            spawn_attempts: 3,
            startup_delay: Duration::ZERO,
            log_file: Some(PathBuf::from(DEFAULT_LOG_FILE)),
            exit_message: DEFAULT_EXIT_MESSAGE.to_string(),
            retry_backoff: None,
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn with_max_workers(mut self, n: usize) -> Self {
        self.max_workers = n;
        self
    }

    pub fn with_min_workers(mut self, n: usize) -> Self {
        self.min_workers = n;
        self
    }

    pub fn with_idle_poll_interval(mut self, interval: Duration) -> Self {
        self.idle_poll_interval = interval;
        self
    }

    pub fn with_max_idle_loops(mut self, loops: u64) -> Self {
        self.max_idle_loops = loops;
        self
    }

    pub fn with_max_consume_retries(mut self, attempts: u32) -> Self {
        self.max_consume_retries = attempts;
        self
    }

    pub fn with_scaling_check_interval(mut self, interval: Duration) -> Self {
        self.scaling_check_interval = interval;
        self
    }

    pub fn with_spawn_attempts(mut self, attempts: u32) -> Self {
        self.spawn_attempts = attempts;
        self
    }

    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    pub fn with_log_file(mut self, path: Option<PathBuf>) -> Self {
        self.log_file = path;
        self
    }

    pub fn with_exit_message(mut self, message: impl Into<String>) -> Self {
        self.exit_message = message.into();
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Option<RetryBackoff>) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_workers == 0 {
            return Err(ConfigError::NoMinWorkers);
        }
        if self.max_workers < self.min_workers {
            return Err(ConfigError::MaxBelowMin {
                max: self.max_workers,
                min: self.min_workers,
            });
        }
        if self.max_consume_retries == 0 {
            return Err(ConfigError::NoConsumeAttempts);
        }
        if self.spawn_attempts == 0 {
            return Err(ConfigError::NoSpawnAttempts);
        }
        if self.scaling_check_interval.is_zero() {
            return Err(ConfigError::ZeroCheckInterval);
        }
        Ok(())
    }
}

/// Durations as fractional seconds, the unit of the legacy `waitTaskTime` option.
mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = PoolConfig::default();
        assert_eq!(config.max_workers, 10);
        assert_eq!(config.min_workers, 3);
        assert_eq!(config.idle_poll_interval, Duration::from_millis(10));
        assert_eq!(config.max_idle_loops, 50);
        assert_eq!(config.max_consume_retries, 3);
        assert_eq!(config.scaling_check_interval, Duration::from_secs(1));
        assert_eq!(config.spawn_attempts, 3);
        assert_eq!(config.log_file, Some(PathBuf::from(DEFAULT_LOG_FILE)));
        assert_eq!(config.exit_message, DEFAULT_EXIT_MESSAGE);
        assert!(config.retry_backoff.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_legacy_option_names() {
        let config = PoolConfig::from_json(
            r#"{
                "maxWorkerNum": 6,
                "minWorkerNum": 2,
                "waitTaskTime": 0.5,
                "waitTaskLoopTimes": 7,
                "consumeTryTimes": 4,
                "logFile": "/tmp/pool.log"
            }"#,
        )
        .unwrap();

        assert_eq!(config.max_workers, 6);
        assert_eq!(config.min_workers, 2);
        assert_eq!(config.idle_poll_interval, Duration::from_millis(500));
        assert_eq!(config.max_idle_loops, 7);
        assert_eq!(config.max_consume_retries, 4);
        assert_eq!(config.log_file, Some(PathBuf::from("/tmp/pool.log")));
        // untouched fields keep their defaults
        assert_eq!(config.spawn_attempts, 3);
    }

    #[test]
    fn empty_document_is_default() {
        assert_eq!(PoolConfig::from_json("{}").unwrap(), PoolConfig::default());
    }

    #[test]
    fn negative_duration_rejected() {
        assert!(matches!(
            PoolConfig::from_json(r#"{"idle_poll_interval": -1.0}"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn validate_rejects_inverted_bounds() {
        let config = PoolConfig::new().with_min_workers(5).with_max_workers(2);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MaxBelowMin { max: 2, min: 5 })
        ));
    }

    #[test]
    fn validate_rejects_zero_counts() {
        assert!(matches!(
            PoolConfig::new().with_min_workers(0).validate(),
            Err(ConfigError::NoMinWorkers)
        ));
        assert!(matches!(
            PoolConfig::new().with_max_consume_retries(0).validate(),
            Err(ConfigError::NoConsumeAttempts)
        ));
        assert!(matches!(
            PoolConfig::new().with_spawn_attempts(0).validate(),
            Err(ConfigError::NoSpawnAttempts)
        ));
        assert!(matches!(
            PoolConfig::new()
                .with_scaling_check_interval(Duration::ZERO)
                .validate(),
            Err(ConfigError::ZeroCheckInterval)
        ));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let backoff = RetryBackoff {
            first: Duration::from_millis(100),
            max: Duration::from_secs(1),
            factor: 2.0,
        };
        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(200));
        assert_eq!(backoff.delay(2), Duration::from_millis(400));
        assert_eq!(backoff.delay(10), Duration::from_secs(1));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(1));
    }
}
