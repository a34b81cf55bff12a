//! Configuration module for the harvester.
//!
//! This module handles loading and parsing configuration from environment variables
//! using the figment crate. It supports flexible duration parsing that accepts both
//! numeric values (interpreted as seconds) and duration strings with units.

use fundu::{DurationParser, TimeUnit};
use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Upper bound for worker and session pool sizes.
pub const MAX_PARALLELISM: usize = 32;

/// Main application configuration containing all sub-configurations
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Log level for the application
    ///
    /// This value is used to set the log level for this application's target specifically.
    /// e.g. "debug" would be similar to "warn,vvz_harvester=debug,..."
    ///
    /// Valid values are: "trace", "debug", "info", "warn", "error"
    /// Defaults to "info" if not specified
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Database connection URL
    pub database_url: String,
    /// Base URL of the legacy course catalog
    ///
    /// Defaults to "https://evlvz.hrz.tu-freiberg.de/~vover/" if not specified
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// User-Agent header sent on every catalog request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Overall HTTP request timeout
    #[serde(default = "default_timeout", deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
    /// Maximum retry attempts for transient catalog fetch failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for the exponential retry backoff
    #[serde(
        default = "default_retry_delay",
        deserialize_with = "deserialize_duration"
    )]
    pub retry_delay: Duration,
    /// Politeness delay inserted before every catalog request (0 = disabled)
    #[serde(
        default = "default_respectful_delay",
        deserialize_with = "deserialize_duration"
    )]
    pub respectful_delay: Duration,
    /// Worker fan-out configuration
    #[serde(default)]
    pub parallel: ParallelConfig,
    /// Enable the mixed UTF-8/ISO-8859-1 query repair heuristic
    #[serde(default = "default_true")]
    pub encoding_fix_legacy: bool,
}

/// Worker fan-out configuration for parallel study program scraping
#[derive(Debug, Clone, Deserialize)]
pub struct ParallelConfig {
    /// Process study programs on a worker pool instead of serially
    #[serde(default)]
    pub enabled: bool,
    /// Maximum concurrent workers (1..=32)
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Number of catalog sessions shared by the workers (1..=32)
    #[serde(default = "default_session_pool_size")]
    pub session_pool_size: usize,
    /// Delay a worker sleeps after finishing one study program
    #[serde(
        default = "default_inter_task_delay",
        deserialize_with = "deserialize_duration"
    )]
    pub inter_task_delay: Duration,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        ParallelConfig {
            enabled: false,
            max_workers: default_max_workers(),
            session_pool_size: default_session_pool_size(),
            inter_task_delay: default_inter_task_delay(),
        }
    }
}

impl Config {
    /// Checks option ranges that serde defaults cannot express.
    pub fn validate(&self) -> Result<(), String> {
        if !(1..=MAX_PARALLELISM).contains(&self.parallel.max_workers) {
            return Err(format!(
                "parallel.max_workers must be in 1..={MAX_PARALLELISM}, got {}",
                self.parallel.max_workers
            ));
        }
        if !(1..=MAX_PARALLELISM).contains(&self.parallel.session_pool_size) {
            return Err(format!(
                "parallel.session_pool_size must be in 1..={MAX_PARALLELISM}, got {}",
                self.parallel.session_pool_size
            ));
        }
        if url::Url::parse(&self.base_url).is_err() {
            return Err(format!("base_url is not a valid URL: {}", self.base_url));
        }
        Ok(())
    }

    /// Effective session pool size: never larger than the worker count.
    pub fn effective_session_pool_size(&self) -> usize {
        self.parallel
            .session_pool_size
            .clamp(1, self.parallel.max_workers.clamp(1, MAX_PARALLELISM))
    }
}

/// Default log level of "info"
fn default_log_level() -> String {
    "info".to_string()
}

/// Default catalog base URL
fn default_base_url() -> String {
    "https://evlvz.hrz.tu-freiberg.de/~vover/".to_string()
}

/// Default browser-like user agent
fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36"
        .to_string()
}

/// Default HTTP timeout of 30 seconds
fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Default of 3 retry attempts
fn default_max_retries() -> u32 {
    3
}

/// Default retry backoff base of 2 seconds
fn default_retry_delay() -> Duration {
    Duration::from_secs(2)
}

/// Politeness delay disabled by default
fn default_respectful_delay() -> Duration {
    Duration::ZERO
}

/// Default of 4 workers
fn default_max_workers() -> usize {
    4
}

/// Default of 2 shared sessions
fn default_session_pool_size() -> usize {
    2
}

/// No inter-task delay by default
fn default_inter_task_delay() -> Duration {
    Duration::ZERO
}

fn default_true() -> bool {
    true
}

/// Parser behind the string form of the duration fields.
///
/// Bare numbers mean seconds; an `ms`, `s` or `m` suffix selects the unit,
/// optionally separated by whitespace. Several components add up, so
/// `"1m 30s"` is ninety seconds. Fractions, exponents and infinity are
/// rejected so a typo cannot silently become an absurd timeout.
const DURATION_PARSER: DurationParser<'static> = DurationParser::builder()
    .time_units(&[TimeUnit::MilliSecond, TimeUnit::Second, TimeUnit::Minute])
    .parse_multiple(None)
    .allow_time_unit_delimiter()
    .disable_infinity()
    .disable_fraction()
    .disable_exponent()
    .default_unit(TimeUnit::Second)
    .build();

/// Deserializes a duration from either a bare number of seconds (`45`) or a
/// unit string (`"750ms"`, `"90s"`, `"3m"`).
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct DurationVisitor;

    impl serde::de::Visitor<'_> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("seconds as a number, or a string like \"750ms\", \"90s\" or \"3m\"")
        }

        fn visit_str<E>(self, value: &str) -> Result<Duration, E>
        where
            E: serde::de::Error,
        {
            let parsed = DURATION_PARSER
                .parse(value)
                .map_err(|e| E::custom(format!("unusable duration {value:?}: {e}")))?;
            parsed
                .try_into()
                .map_err(|e| E::custom(format!("duration {value:?} out of range: {e}")))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Duration, E>
        where
            E: serde::de::Error,
        {
            Ok(Duration::from_secs(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Duration, E>
        where
            E: serde::de::Error,
        {
            u64::try_from(value)
                .map(Duration::from_secs)
                .map_err(|_| E::custom("negative durations are not allowed"))
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            log_level: default_log_level(),
            database_url: "postgres://localhost/vvz".to_string(),
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            timeout: default_timeout(),
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            respectful_delay: default_respectful_delay(),
            parallel: ParallelConfig::default(),
            encoding_fix_legacy: true,
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_rejects_out_of_range_workers() {
        let mut config = base_config();
        config.parallel.max_workers = 0;
        assert!(config.validate().is_err());

        config.parallel.max_workers = 33;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_invalid_base_url() {
        let mut config = base_config();
        config.base_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_session_pool_clamped_to_workers() {
        let mut config = base_config();
        config.parallel.max_workers = 2;
        config.parallel.session_pool_size = 8;
        assert_eq!(config.effective_session_pool_size(), 2);
    }

    #[test]
    fn test_duration_fields_accept_numbers_and_unit_strings() {
        use figment::{Figment, providers::Serialized};

        let config: Config = Figment::new()
            .merge(Serialized::defaults(serde_json::json!({
                "database_url": "postgres://localhost/vvz",
                "timeout": "45s",
                "retry_delay": "750ms",
                "respectful_delay": 2,
            })))
            .extract()
            .unwrap();

        assert_eq!(config.timeout, Duration::from_secs(45));
        assert_eq!(config.retry_delay, Duration::from_millis(750));
        assert_eq!(config.respectful_delay, Duration::from_secs(2));
    }

    #[test]
    fn test_duration_rejects_negative_and_garbage() {
        use figment::{Figment, providers::Serialized};

        for timeout in [serde_json::json!(-5), serde_json::json!("later")] {
            let result: Result<Config, _> = Figment::new()
                .merge(Serialized::defaults(serde_json::json!({
                    "database_url": "postgres://localhost/vvz",
                    "timeout": timeout,
                })))
                .extract();
            assert!(result.is_err(), "expected rejection for {timeout:?}");
        }
    }
}
