// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Scheduler configuration.
//!
//! Parsed from TOML with environment overrides:
//!
//! ```toml
//! time_slice_ms = 5          # 0 = unbounded drive-bursts (basic variant)
//! pause = "park"             # or "poll"
//! poll_backoff_max_us = 1000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Budget used by [`SchedulerConfig::time_sliced`] presets.
pub const DEFAULT_TIME_SLICE: Duration = Duration::from_millis(5);

/// How a paused routine is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PausePolicy {
    /// Register on the channels' waiter lists; retry when one changes.
    #[default]
    Park,
    /// Retry unconditionally on the next tick.
    Poll,
}

impl std::str::FromStr for PausePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "park" => Ok(PausePolicy::Park),
            "poll" => Ok(PausePolicy::Poll),
            other => Err(ConfigError::Invalid(format!(
                "unknown pause policy `{other}` (expected `park` or `poll`)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Longest drive-burst before a forced yield, in milliseconds. 0 disables
    /// time slicing.
    pub time_slice_ms: u64,

    pub pause: PausePolicy,

    /// Upper bound of the backoff between fruitless poll sweeps.
    pub poll_backoff_max_us: u64,
}

impl SchedulerConfig {
    /// Unbounded bursts, parked pauses.
    pub fn basic() -> Self {
        Self {
            time_slice_ms: 0,
            pause: PausePolicy::Park,
            poll_backoff_max_us: 1_000,
        }
    }

    /// Millisecond granularity: a non-zero budget rounds up, so it never
    /// collapses to 0 (unbounded).
    pub fn time_sliced(budget: Duration) -> Self {
        Self {
            time_slice_ms: u64::try_from(budget.as_nanos().div_ceil(1_000_000))
                .unwrap_or(u64::MAX),
            ..Self::basic()
        }
    }

    pub fn with_pause(mut self, pause: PausePolicy) -> Self {
        self.pause = pause;
        self
    }

    /// `None` means bursts run until the routine pauses, sleeps or ends.
    pub fn time_slice(&self) -> Option<Duration> {
        match self.time_slice_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn poll_backoff_max(&self) -> Duration {
        Duration::from_micros(self.poll_backoff_max_us)
    }

    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Apply environment variable overrides.
    ///
    /// - `CSP_TIME_SLICE_MS` -> `time_slice_ms`
    /// - `CSP_PAUSE_POLICY` -> `pause`
    /// - `CSP_POLL_BACKOFF_MAX_US` -> `poll_backoff_max_us`
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(v) = std::env::var("CSP_TIME_SLICE_MS") {
            self.time_slice_ms = parse_number("CSP_TIME_SLICE_MS", &v)?;
        }
        if let Ok(v) = std::env::var("CSP_PAUSE_POLICY") {
            self.pause = v.parse()?;
        }
        if let Ok(v) = std::env::var("CSP_POLL_BACKOFF_MAX_US") {
            self.poll_backoff_max_us = parse_number("CSP_POLL_BACKOFF_MAX_US", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pause == PausePolicy::Poll && self.poll_backoff_max_us == 0 {
            return Err(ConfigError::Invalid(
                "poll_backoff_max_us must be positive with the poll pause policy".to_string(),
            ));
        }
        if self.time_slice_ms > 60_000 {
            return Err(ConfigError::Invalid(format!(
                "time_slice_ms = {} exceeds one minute; use 0 to disable slicing",
                self.time_slice_ms
            )));
        }
        Ok(())
    }
}

fn parse_number(var: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{var}: `{value}` is not a number")))
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::basic()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_basic_variant() {
        let config = SchedulerConfig::default();
        assert_eq!(config.time_slice(), None);
        assert_eq!(config.pause, PausePolicy::Park);
    }

    #[test]
    fn time_sliced_preset() {
        let config = SchedulerConfig::time_sliced(DEFAULT_TIME_SLICE);
        assert_eq!(config.time_slice(), Some(Duration::from_millis(5)));
    }

    #[test]
    fn sub_millisecond_budget_stays_sliced() {
        let config = SchedulerConfig::time_sliced(Duration::from_micros(500));
        assert_eq!(config.time_slice(), Some(Duration::from_millis(1)));
        let config = SchedulerConfig::time_sliced(Duration::from_nanos(1));
        assert_eq!(config.time_slice(), Some(Duration::from_millis(1)));
        let config = SchedulerConfig::time_sliced(Duration::from_micros(2_500));
        assert_eq!(config.time_slice(), Some(Duration::from_millis(3)));
    }

    #[test]
    fn zero_budget_means_unbounded() {
        let config = SchedulerConfig::time_sliced(Duration::ZERO);
        assert_eq!(config.time_slice(), None);
    }

    #[test]
    fn parses_partial_toml() {
        let config: SchedulerConfig = toml::from_str("pause = \"poll\"").unwrap();
        assert_eq!(config.pause, PausePolicy::Poll);
        assert_eq!(config.time_slice_ms, 0);
        assert_eq!(config.poll_backoff_max_us, 1_000);
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = toml::from_str::<SchedulerConfig>("time_slice = 5").unwrap_err();
        assert!(err.to_string().contains("time_slice"));
    }

    #[test]
    fn validate_rejects_zero_backoff_when_polling() {
        let mut config = SchedulerConfig::basic().with_pause(PausePolicy::Poll);
        config.poll_backoff_max_us = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn policy_from_str() {
        assert_eq!("Park".parse::<PausePolicy>().unwrap(), PausePolicy::Park);
        assert_eq!("poll".parse::<PausePolicy>().unwrap(), PausePolicy::Poll);
        assert!("spin".parse::<PausePolicy>().is_err());
    }

    #[test]
    fn round_trips_through_toml() {
        let config = SchedulerConfig::time_sliced(Duration::from_millis(3))
            .with_pause(PausePolicy::Poll);
        let text = toml::to_string(&config).unwrap();
        assert!(text.contains("pause = \"poll\""));
        assert_eq!(toml::from_str::<SchedulerConfig>(&text).unwrap(), config);
    }
}
