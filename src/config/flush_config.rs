//! Flush configuration parsing from environment variables.
//!
//! This module handles the flush interval, the submission timeout and the
//! per-kind reset policy. Values stay string-encoded until validation so env
//! vars and config files accept the same spellings.

use crate::domain::errors::ConfigError;
use crate::domain::metric::ResetPolicy;
use serde::Deserialize;
use std::env;
use std::time::Duration;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Flush environment configuration
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct FlushEnvConfig {
    /// Duration string, e.g. `10s` or `1m30s`. Empty means the default.
    pub interval: String,
    pub submit_timeout: String,
    /// `true`/`1` or `false`/`0`. Empty means the per-kind default.
    pub reset_counters: String,
    pub reset_gauges: String,
    pub reset_histograms: String,
    pub reset_text: String,
    /// Log every submitted payload at debug level. Same spellings as the reset flags.
    pub debug: String,
}

impl FlushEnvConfig {
    pub fn from_env() -> Self {
        Self {
            interval: env::var("TRAPMETRICS_INTERVAL").unwrap_or_default(),
            submit_timeout: env::var("TRAPMETRICS_SUBMIT_TIMEOUT").unwrap_or_default(),
            reset_counters: env::var("TRAPMETRICS_RESET_COUNTERS").unwrap_or_default(),
            reset_gauges: env::var("TRAPMETRICS_RESET_GAUGES").unwrap_or_default(),
            reset_histograms: env::var("TRAPMETRICS_RESET_HISTOGRAMS").unwrap_or_default(),
            reset_text: env::var("TRAPMETRICS_RESET_TEXT").unwrap_or_default(),
            debug: env::var("TRAPMETRICS_DEBUG").unwrap_or_default(),
        }
    }

    pub fn interval(&self) -> Result<Duration, ConfigError> {
        Ok(parse_duration("interval", &self.interval)?.unwrap_or(DEFAULT_INTERVAL))
    }

    pub fn submit_timeout(&self) -> Result<Duration, ConfigError> {
        Ok(parse_duration("submit_timeout", &self.submit_timeout)?
            .unwrap_or(DEFAULT_SUBMIT_TIMEOUT))
    }

    pub fn debug(&self) -> Result<bool, ConfigError> {
        Ok(parse_bool("debug", &self.debug)?.unwrap_or(false))
    }

    pub fn reset_policy(&self) -> Result<ResetPolicy, ConfigError> {
        let defaults = ResetPolicy::default();
        Ok(ResetPolicy {
            counters: parse_bool("reset_counters", &self.reset_counters)?
                .unwrap_or(defaults.counters),
            gauges: parse_bool("reset_gauges", &self.reset_gauges)?.unwrap_or(defaults.gauges),
            histograms: parse_bool("reset_histograms", &self.reset_histograms)?
                .unwrap_or(defaults.histograms),
            text: parse_bool("reset_text", &self.reset_text)?.unwrap_or(defaults.text),
        })
    }
}

/// Parses `true`/`1`/`false`/`0`; an empty string yields `None`.
pub fn parse_bool(option: &'static str, raw: &str) -> Result<Option<bool>, ConfigError> {
    let value = raw.trim();
    if value.is_empty() {
        return Ok(None);
    }
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(Some(true)),
        "false" | "0" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidBool {
            option,
            value: raw.to_string(),
        }),
    }
}

/// Parses a duration string such as `30s` or `1m30s`; empty yields `None`.
pub fn parse_duration(option: &'static str, raw: &str) -> Result<Option<Duration>, ConfigError> {
    let value = raw.trim();
    if value.is_empty() {
        return Ok(None);
    }
    let duration =
        humantime::parse_duration(value).map_err(|e| ConfigError::InvalidDuration {
            option,
            value: raw.to_string(),
            reason: e.to_string(),
        })?;
    if duration.is_zero() {
        return Err(ConfigError::InvalidDuration {
            option,
            value: raw.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(Some(duration))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FlushEnvConfig::default();
        assert_eq!(config.interval().expect("valid"), DEFAULT_INTERVAL);
        assert_eq!(config.submit_timeout().expect("valid"), DEFAULT_SUBMIT_TIMEOUT);
        assert_eq!(config.reset_policy().expect("valid"), ResetPolicy::default());
    }

    #[test]
    fn test_bool_encodings() {
        assert_eq!(parse_bool("x", "true").expect("valid"), Some(true));
        assert_eq!(parse_bool("x", "1").expect("valid"), Some(true));
        assert_eq!(parse_bool("x", "FALSE").expect("valid"), Some(false));
        assert_eq!(parse_bool("x", "0").expect("valid"), Some(false));
        assert_eq!(parse_bool("x", "").expect("valid"), None);
        assert_eq!(
            parse_bool("reset_counters", "yes"),
            Err(ConfigError::InvalidBool {
                option: "reset_counters",
                value: "yes".to_string()
            })
        );
    }

    #[test]
    fn test_durations() {
        assert_eq!(
            parse_duration("interval", "30s").expect("valid"),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            parse_duration("interval", "1m30s").expect("valid"),
            Some(Duration::from_secs(90))
        );
        assert!(matches!(
            parse_duration("interval", "thirty seconds"),
            Err(ConfigError::InvalidDuration { .. })
        ));
        assert!(parse_duration("interval", "0s").is_err());
    }

    #[test]
    fn test_reset_overrides() {
        let config = FlushEnvConfig {
            reset_counters: "0".to_string(),
            reset_gauges: "true".to_string(),
            ..Default::default()
        };
        let policy = config.reset_policy().expect("valid");
        assert!(!policy.counters);
        assert!(policy.gauges);
        assert!(policy.histograms);
        assert!(!policy.text);
    }

    #[test]
    fn test_debug_flag() {
        assert!(!FlushEnvConfig::default().debug().expect("valid"));

        let on = FlushEnvConfig {
            debug: "1".to_string(),
            ..Default::default()
        };
        assert!(on.debug().expect("valid"));

        let bad = FlushEnvConfig {
            debug: "yes".to_string(),
            ..Default::default()
        };
        assert_eq!(
            bad.debug(),
            Err(ConfigError::InvalidBool {
                option: "debug",
                value: "yes".to_string()
            })
        );
    }
}
