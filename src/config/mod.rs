//! Configuration module for trapmetrics.
//!
//! Options are kept string-encoded (`"30s"`, `"true"`, `"0"`) until
//! `Config::validate` turns them into typed `Settings`, so the same spellings
//! work from code, environment variables and TOML files.

mod check_config;
mod flush_config;

pub use check_config::{ApiSettings, CheckEnvConfig, CheckSettings};
pub use flush_config::{FlushEnvConfig, parse_bool, parse_duration};

use crate::domain::errors::ConfigError;
use crate::domain::metric::ResetPolicy;
use serde::Deserialize;
use std::time::Duration;

/// Raw configuration for a metrics handle.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub flush: FlushEnvConfig,
    pub check: CheckEnvConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            flush: FlushEnvConfig::from_env(),
            check: CheckEnvConfig::from_env()?,
        })
    }

    /// Load configuration from a TOML document with `[flush]` and `[check]` tables.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Shortcut for a handle that submits to a fixed trap URL.
    pub fn with_submission_url(url: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.check.submission_url = url.into();
        config
    }

    /// Parse and check every option. Any error here is fatal.
    pub fn validate(&self) -> Result<Settings, ConfigError> {
        Ok(Settings {
            interval: self.flush.interval()?,
            submit_timeout: self.flush.submit_timeout()?,
            reset: self.flush.reset_policy()?,
            debug: self.flush.debug()?,
            check: self.check.validate()?,
        })
    }
}

/// Validated, typed configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub interval: Duration,
    pub submit_timeout: Duration,
    pub reset: ResetPolicy,
    pub debug: bool,
    pub check: CheckSettings,
}
