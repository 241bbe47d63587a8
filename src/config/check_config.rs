//! Check configuration parsing from environment variables.
//!
//! This module handles where metrics go: either a fixed submission URL, or
//! the API credentials and check bundle identity used to look one up.

use crate::config::flush_config::parse_duration;
use crate::domain::check_bundle::CidKind;
use crate::domain::errors::ConfigError;
use serde::Deserialize;
use std::env;
use std::time::Duration;
use url::Url;

pub const DEFAULT_API_URL: &str = "https://api.circonus.com/v2";
pub const DEFAULT_API_APP: &str = "trapmetrics";
pub const DEFAULT_TRAP_MAX_URL_AGE: Duration = Duration::from_secs(60);

/// Check environment configuration
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct CheckEnvConfig {
    /// Fixed trap URL. When set, no API lookup ever happens.
    pub submission_url: String,

    // API credentials
    pub api_token: String,
    pub api_app: String,
    pub api_url: String,

    // Check bundle identity
    pub check_bundle_cid: String,
    pub target: String,
    pub display_name: String,
    pub tags: Vec<String>,
    pub search_tag: String,
    pub broker_cid: String,
    pub metric_filters: Vec<Vec<String>>,

    /// How long an API-resolved trap URL is trusted before re-resolving.
    pub trap_max_url_age: String,
}

impl CheckEnvConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let metric_filters = match env::var("TRAPMETRICS_METRIC_FILTERS") {
            Ok(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw)
                .map_err(|e| ConfigError::Parse(format!("TRAPMETRICS_METRIC_FILTERS: {e}")))?,
            _ => Vec::new(),
        };

        Ok(Self {
            submission_url: env::var("TRAPMETRICS_SUBMISSION_URL").unwrap_or_default(),
            api_token: env::var("TRAPMETRICS_API_TOKEN").unwrap_or_default(),
            api_app: env::var("TRAPMETRICS_API_APP").unwrap_or_default(),
            api_url: env::var("TRAPMETRICS_API_URL").unwrap_or_default(),
            check_bundle_cid: env::var("TRAPMETRICS_CHECK_BUNDLE_CID").unwrap_or_default(),
            target: env::var("TRAPMETRICS_CHECK_TARGET").unwrap_or_default(),
            display_name: env::var("TRAPMETRICS_CHECK_DISPLAY_NAME").unwrap_or_default(),
            tags: env::var("TRAPMETRICS_CHECK_TAGS")
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            search_tag: env::var("TRAPMETRICS_CHECK_SEARCH_TAG").unwrap_or_default(),
            broker_cid: env::var("TRAPMETRICS_BROKER_CID").unwrap_or_default(),
            metric_filters,
            trap_max_url_age: env::var("TRAPMETRICS_TRAP_MAX_URL_AGE").unwrap_or_default(),
        })
    }

    pub fn validate(&self) -> Result<CheckSettings, ConfigError> {
        let submission_url = non_empty(&self.submission_url)
            .map(|raw| parse_url("submission_url", raw))
            .transpose()?;

        let api = match non_empty(&self.api_token) {
            Some(token) => Some(ApiSettings {
                token: token.to_string(),
                app: non_empty(&self.api_app)
                    .unwrap_or(DEFAULT_API_APP)
                    .to_string(),
                url: parse_url(
                    "api_url",
                    non_empty(&self.api_url).unwrap_or(DEFAULT_API_URL),
                )?,
            }),
            None => None,
        };

        if submission_url.is_none() && api.is_none() {
            return Err(ConfigError::MissingCredentials);
        }

        let target = non_empty(&self.target)
            .map(str::to_string)
            .unwrap_or_else(default_target);
        let display_name = non_empty(&self.display_name)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{target} /{DEFAULT_API_APP}"));
        let broker_cid = non_empty(&self.broker_cid)
            .map(|cid| parse_cid("broker_cid", CidKind::Broker, cid))
            .transpose()?;

        Ok(CheckSettings {
            submission_url,
            api,
            check_bundle_cid: non_empty(&self.check_bundle_cid).map(str::to_string),
            target,
            display_name,
            tags: self.tags.clone(),
            search_tag: non_empty(&self.search_tag).map(str::to_string),
            broker_cid,
            metric_filters: self.metric_filters.clone(),
            trap_max_url_age: parse_duration("trap_max_url_age", &self.trap_max_url_age)?
                .unwrap_or(DEFAULT_TRAP_MAX_URL_AGE),
        })
    }
}

/// Credentials and base URL for the check-management API.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiSettings {
    pub token: String,
    pub app: String,
    pub url: Url,
}

/// Validated check configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckSettings {
    pub submission_url: Option<Url>,
    pub api: Option<ApiSettings>,
    pub check_bundle_cid: Option<String>,
    pub target: String,
    pub display_name: String,
    pub tags: Vec<String>,
    pub search_tag: Option<String>,
    pub broker_cid: Option<String>,
    pub metric_filters: Vec<Vec<String>>,
    pub trap_max_url_age: Duration,
}

impl CheckSettings {
    /// Metric-rules checks carry tags server-side instead of in stream tags.
    pub fn uses_metric_rules(&self) -> bool {
        !self.metric_filters.is_empty()
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn parse_url(option: &'static str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|_| ConfigError::InvalidUrl {
        option,
        value: raw.to_string(),
    })
}

fn parse_cid(option: &'static str, kind: CidKind, raw: &str) -> Result<String, ConfigError> {
    kind.validate(raw).map_err(|_| ConfigError::InvalidCid {
        option,
        value: raw.to_string(),
    })?;
    Ok(raw.to_string())
}

fn default_target() -> String {
    env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
