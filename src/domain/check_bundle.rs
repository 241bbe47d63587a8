//! Check bundle, broker and check bundle metrics resources, as exchanged with
//! the check-management API.

use crate::domain::errors::ApiError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

pub const HTTPTRAP_CHECK_TYPE: &str = "httptrap";
pub const SUBMISSION_URL_KEY: &str = "submission_url";

static CHECK_BUNDLE_CID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/check_bundle/[0-9]+$").expect("static regex"));
static CHECK_BUNDLE_METRICS_CID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/check_bundle_metrics/[0-9]+$").expect("static regex"));
static BROKER_CID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/broker/[0-9]+$").expect("static regex"));

/// Resource types addressed by CID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CidKind {
    CheckBundle,
    CheckBundleMetrics,
    Broker,
}

impl CidKind {
    pub fn resource_name(&self) -> &'static str {
        match self {
            CidKind::CheckBundle => "check bundle",
            CidKind::CheckBundleMetrics => "check bundle metrics",
            CidKind::Broker => "broker",
        }
    }

    fn pattern(&self) -> &'static Regex {
        match self {
            CidKind::CheckBundle => &CHECK_BUNDLE_CID,
            CidKind::CheckBundleMetrics => &CHECK_BUNDLE_METRICS_CID,
            CidKind::Broker => &BROKER_CID,
        }
    }

    /// Checks `cid` against the pattern for this resource type.
    pub fn validate(&self, cid: &str) -> Result<(), ApiError> {
        if cid.is_empty() {
            return Err(ApiError::InvalidCid {
                resource: self.resource_name(),
                cid: "none".to_string(),
            });
        }
        if !self.pattern().is_match(cid) {
            return Err(ApiError::InvalidCid {
                resource: self.resource_name(),
                cid: cid.to_string(),
            });
        }
        Ok(())
    }
}

/// The metrics resource paired with a check bundle shares its numeric id.
pub fn check_bundle_metrics_cid(bundle_cid: &str) -> Result<String, ApiError> {
    CidKind::CheckBundle.validate(bundle_cid)?;
    Ok(bundle_cid.replacen("/check_bundle/", "/check_bundle_metrics/", 1))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CheckBundle {
    #[serde(rename = "_cid", default, skip_serializing_if = "String::is_empty")]
    pub cid: String,
    #[serde(default)]
    pub brokers: Vec<String>,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub metric_filters: Vec<Vec<String>>,
    #[serde(default)]
    pub metrics: Vec<CheckBundleMetric>,
    #[serde(default)]
    pub period: u32,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub timeout: f32,
    #[serde(rename = "type", default)]
    pub check_type: String,
}

impl CheckBundle {
    pub fn submission_url(&self) -> Option<&str> {
        self.config
            .get(SUBMISSION_URL_KEY)
            .map(String::as_str)
            .filter(|url| !url.is_empty())
    }

    pub fn is_active(&self) -> bool {
        self.status.is_empty() || self.status == "active"
    }

    /// True when metric collection is driven by filter rules.
    pub fn uses_metric_rules(&self) -> bool {
        !self.metric_filters.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CheckBundleMetric {
    pub name: String,
    #[serde(rename = "type")]
    pub metric_type: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CheckBundleMetrics {
    #[serde(rename = "_cid")]
    pub cid: String,
    #[serde(default)]
    pub metrics: Vec<CheckBundleMetric>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BrokerDetail {
    #[serde(default)]
    pub cn: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub modules: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Broker {
    #[serde(rename = "_cid")]
    pub cid: String,
    #[serde(rename = "_name", default)]
    pub name: String,
    #[serde(rename = "_details", default)]
    pub details: Vec<BrokerDetail>,
}

impl Broker {
    /// A broker can host a trap when any active node runs the httptrap module.
    pub fn offers_httptrap(&self) -> bool {
        self.details.iter().any(|d| {
            d.status == "active" && d.modules.iter().any(|m| m == HTTPTRAP_CHECK_TYPE)
        })
    }
}

/// Search criteria identifying "our" check bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckBundleQuery {
    pub target: String,
    pub check_type: String,
    pub search_tag: Option<String>,
}

impl CheckBundleQuery {
    /// Search expression understood by the API's `search` parameter.
    pub fn to_search(&self) -> String {
        let mut search = format!(
            r#"(active:1)(type:"{}")(host:"{}")"#,
            self.check_type, self.target
        );
        if let Some(tag) = &self.search_tag {
            search.push_str(&format!("(tags:{tag})"));
        }
        search
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cid_validation() {
        assert!(CidKind::CheckBundle.validate("/check_bundle/1234").is_ok());
        assert_eq!(
            CidKind::CheckBundle.validate("").unwrap_err().to_string(),
            "Invalid check bundle CID [none]"
        );
        assert_eq!(
            CidKind::CheckBundleMetrics
                .validate("/invalid")
                .unwrap_err()
                .to_string(),
            "Invalid check bundle metrics CID [/invalid]"
        );
        assert!(CidKind::Broker.validate("/check_bundle/1").is_err());
    }

    #[test]
    fn test_metrics_cid_from_bundle_cid() {
        assert_eq!(
            check_bundle_metrics_cid("/check_bundle/42").expect("valid"),
            "/check_bundle_metrics/42"
        );
        assert!(check_bundle_metrics_cid("/broker/42").is_err());
    }

    #[test]
    fn test_check_bundle_decode() {
        let raw = r#"{
            "_cid": "/check_bundle/1234",
            "brokers": ["/broker/1"],
            "config": {"submission_url": "https://trap.example/module/httptrap/abc/secret"},
            "display_name": "web01 /cgm",
            "metric_filters": [["allow", "^.+$", ""]],
            "status": "active",
            "target": "web01",
            "type": "httptrap"
        }"#;
        let bundle: CheckBundle = serde_json::from_str(raw).expect("decode");
        assert_eq!(
            bundle.submission_url(),
            Some("https://trap.example/module/httptrap/abc/secret")
        );
        assert!(bundle.uses_metric_rules());
        assert!(bundle.is_active());
    }

    #[test]
    fn test_broker_httptrap_capability() {
        let broker = Broker {
            cid: "/broker/1".to_string(),
            name: "b1".to_string(),
            details: vec![BrokerDetail {
                cn: "b1.example".to_string(),
                status: "active".to_string(),
                modules: vec!["http".to_string(), "httptrap".to_string()],
            }],
        };
        assert!(broker.offers_httptrap());
    }

    #[test]
    fn test_query_search_expression() {
        let query = CheckBundleQuery {
            target: "web01".to_string(),
            check_type: HTTPTRAP_CHECK_TYPE.to_string(),
            search_tag: Some("service:api".to_string()),
        };
        assert_eq!(
            query.to_search(),
            r#"(active:1)(type:"httptrap")(host:"web01")(tags:service:api)"#
        );
    }
}
