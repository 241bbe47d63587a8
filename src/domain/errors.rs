use crate::domain::metric::MetricKind;
use thiserror::Error;

/// Errors raised while turning a raw `Config` into usable settings.
///
/// These are fatal: no metrics handle is built when one occurs.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid duration for {option}: {value} ({reason})")]
    InvalidDuration {
        option: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid boolean for {option}: {value} (expected true/1/false/0)")]
    InvalidBool { option: &'static str, value: String },

    #[error("invalid URL for {option}: {value}")]
    InvalidUrl { option: &'static str, value: String },

    #[error("invalid CID for {option}: {value}")]
    InvalidCid { option: &'static str, value: String },

    #[error("invalid check manager configuration (no API token AND no submission url)")]
    MissingCredentials,

    #[error("invalid configuration file: {0}")]
    Parse(String),
}

/// Errors returned by the check-management API layer.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ApiError {
    #[error("Invalid {resource} CID [{cid}]")]
    InvalidCid { resource: &'static str, cid: String },

    #[error("{cid} not found")]
    NotFound { cid: String },

    #[error("API request to {url} failed with status {status}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("API request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("unable to decode API response from {url}: {reason}")]
    Decode { url: String, reason: String },
}

/// Errors raised while locating the trap endpoint.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResolveError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("no check management API client configured")]
    NoApiClient,

    #[error("check bundle {cid} has no submission_url")]
    NoSubmissionUrl { cid: String },

    #[error("check bundle {cid} has invalid submission_url {url}")]
    InvalidSubmissionUrl { cid: String, url: String },

    #[error("no active broker offering the httptrap module")]
    NoBroker,
}

/// Errors raised while delivering a snapshot to the trap.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("trap endpoint {url} is no longer valid (status {status})")]
    EndpointInvalid { url: String, status: u16 },

    #[error("trap {url} rejected submission with status {status}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("submission to {url} timed out")]
    Timeout { url: String },

    #[error("submission to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("unable to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl SubmitError {
    /// True when the failure says the endpoint itself is gone, not just unhealthy.
    pub fn is_endpoint_invalid(&self) -> bool {
        matches!(self, SubmitError::EndpointInvalid { .. })
    }
}

/// A flush that ran but did not deliver.
#[derive(Debug, Error)]
pub enum FlushError {
    #[error("unable to resolve trap: {0}")]
    Resolve(#[from] ResolveError),

    #[error("unable to submit metrics: {0}")]
    Submit(#[from] SubmitError),
}

/// A malformed tag passed to one of the tag APIs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TagError {
    #[error("malformed tag {tag:?}: expected key:value")]
    Malformed { tag: String },

    #[error("malformed tag {tag:?}: empty key")]
    EmptyKey { tag: String },
}

/// The same metric name was written with two different kinds.
///
/// This is a programming error in the caller, so the registry panics with
/// this message instead of returning it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("metric {name:?} is a {existing}, cannot use it as a {requested}")]
pub struct KindMismatch {
    pub name: String,
    pub existing: MetricKind,
    pub requested: MetricKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_cid_formatting() {
        let err = ApiError::InvalidCid {
            resource: "check bundle metrics",
            cid: "none".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid check bundle metrics CID [none]");
    }

    #[test]
    fn test_kind_mismatch_formatting() {
        let err = KindMismatch {
            name: "foo".to_string(),
            existing: MetricKind::Counter,
            requested: MetricKind::Gauge,
        };
        let msg = err.to_string();
        assert!(msg.contains("\"foo\""));
        assert!(msg.contains("counter"));
        assert!(msg.contains("gauge"));
    }

    #[test]
    fn test_endpoint_invalid_classification() {
        let gone = SubmitError::EndpointInvalid {
            url: "http://trap".to_string(),
            status: 404,
        };
        let busy = SubmitError::Status {
            url: "http://trap".to_string(),
            status: 503,
            body: String::new(),
        };
        assert!(gone.is_endpoint_invalid());
        assert!(!busy.is_endpoint_invalid());
    }
}
