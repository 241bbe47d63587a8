use crate::domain::check_bundle::{
    Broker, BrokerDetail, CheckBundle, CheckBundleMetrics, CheckBundleQuery, CidKind,
    HTTPTRAP_CHECK_TYPE, SUBMISSION_URL_KEY, check_bundle_metrics_cid,
};
use crate::domain::errors::ApiError;
use crate::domain::ports::CheckApi;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// In-memory check-management API for tests and offline runs.
///
/// Records every call by operation name so tests can assert how often the
/// resolver went to the API.
#[derive(Default)]
pub struct MockCheckApi {
    bundles: Mutex<Vec<CheckBundle>>,
    brokers: Mutex<Vec<Broker>>,
    bundle_metrics: Mutex<HashMap<String, CheckBundleMetrics>>,
    created_submission_url: Mutex<Option<String>>,
    calls: Mutex<HashMap<&'static str, usize>>,
    latency: Mutex<Option<Duration>>,
    fail_metric_updates: AtomicBool,
    next_id: AtomicU64,
}

impl MockCheckApi {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1000),
            ..Default::default()
        }
    }

    pub fn with_bundle(self, bundle: CheckBundle) -> Self {
        self.bundles.lock().push(bundle);
        self
    }

    pub fn with_httptrap_broker(self, cid: &str) -> Self {
        self.brokers.lock().push(Broker {
            cid: cid.to_string(),
            name: format!("broker{}", cid.trim_start_matches("/broker/")),
            details: vec![BrokerDetail {
                cn: "broker.example".to_string(),
                status: "active".to_string(),
                modules: vec![HTTPTRAP_CHECK_TYPE.to_string()],
            }],
        });
        self
    }

    /// Submission URL given to bundles created through this mock.
    pub fn with_created_submission_url(self, url: &str) -> Self {
        *self.created_submission_url.lock() = Some(url.to_string());
        self
    }

    /// Delay applied to every call, to widen race windows in tests.
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock() = Some(latency);
        self
    }

    /// Moves an existing bundle's trap, as a broker migration would.
    pub fn set_submission_url(&self, bundle_cid: &str, url: &str) {
        if let Some(bundle) = self.bundles.lock().iter_mut().find(|b| b.cid == bundle_cid) {
            bundle
                .config
                .insert(SUBMISSION_URL_KEY.to_string(), url.to_string());
        }
    }

    pub fn fail_metric_updates(&self, fail: bool) {
        self.fail_metric_updates.store(fail, Ordering::Release);
    }

    pub fn calls_to(&self, op: &str) -> usize {
        self.calls.lock().get(op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }

    pub fn bundles(&self) -> Vec<CheckBundle> {
        self.bundles.lock().clone()
    }

    pub fn stored_bundle_metrics(&self, cid: &str) -> Option<CheckBundleMetrics> {
        self.bundle_metrics.lock().get(cid).cloned()
    }

    async fn record(&self, op: &'static str) {
        *self.calls.lock().entry(op).or_default() += 1;
        debug!("MockCheckApi: {op}");
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl CheckApi for MockCheckApi {
    async fn fetch_check_bundle(&self, cid: &str) -> Result<CheckBundle, ApiError> {
        self.record("fetch_check_bundle").await;
        CidKind::CheckBundle.validate(cid)?;
        self.bundles
            .lock()
            .iter()
            .find(|b| b.cid == cid)
            .cloned()
            .ok_or_else(|| ApiError::NotFound {
                cid: cid.to_string(),
            })
    }

    async fn search_check_bundles(
        &self,
        query: &CheckBundleQuery,
    ) -> Result<Vec<CheckBundle>, ApiError> {
        self.record("search_check_bundles").await;
        Ok(self
            .bundles
            .lock()
            .iter()
            .filter(|b| b.target == query.target && b.check_type == query.check_type)
            .filter(|b| {
                query
                    .search_tag
                    .as_ref()
                    .is_none_or(|tag| b.tags.contains(tag))
            })
            .cloned()
            .collect())
    }

    async fn create_check_bundle(&self, bundle: &CheckBundle) -> Result<CheckBundle, ApiError> {
        self.record("create_check_bundle").await;
        let id = self.next_id.fetch_add(1, Ordering::AcqRel);
        let mut created = bundle.clone();
        created.cid = format!("/check_bundle/{id}");
        if let Some(url) = self.created_submission_url.lock().clone() {
            created.config.insert(SUBMISSION_URL_KEY.to_string(), url);
        }
        self.bundles.lock().push(created.clone());
        Ok(created)
    }

    async fn fetch_brokers(&self) -> Result<Vec<Broker>, ApiError> {
        self.record("fetch_brokers").await;
        Ok(self.brokers.lock().clone())
    }

    async fn fetch_check_bundle_metrics(&self, cid: &str) -> Result<CheckBundleMetrics, ApiError> {
        self.record("fetch_check_bundle_metrics").await;
        CidKind::CheckBundleMetrics.validate(cid)?;
        let known = self
            .bundles
            .lock()
            .iter()
            .any(|b| check_bundle_metrics_cid(&b.cid).is_ok_and(|m| m == cid));
        if !known {
            return Err(ApiError::NotFound {
                cid: cid.to_string(),
            });
        }
        Ok(self
            .bundle_metrics
            .lock()
            .get(cid)
            .cloned()
            .unwrap_or_else(|| CheckBundleMetrics {
                cid: cid.to_string(),
                metrics: Vec::new(),
            }))
    }

    async fn update_check_bundle_metrics(
        &self,
        metrics: &CheckBundleMetrics,
    ) -> Result<CheckBundleMetrics, ApiError> {
        self.record("update_check_bundle_metrics").await;
        CidKind::CheckBundleMetrics.validate(&metrics.cid)?;
        if self.fail_metric_updates.load(Ordering::Acquire) {
            return Err(ApiError::Status {
                url: metrics.cid.clone(),
                status: 500,
                body: "internal error".to_string(),
            });
        }
        self.bundle_metrics
            .lock()
            .insert(metrics.cid.clone(), metrics.clone());
        Ok(metrics.clone())
    }
}
