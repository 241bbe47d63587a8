//! Resolves and caches the trap endpoint metrics are submitted to.
//!
//! A configured submission URL is used as-is and never expires. Otherwise the
//! check bundle is located (or created) through the check-management API and
//! its `submission_url` is cached for `trap_max_url_age`.

use crate::config::CheckSettings;
use crate::domain::check_bundle::{
    CheckBundle, CheckBundleMetric, CheckBundleQuery, HTTPTRAP_CHECK_TYPE, check_bundle_metrics_cid,
};
use crate::domain::errors::{ApiError, ResolveError};
use crate::domain::metric::MetricKind;
use crate::domain::ports::CheckApi;
use crate::domain::tags::TagSet;
use parking_lot::RwLock;
use rand::seq::IndexedRandom;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

/// Resolver state, as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapState {
    Unresolved,
    Resolving,
    Resolved,
    /// A cached endpoint outlived its max age; the next lookup re-resolves.
    Stale,
}

/// An immutable copy of the resolved trap, safe to hold across an invalidation.
#[derive(Debug, Clone, PartialEq)]
pub struct TrapEndpoint {
    pub url: Url,
    pub check_bundle_cid: Option<String>,
    pub broker_cid: Option<String>,
    /// Tagging regime of the check bundle; `None` for a fixed submission URL.
    pub uses_metric_rules: Option<bool>,
}

#[derive(Debug, Clone)]
struct TrapDescriptor {
    endpoint: TrapEndpoint,
    valid_until: Option<Instant>,
}

impl TrapDescriptor {
    fn is_fresh(&self) -> bool {
        self.valid_until.is_none_or(|deadline| Instant::now() < deadline)
    }
}

/// Clears the resolving flag even if the resolution future is dropped.
struct ResolvingGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> ResolvingGuard<'a> {
    fn new(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self { flag }
    }
}

impl Drop for ResolvingGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct TrapResolver {
    check: CheckSettings,
    api: Option<Arc<dyn CheckApi>>,
    cached: RwLock<Option<TrapDescriptor>>,
    resolving: AtomicBool,
    /// Serializes resolutions; waiters pick up the winner's result.
    resolve_lock: tokio::sync::Mutex<()>,
    resolutions: AtomicU64,
}

impl TrapResolver {
    pub fn new(check: CheckSettings, api: Option<Arc<dyn CheckApi>>) -> Self {
        Self {
            check,
            api,
            cached: RwLock::new(None),
            resolving: AtomicBool::new(false),
            resolve_lock: tokio::sync::Mutex::new(()),
            resolutions: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> TrapState {
        if self.resolving.load(Ordering::Acquire) {
            return TrapState::Resolving;
        }
        match self.cached.read().as_ref() {
            None => TrapState::Unresolved,
            Some(descriptor) if descriptor.is_fresh() => TrapState::Resolved,
            Some(_) => TrapState::Stale,
        }
    }

    /// Number of resolution attempts made so far.
    pub fn resolution_count(&self) -> u64 {
        self.resolutions.load(Ordering::Acquire)
    }

    /// The cached endpoint, resolving first if there is none or it went stale.
    pub async fn get_endpoint(&self) -> Result<TrapEndpoint, ResolveError> {
        if let Some(endpoint) = self.fresh_endpoint() {
            return Ok(endpoint);
        }

        let _lock = self.resolve_lock.lock().await;
        // another caller may have resolved while we waited
        if let Some(endpoint) = self.fresh_endpoint() {
            return Ok(endpoint);
        }

        let descriptor = {
            let _resolving = ResolvingGuard::new(&self.resolving);
            self.resolve().await?
        };
        let endpoint = descriptor.endpoint.clone();
        *self.cached.write() = Some(descriptor);
        Ok(endpoint)
    }

    /// Drops the cached endpoint. Safe to call any number of times.
    pub fn invalidate(&self) {
        if let Some(old) = self.cached.write().take() {
            info!("TrapResolver: Invalidated trap {}", old.endpoint.url);
        }
    }

    fn fresh_endpoint(&self) -> Option<TrapEndpoint> {
        self.cached
            .read()
            .as_ref()
            .filter(|d| d.is_fresh())
            .map(|d| d.endpoint.clone())
    }

    async fn resolve(&self) -> Result<TrapDescriptor, ResolveError> {
        self.resolutions.fetch_add(1, Ordering::AcqRel);

        if let Some(url) = &self.check.submission_url {
            debug!("TrapResolver: Using configured submission URL");
            return Ok(TrapDescriptor {
                endpoint: TrapEndpoint {
                    url: url.clone(),
                    check_bundle_cid: None,
                    broker_cid: None,
                    uses_metric_rules: None,
                },
                valid_until: None,
            });
        }

        let api = self.api.as_deref().ok_or(ResolveError::NoApiClient)?;
        let bundle = self.locate_or_create(api).await?;

        let raw_url = bundle
            .submission_url()
            .ok_or_else(|| ResolveError::NoSubmissionUrl {
                cid: bundle.cid.clone(),
            })?;
        let url = Url::parse(raw_url).map_err(|_| ResolveError::InvalidSubmissionUrl {
            cid: bundle.cid.clone(),
            url: raw_url.to_string(),
        })?;

        info!(
            "TrapResolver: Resolved trap for {} via broker {}",
            bundle.cid,
            bundle.brokers.first().map(String::as_str).unwrap_or("unknown")
        );

        Ok(TrapDescriptor {
            endpoint: TrapEndpoint {
                url,
                check_bundle_cid: Some(bundle.cid.clone()),
                broker_cid: bundle.brokers.first().cloned(),
                uses_metric_rules: Some(bundle.uses_metric_rules()),
            },
            valid_until: Some(Instant::now() + self.check.trap_max_url_age),
        })
    }

    async fn locate_or_create(&self, api: &dyn CheckApi) -> Result<CheckBundle, ResolveError> {
        if let Some(cid) = &self.check.check_bundle_cid {
            return match api.fetch_check_bundle(cid).await {
                Ok(bundle) => Ok(bundle),
                Err(ApiError::NotFound { .. }) => {
                    warn!("TrapResolver: Check bundle {cid} not found, creating a new one");
                    self.create(api).await
                }
                Err(e) => Err(e.into()),
            };
        }

        let query = self.query();
        let found = api.search_check_bundles(&query).await?;
        if let Some(bundle) = found.into_iter().find(CheckBundle::is_active) {
            debug!("TrapResolver: Found check bundle {}", bundle.cid);
            return Ok(bundle);
        }

        info!(
            "TrapResolver: No check bundle for {}, creating one",
            self.check.target
        );
        self.create(api).await
    }

    fn query(&self) -> CheckBundleQuery {
        CheckBundleQuery {
            target: self.check.target.clone(),
            check_type: HTTPTRAP_CHECK_TYPE.to_string(),
            search_tag: self.check.search_tag.clone(),
        }
    }

    async fn create(&self, api: &dyn CheckApi) -> Result<CheckBundle, ResolveError> {
        let broker_cid = match &self.check.broker_cid {
            Some(cid) => cid.clone(),
            None => self.select_broker(api).await?,
        };

        let mut tags = self.check.tags.clone();
        if let Some(search_tag) = &self.check.search_tag {
            if !tags.contains(search_tag) {
                tags.push(search_tag.clone());
            }
        }

        let bundle = CheckBundle {
            brokers: vec![broker_cid],
            config: BTreeMap::from([("asynch_metrics".to_string(), "true".to_string())]),
            display_name: self.check.display_name.clone(),
            metric_filters: self.check.metric_filters.clone(),
            period: 60,
            status: "active".to_string(),
            tags,
            target: self.check.target.clone(),
            timeout: 10.0,
            check_type: HTTPTRAP_CHECK_TYPE.to_string(),
            ..Default::default()
        };

        let created = api.create_check_bundle(&bundle).await?;
        info!("TrapResolver: Created check bundle {}", created.cid);
        Ok(created)
    }

    async fn select_broker(&self, api: &dyn CheckApi) -> Result<String, ResolveError> {
        let brokers = api.fetch_brokers().await?;
        let usable: Vec<_> = brokers.iter().filter(|b| b.offers_httptrap()).collect();
        usable
            .choose(&mut rand::rng())
            .map(|broker| broker.cid.clone())
            .ok_or(ResolveError::NoBroker)
    }

    /// Pushes metric-rules tags onto the check bundle's metric definitions.
    ///
    /// Returns `Ok(false)` when there is no check bundle to carry them (fixed
    /// submission URL). `kind_of` maps names to kinds for metrics the server
    /// does not know yet.
    pub async fn update_metric_tags(
        &self,
        pending: &HashMap<String, TagSet>,
        kind_of: impl Fn(&str) -> Option<MetricKind>,
    ) -> Result<bool, ResolveError> {
        let Some(bundle_cid) = self.fresh_endpoint().and_then(|e| e.check_bundle_cid) else {
            return Ok(false);
        };
        let api = self.api.as_deref().ok_or(ResolveError::NoApiClient)?;

        let metrics_cid = check_bundle_metrics_cid(&bundle_cid)?;
        let mut current = api.fetch_check_bundle_metrics(&metrics_cid).await?;

        for (name, tags) in pending {
            match current.metrics.iter_mut().find(|m| &m.name == name) {
                Some(metric) => metric.tags = tags.to_strings(),
                None => current.metrics.push(CheckBundleMetric {
                    name: name.clone(),
                    metric_type: metric_type_for(kind_of(name)).to_string(),
                    status: "active".to_string(),
                    tags: tags.to_strings(),
                    units: None,
                }),
            }
        }

        api.update_check_bundle_metrics(&current).await?;
        Ok(true)
    }
}

fn metric_type_for(kind: Option<MetricKind>) -> &'static str {
    match kind {
        Some(MetricKind::Histogram) => "histogram",
        Some(MetricKind::Text) => "text",
        _ => "numeric",
    }
}
