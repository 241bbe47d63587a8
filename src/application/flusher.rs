//! Snapshot-and-submit cycle.
//!
//! At most one flush runs at a time per handle; a caller arriving while one is
//! in flight returns `FlushOutcome::AlreadyFlushing` right away. A snapshot
//! that fails to submit is dropped. Reset kinds were already cleared, and the
//! next interval carries fresh data.

use crate::application::registry::MetricRegistry;
use crate::application::tagging::TagApplier;
use crate::application::trap_resolver::{TrapEndpoint, TrapResolver};
use crate::domain::errors::{FlushError, SubmitError};
use crate::domain::metric::{MetricSnapshot, ResetPolicy};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Another flush was in flight; nothing was done.
    AlreadyFlushing,
    /// The registry had nothing to report; no request was made.
    NoMetrics,
    Submitted { metrics: usize, status: u16 },
}

/// Releases the in-flight flag when the flush ends, however it ends.
struct FlushGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct FlushEngine {
    registry: Arc<MetricRegistry>,
    resolver: Arc<TrapResolver>,
    tags: Arc<dyn TagApplier>,
    client: Client,
    reset: ResetPolicy,
    debug: bool,
    flushing: AtomicBool,
    submissions: AtomicU64,
}

impl FlushEngine {
    pub fn new(
        registry: Arc<MetricRegistry>,
        resolver: Arc<TrapResolver>,
        tags: Arc<dyn TagApplier>,
        client: Client,
        reset: ResetPolicy,
        debug: bool,
    ) -> Self {
        Self {
            registry,
            resolver,
            tags,
            client,
            reset,
            debug,
            flushing: AtomicBool::new(false),
            submissions: AtomicU64::new(0),
        }
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::Acquire)
    }

    /// Number of submission requests sent so far.
    pub fn submission_count(&self) -> u64 {
        self.submissions.load(Ordering::Acquire)
    }

    pub async fn flush(&self) -> Result<FlushOutcome, FlushError> {
        if self
            .flushing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("FlushEngine: Flush already in progress, skipping");
            return Ok(FlushOutcome::AlreadyFlushing);
        }
        let _guard = FlushGuard {
            flag: &self.flushing,
        };

        // No snapshot is taken without a trap, so unresolved data is not lost.
        let endpoint = self.resolver.get_endpoint().await.map_err(|e| {
            warn!("FlushEngine: Unable to resolve trap: {}", e);
            FlushError::from(e)
        })?;

        if let Some(uses_metric_rules) = endpoint.uses_metric_rules {
            self.tags.adopt_bundle_mode(uses_metric_rules);
        }
        self.push_pending_tags().await;

        let snapshot = self.registry.snapshot(self.reset);
        if snapshot.is_empty() {
            debug!("FlushEngine: No metrics to submit");
            return Ok(FlushOutcome::NoMetrics);
        }

        match self.submit(&endpoint, &snapshot).await {
            Ok(status) => {
                debug!(
                    "FlushEngine: Submitted {} metrics to {} (status {})",
                    snapshot.len(),
                    endpoint.url,
                    status
                );
                Ok(FlushOutcome::Submitted {
                    metrics: snapshot.len(),
                    status,
                })
            }
            Err(e) => {
                if e.is_endpoint_invalid() {
                    self.resolver.invalidate();
                }
                warn!(
                    "FlushEngine: Dropped snapshot of {} metrics: {}",
                    snapshot.len(),
                    e
                );
                Err(e.into())
            }
        }
    }

    async fn push_pending_tags(&self) {
        let Some(pending) = self.tags.take_pending_update() else {
            return;
        };
        match self
            .resolver
            .update_metric_tags(&pending, |name| self.registry.kind_of(name))
            .await
        {
            Ok(true) => info!("FlushEngine: Updated tags for {} metrics", pending.len()),
            Ok(false) => debug!("FlushEngine: No check bundle to carry metric tags, keeping them local"),
            Err(e) => {
                warn!("FlushEngine: Unable to update metric tags, will retry: {}", e);
                self.tags.retry_pending_update();
            }
        }
    }

    async fn submit(
        &self,
        endpoint: &TrapEndpoint,
        snapshot: &MetricSnapshot,
    ) -> Result<u16, SubmitError> {
        let body = snapshot.to_json()?;
        if self.debug {
            debug!(
                "FlushEngine: Payload for {}: {}",
                endpoint.url,
                String::from_utf8_lossy(&body)
            );
        }

        let url = endpoint.url.to_string();
        self.submissions.fetch_add(1, Ordering::AcqRel);
        let response = self
            .client
            .put(endpoint.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| classify_transport_error(&url, e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(status.as_u16());
        }
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(SubmitError::EndpointInvalid {
                url,
                status: status.as_u16(),
            });
        }
        let body = response.text().await.unwrap_or_default();
        Err(SubmitError::Status {
            url,
            status: status.as_u16(),
            body,
        })
    }
}

fn classify_transport_error(url: &str, e: reqwest::Error) -> SubmitError {
    if e.is_timeout() {
        SubmitError::Timeout {
            url: url.to_string(),
        }
    } else {
        SubmitError::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        }
    }
}
