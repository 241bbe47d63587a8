//! The `Metrics` handle: one registry, one trap, one flush cycle.

use crate::application::flusher::{FlushEngine, FlushOutcome};
use crate::application::registry::{GaugeFn, MetricRegistry, TextFn};
use crate::application::scheduler::{FlushScheduler, SchedulerHandle};
use crate::application::tagging::{CheckTagApplier, TagApplier, TagMode};
use crate::application::trap_resolver::{TrapResolver, TrapState};
use crate::config::{Config, Settings};
use crate::domain::errors::{ConfigError, FlushError, TagError};
use crate::domain::metric::{GaugeValue, MetricKind, MetricSnapshot, ResetPolicy};
use crate::domain::ports::CheckApi;
use crate::infrastructure::{CirconusApiClient, HttpClientFactory};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

/// Cheap to clone; every clone shares the same registry and flush state.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<Inner>,
}

struct Inner {
    settings: Settings,
    registry: Arc<MetricRegistry>,
    resolver: Arc<TrapResolver>,
    tags: Arc<dyn TagApplier>,
    engine: Arc<FlushEngine>,
    scheduler: Mutex<Option<SchedulerHandle>>,
}

impl Metrics {
    /// Builds a handle, talking to the check-management API over HTTP when an
    /// API token is configured.
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        let settings = config.validate()?;
        let api: Option<Arc<dyn CheckApi>> = settings
            .check
            .api
            .as_ref()
            .map(|api| Arc::new(CirconusApiClient::new(api)) as Arc<dyn CheckApi>);
        Ok(Self::from_settings(settings, api))
    }

    /// Builds a handle around a caller-supplied `CheckApi`.
    pub fn with_api(config: &Config, api: Option<Arc<dyn CheckApi>>) -> Result<Self, ConfigError> {
        Ok(Self::from_settings(config.validate()?, api))
    }

    pub fn from_settings(settings: Settings, api: Option<Arc<dyn CheckApi>>) -> Self {
        let registry = Arc::new(MetricRegistry::new());
        let resolver = Arc::new(TrapResolver::new(settings.check.clone(), api));
        let tags: Arc<dyn TagApplier> =
            Arc::new(CheckTagApplier::new(settings.check.uses_metric_rules()));
        let engine = Arc::new(FlushEngine::new(
            registry.clone(),
            resolver.clone(),
            tags.clone(),
            HttpClientFactory::create_submission_client(settings.submit_timeout),
            settings.reset,
            settings.debug,
        ));

        info!(
            "Metrics: Initialized (interval: {:?}, tag mode: {:?})",
            settings.interval,
            tags.mode()
        );

        Self {
            inner: Arc::new(Inner {
                settings,
                registry,
                resolver,
                tags,
                engine,
                scheduler: Mutex::new(None),
            }),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn registry(&self) -> &MetricRegistry {
        &self.inner.registry
    }

    /// The configured regime until a check bundle resolves, then the bundle's.
    pub fn tag_mode(&self) -> TagMode {
        self.inner.tags.mode()
    }

    pub fn trap_state(&self) -> TrapState {
        self.inner.resolver.state()
    }

    pub fn resolver(&self) -> &TrapResolver {
        &self.inner.resolver
    }

    // ===== Counters =====

    pub fn increment(&self, name: &str) {
        self.inner.registry.increment(name);
    }

    pub fn increment_by(&self, name: &str, delta: u64) {
        self.inner.registry.increment_by(name, delta);
    }

    pub fn add(&self, name: &str, delta: i64) {
        self.inner.registry.add(name, delta);
    }

    pub fn set_counter(&self, name: &str, value: i64) {
        self.inner.registry.set_counter(name, value);
    }

    pub fn remove_counter(&self, name: &str) {
        self.inner.registry.remove_counter(name);
    }

    // ===== Gauges =====

    pub fn set_gauge(&self, name: &str, value: impl Into<GaugeValue>) {
        self.inner.registry.set_gauge(name, value);
    }

    pub fn add_gauge(&self, name: &str, delta: impl Into<GaugeValue>) {
        self.inner.registry.add_gauge(name, delta);
    }

    pub fn set_gauge_func(&self, name: &str, func: GaugeFn) {
        self.inner.registry.set_gauge_func(name, func);
    }

    pub fn remove_gauge(&self, name: &str) {
        self.inner.registry.remove_gauge(name);
    }

    pub fn remove_gauge_func(&self, name: &str) {
        self.inner.registry.remove_gauge_func(name);
    }

    // ===== Histograms =====

    pub fn timing(&self, name: &str, elapsed: f64) {
        self.inner.registry.timing(name, elapsed);
    }

    pub fn record_value(&self, name: &str, value: f64) {
        self.inner.registry.record_value(name, value);
    }

    pub fn remove_histogram(&self, name: &str) {
        self.inner.registry.remove_histogram(name);
    }

    // ===== Text =====

    pub fn set_text(&self, name: &str, value: impl Into<String>) {
        self.inner.registry.set_text(name, value);
    }

    pub fn set_text_func(&self, name: &str, func: TextFn) {
        self.inner.registry.set_text_func(name, func);
    }

    pub fn remove_text(&self, name: &str) {
        self.inner.registry.remove_text(name);
    }

    pub fn remove_text_func(&self, name: &str) {
        self.inner.registry.remove_text_func(name);
    }

    pub fn kind_of(&self, name: &str) -> Option<MetricKind> {
        self.inner.registry.kind_of(name)
    }

    // ===== Tags =====

    /// Replaces the tags of `name`; returns the name to write metrics under.
    pub fn set_metric_tags(&self, name: &str, tags: &[&str]) -> Result<String, TagError> {
        self.inner.tags.set_tags(name, tags)
    }

    /// Merges `tags` into those of `name`; returns the name to write metrics under.
    pub fn add_metric_tags(&self, name: &str, tags: &[&str]) -> Result<String, TagError> {
        self.inner.tags.add_tags(name, tags)
    }

    // ===== Flushing =====

    /// Point-in-time view of the registry, without resetting anything.
    pub fn snapshot(&self) -> MetricSnapshot {
        self.inner.registry.snapshot(ResetPolicy::NONE)
    }

    pub async fn flush(&self) -> Result<FlushOutcome, FlushError> {
        self.inner.engine.flush().await
    }

    pub fn is_flushing(&self) -> bool {
        self.inner.engine.is_flushing()
    }

    pub fn submission_count(&self) -> u64 {
        self.inner.engine.submission_count()
    }

    /// Starts periodic flushing on the current tokio runtime. No-op if already started.
    pub fn start(&self) {
        let mut scheduler = self.inner.scheduler.lock();
        if scheduler.as_ref().is_some_and(SchedulerHandle::is_running) {
            return;
        }
        *scheduler = Some(
            FlushScheduler::new(self.inner.engine.clone(), self.inner.settings.interval).spawn(),
        );
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .scheduler
            .lock()
            .as_ref()
            .is_some_and(SchedulerHandle::is_running)
    }

    /// Stops periodic flushing. Metrics recorded since the last flush stay in the registry.
    pub fn stop(&self) {
        if let Some(handle) = self.inner.scheduler.lock().take() {
            handle.stop();
            info!("Metrics: Periodic flush stopped");
        }
    }

    /// Stops periodic flushing, then flushes whatever is left.
    pub async fn shutdown(&self) -> Result<FlushOutcome, FlushError> {
        let handle = self.inner.scheduler.lock().take();
        if let Some(handle) = handle {
            // wait for the task to unwind so an interrupted flush releases its flag
            handle.stop_and_wait().await;
            info!("Metrics: Periodic flush stopped");
        }
        self.flush().await
    }
}
