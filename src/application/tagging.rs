//! Tag application for the two tagging regimes.
//!
//! Stream-tag checks carry tags inside the metric name (`name|ST[k:v]`), so
//! applying tags is a local string rewrite. Metric-rules checks keep tags on
//! the server-side metric definition; locally we only keep a shadow of what
//! must be pushed on the next check bundle metrics update.
//!
//! Which regime applies is a property of the check bundle. `CheckTagApplier`
//! starts from the configured guess and follows the bundle once one resolves.

use crate::domain::errors::TagError;
use crate::domain::tags::{MetricName, TagSet};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagMode {
    StreamTags,
    MetricRules,
}

pub trait TagApplier: Send + Sync {
    fn mode(&self) -> TagMode;

    /// Replaces the tags of `name`. Returns the name metrics must be written under.
    fn set_tags(&self, name: &str, tags: &[&str]) -> Result<String, TagError>;

    /// Merges `tags` into the tags of `name`, last value per key wins.
    fn add_tags(&self, name: &str, tags: &[&str]) -> Result<String, TagError>;

    /// Tags waiting for a server-side push, if a push is due. Clears the due flag.
    fn take_pending_update(&self) -> Option<HashMap<String, TagSet>> {
        None
    }

    /// Flags the pending tags as due again after a failed push.
    fn retry_pending_update(&self) {}

    /// Called with the resolved check bundle's regime.
    fn adopt_bundle_mode(&self, _uses_metric_rules: bool) {}
}

impl TagMode {
    pub fn for_bundle(uses_metric_rules: bool) -> Self {
        if uses_metric_rules {
            TagMode::MetricRules
        } else {
            TagMode::StreamTags
        }
    }
}

/// Builds the applier matching the check's tagging regime.
pub fn tag_applier_for(uses_metric_rules: bool) -> Box<dyn TagApplier> {
    if uses_metric_rules {
        Box::new(MetricRulesTagApplier::new())
    } else {
        Box::new(StreamTagApplier)
    }
}

/// Applies tags in the regime of the check bundle metrics go to.
///
/// Until a bundle resolves (or forever, with a fixed submission URL) the
/// configured regime applies. The first resolved bundle fixes the regime for
/// the life of the handle.
pub struct CheckTagApplier {
    configured: Arc<dyn TagApplier>,
    resolved: OnceLock<Arc<dyn TagApplier>>,
}

impl CheckTagApplier {
    pub fn new(configured_metric_rules: bool) -> Self {
        Self {
            configured: Arc::from(tag_applier_for(configured_metric_rules)),
            resolved: OnceLock::new(),
        }
    }

    fn current(&self) -> &dyn TagApplier {
        self.resolved.get().unwrap_or(&self.configured).as_ref()
    }
}

impl TagApplier for CheckTagApplier {
    fn mode(&self) -> TagMode {
        self.current().mode()
    }

    fn set_tags(&self, name: &str, tags: &[&str]) -> Result<String, TagError> {
        self.current().set_tags(name, tags)
    }

    fn add_tags(&self, name: &str, tags: &[&str]) -> Result<String, TagError> {
        self.current().add_tags(name, tags)
    }

    fn take_pending_update(&self) -> Option<HashMap<String, TagSet>> {
        self.current().take_pending_update()
    }

    fn retry_pending_update(&self) {
        self.current().retry_pending_update();
    }

    fn adopt_bundle_mode(&self, uses_metric_rules: bool) {
        if self.resolved.get().is_some() {
            return;
        }
        let mode = TagMode::for_bundle(uses_metric_rules);
        let configured = self.configured.mode();
        if mode == configured {
            let _ = self.resolved.set(self.configured.clone());
            return;
        }
        if self.resolved.set(Arc::from(tag_applier_for(uses_metric_rules))).is_ok() {
            if self.configured.take_pending_update().is_some() {
                warn!("CheckTagApplier: Dropping tags set under the configured {configured:?} regime");
            }
            info!("CheckTagApplier: Check bundle uses {mode:?}, switching from configured {configured:?}");
        }
    }
}

/// Rewrites metric names into the canonical stream-tag form.
#[derive(Debug, Default, Clone, Copy)]
pub struct StreamTagApplier;

impl TagApplier for StreamTagApplier {
    fn mode(&self) -> TagMode {
        TagMode::StreamTags
    }

    fn set_tags(&self, name: &str, tags: &[&str]) -> Result<String, TagError> {
        let parsed = MetricName::parse(name)?;
        let tags = TagSet::parse_all(tags)?;
        Ok(MetricName::with_stream_tags(&parsed.base, tags))
    }

    fn add_tags(&self, name: &str, tags: &[&str]) -> Result<String, TagError> {
        let mut parsed = MetricName::parse(name)?;
        parsed.tags.merge(TagSet::parse_all(tags)?);
        Ok(parsed.render())
    }
}

/// Keeps a local shadow of per-metric tags for metric-rules checks.
#[derive(Debug, Default)]
pub struct MetricRulesTagApplier {
    shadow: Mutex<HashMap<String, TagSet>>,
    needs_update: AtomicBool,
}

impl MetricRulesTagApplier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tags_for(&self, name: &str) -> Option<TagSet> {
        self.shadow.lock().get(name).cloned()
    }

    pub fn needs_update(&self) -> bool {
        self.needs_update.load(Ordering::Acquire)
    }
}

impl TagApplier for MetricRulesTagApplier {
    fn mode(&self) -> TagMode {
        TagMode::MetricRules
    }

    fn set_tags(&self, name: &str, tags: &[&str]) -> Result<String, TagError> {
        info!("set_tags: metric-rules check, prefer stream tags in the name: {name}|ST[k:v,...]");
        let tags = TagSet::parse_all(tags)?;
        self.shadow.lock().insert(name.to_string(), tags);
        self.needs_update.store(true, Ordering::Release);
        Ok(name.to_string())
    }

    fn add_tags(&self, name: &str, tags: &[&str]) -> Result<String, TagError> {
        info!("add_tags: metric-rules check, prefer stream tags in the name: {name}|ST[k:v,...]");
        let tags = TagSet::parse_all(tags)?;
        self.shadow
            .lock()
            .entry(name.to_string())
            .or_default()
            .merge(tags);
        self.needs_update.store(true, Ordering::Release);
        Ok(name.to_string())
    }

    fn take_pending_update(&self) -> Option<HashMap<String, TagSet>> {
        if !self.needs_update.swap(false, Ordering::AcqRel) {
            return None;
        }
        Some(self.shadow.lock().clone())
    }

    fn retry_pending_update(&self) {
        self.needs_update.store(true, Ordering::Release);
    }
}
