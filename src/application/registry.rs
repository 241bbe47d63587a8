//! Concurrent metric storage.
//!
//! Each kind lives in its own map behind its own lock. Writers only take the
//! read side of a map (values carry their own atomic or mutex), so the write
//! lock is held just long enough to insert a new name or to swap the whole map
//! out when a snapshot resets that kind.
//!
//! A name is bound to one kind while it holds a value or a callback. The
//! binding is released once a reset or `remove_*` leaves it with neither, so
//! short-lived stream-tagged names do not accumulate.
//!
//! Lock order: value map, callback map, then the kind bindings.

use crate::domain::errors::KindMismatch;
use crate::domain::histogram::Histogram;
use crate::domain::metric::{GaugeValue, MetricKind, MetricSnapshot, MetricValue, ResetPolicy};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::warn;

pub type GaugeFn = Arc<dyn Fn() -> GaugeValue + Send + Sync>;
pub type TextFn = Arc<dyn Fn() -> String + Send + Sync>;

#[derive(Default)]
pub struct MetricRegistry {
    counters: RwLock<HashMap<String, AtomicI64>>,
    gauges: RwLock<HashMap<String, Mutex<GaugeValue>>>,
    gauge_funcs: RwLock<HashMap<String, GaugeFn>>,
    histograms: RwLock<HashMap<String, Mutex<Histogram>>>,
    text: RwLock<HashMap<String, Mutex<String>>>,
    text_funcs: RwLock<HashMap<String, TextFn>>,
    /// Name -> kind binding for every name holding a value or callback.
    kinds: RwLock<HashMap<String, MetricKind>>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ===== Counters =====

    pub fn increment(&self, name: &str) {
        self.add(name, 1);
    }

    /// Deltas above `i64::MAX` saturate.
    pub fn increment_by(&self, name: &str, delta: u64) {
        self.add(name, i64::try_from(delta).unwrap_or(i64::MAX));
    }

    pub fn add(&self, name: &str, delta: i64) {
        self.with_counter(name, |c| {
            c.fetch_add(delta, Ordering::AcqRel);
        });
    }

    pub fn set_counter(&self, name: &str, value: i64) {
        self.with_counter(name, |c| c.store(value, Ordering::Release));
    }

    pub fn remove_counter(&self, name: &str) {
        let removed = self.counters.write().remove(name).is_some();
        if removed {
            self.release_unused(MetricKind::Counter, &[name]);
        }
    }

    pub fn counter(&self, name: &str) -> Option<i64> {
        self.counters
            .read()
            .get(name)
            .map(|c| c.load(Ordering::Acquire))
    }

    /// Counter value, treating a never-written or reset counter as 0.
    pub fn counter_or_zero(&self, name: &str) -> i64 {
        self.counter(name).unwrap_or(0)
    }

    fn with_counter(&self, name: &str, apply: impl FnOnce(&AtomicI64)) {
        if !accept_name(name) {
            return;
        }
        {
            let counters = self.counters.read();
            if let Some(counter) = counters.get(name) {
                apply(counter);
                return;
            }
        }
        let mut counters = self.counters.write();
        self.claim(name, MetricKind::Counter);
        let counter = counters
            .entry(name.to_string())
            .or_insert_with(|| AtomicI64::new(0));
        apply(counter);
    }

    // ===== Gauges =====

    pub fn set_gauge(&self, name: &str, value: impl Into<GaugeValue>) {
        let value = value.into();
        self.with_gauge(name, value, |g| *g = value);
    }

    /// Adds `delta` to a gauge, creating it at `delta`.
    pub fn add_gauge(&self, name: &str, delta: impl Into<GaugeValue>) {
        let delta = delta.into();
        self.with_gauge(name, delta, |g| *g = g.add(delta));
    }

    /// Registers a callback evaluated at snapshot time. While registered, it
    /// takes precedence over a value stored with `set_gauge` under the same name.
    pub fn set_gauge_func(&self, name: &str, func: GaugeFn) {
        if !accept_name(name) {
            return;
        }
        if self.gauges.read().contains_key(name) {
            warn!("MetricRegistry: gauge {name} has a stored value, the callback takes precedence");
        }
        let mut funcs = self.gauge_funcs.write();
        self.claim(name, MetricKind::Gauge);
        funcs.insert(name.to_string(), func);
    }

    pub fn remove_gauge(&self, name: &str) {
        let removed = self.gauges.write().remove(name).is_some();
        if removed {
            self.release_unused(MetricKind::Gauge, &[name]);
        }
    }

    pub fn remove_gauge_func(&self, name: &str) {
        let removed = self.gauge_funcs.write().remove(name).is_some();
        if removed {
            self.release_unused(MetricKind::Gauge, &[name]);
        }
    }

    pub fn gauge(&self, name: &str) -> Option<GaugeValue> {
        self.gauges.read().get(name).map(|g| *g.lock())
    }

    fn with_gauge(&self, name: &str, initial: GaugeValue, apply: impl FnOnce(&mut GaugeValue)) {
        if !accept_name(name) {
            return;
        }
        {
            let gauges = self.gauges.read();
            if let Some(gauge) = gauges.get(name) {
                apply(&mut gauge.lock());
                return;
            }
        }
        let mut gauges = self.gauges.write();
        self.claim(name, MetricKind::Gauge);
        match gauges.get(name) {
            Some(gauge) => apply(&mut gauge.lock()),
            None => {
                gauges.insert(name.to_string(), Mutex::new(initial));
            }
        }
    }

    // ===== Histograms =====

    pub fn timing(&self, name: &str, elapsed: f64) {
        self.record_value(name, elapsed);
    }

    pub fn record_value(&self, name: &str, value: f64) {
        if !accept_name(name) {
            return;
        }
        {
            let histograms = self.histograms.read();
            if let Some(histogram) = histograms.get(name) {
                histogram.lock().record_value(value);
                return;
            }
        }
        let mut histograms = self.histograms.write();
        self.claim(name, MetricKind::Histogram);
        histograms
            .entry(name.to_string())
            .or_default()
            .get_mut()
            .record_value(value);
    }

    pub fn remove_histogram(&self, name: &str) {
        let removed = self.histograms.write().remove(name).is_some();
        if removed {
            self.release_unused(MetricKind::Histogram, &[name]);
        }
    }

    /// Number of samples currently held for `name`.
    pub fn histogram_count(&self, name: &str) -> Option<u64> {
        self.histograms.read().get(name).map(|h| h.lock().count())
    }

    // ===== Text =====

    pub fn set_text(&self, name: &str, value: impl Into<String>) {
        if !accept_name(name) {
            return;
        }
        let value = value.into();
        {
            let text = self.text.read();
            if let Some(slot) = text.get(name) {
                *slot.lock() = value;
                return;
            }
        }
        let mut text = self.text.write();
        self.claim(name, MetricKind::Text);
        text.insert(name.to_string(), Mutex::new(value));
    }

    /// Registers a callback evaluated at snapshot time. While registered, it
    /// takes precedence over a value stored with `set_text` under the same name.
    pub fn set_text_func(&self, name: &str, func: TextFn) {
        if !accept_name(name) {
            return;
        }
        if self.text.read().contains_key(name) {
            warn!("MetricRegistry: text {name} has a stored value, the callback takes precedence");
        }
        let mut funcs = self.text_funcs.write();
        self.claim(name, MetricKind::Text);
        funcs.insert(name.to_string(), func);
    }

    pub fn remove_text(&self, name: &str) {
        let removed = self.text.write().remove(name).is_some();
        if removed {
            self.release_unused(MetricKind::Text, &[name]);
        }
    }

    pub fn remove_text_func(&self, name: &str) {
        let removed = self.text_funcs.write().remove(name).is_some();
        if removed {
            self.release_unused(MetricKind::Text, &[name]);
        }
    }

    pub fn text(&self, name: &str) -> Option<String> {
        self.text.read().get(name).map(|t| t.lock().clone())
    }

    // ===== Names =====

    pub fn kind_of(&self, name: &str) -> Option<MetricKind> {
        self.kinds.read().get(name).copied()
    }

    /// Binds `name` to `kind`, panicking if it is already bound to another kind.
    fn claim(&self, name: &str, kind: MetricKind) {
        let bound = self.kinds.read().get(name).copied();
        let existing = match bound {
            Some(existing) => existing,
            None => *self
                .kinds
                .write()
                .entry(name.to_string())
                .or_insert(kind),
        };
        if existing != kind {
            let mismatch = KindMismatch {
                name: name.to_string(),
                existing,
                requested: kind,
            };
            tracing::error!("{mismatch}");
            panic!("{mismatch}");
        }
    }

    /// Unbinds names of `kind` that no longer hold a value or callback.
    fn release_unused<S: AsRef<str>>(&self, kind: MetricKind, names: &[S]) {
        if names.is_empty() {
            return;
        }
        match kind {
            MetricKind::Counter => {
                let counters = self.counters.read();
                self.unbind(kind, names, |name| counters.contains_key(name));
            }
            MetricKind::Gauge => {
                let gauges = self.gauges.read();
                let funcs = self.gauge_funcs.read();
                self.unbind(kind, names, |name| {
                    gauges.contains_key(name) || funcs.contains_key(name)
                });
            }
            MetricKind::Histogram => {
                let histograms = self.histograms.read();
                self.unbind(kind, names, |name| histograms.contains_key(name));
            }
            MetricKind::Text => {
                let text = self.text.read();
                let funcs = self.text_funcs.read();
                self.unbind(kind, names, |name| {
                    text.contains_key(name) || funcs.contains_key(name)
                });
            }
        }
    }

    fn unbind<S: AsRef<str>>(&self, kind: MetricKind, names: &[S], in_use: impl Fn(&str) -> bool) {
        let mut kinds = self.kinds.write();
        for name in names {
            let name: &str = name.as_ref();
            // a concurrent reset may already have released it and another kind claimed it
            if kinds.get(name) == Some(&kind) && !in_use(name) {
                kinds.remove(name);
            }
        }
    }

    // ===== Snapshot =====

    /// Captures every metric, clearing the kinds `reset` selects.
    ///
    /// Each kind is captured independently. A reset kind has its map swapped
    /// for an empty one under the write lock, so a write either finished
    /// before the swap and is in this snapshot, or lands in the fresh map and
    /// is in the next one.
    pub fn snapshot(&self, reset: ResetPolicy) -> MetricSnapshot {
        let mut snapshot = MetricSnapshot::new();

        if reset.counters {
            let counters = mem::take(&mut *self.counters.write());
            let drained: Vec<String> = counters.keys().cloned().collect();
            for (name, value) in counters {
                snapshot.insert(name, MetricValue::Counter(value.into_inner()));
            }
            self.release_unused(MetricKind::Counter, &drained);
        } else {
            for (name, value) in self.counters.read().iter() {
                snapshot.insert(name.clone(), MetricValue::Counter(value.load(Ordering::Acquire)));
            }
        }

        if reset.gauges {
            let gauges = mem::take(&mut *self.gauges.write());
            let drained: Vec<String> = gauges.keys().cloned().collect();
            for (name, value) in gauges {
                snapshot.insert(name, MetricValue::Gauge(value.into_inner()));
            }
            self.release_unused(MetricKind::Gauge, &drained);
        } else {
            for (name, value) in self.gauges.read().iter() {
                snapshot.insert(name.clone(), MetricValue::Gauge(*value.lock()));
            }
        }
        // callbacks run outside the lock; they may be slow or touch the registry
        let gauge_funcs: Vec<(String, GaugeFn)> = self
            .gauge_funcs
            .read()
            .iter()
            .map(|(name, func)| (name.clone(), func.clone()))
            .collect();
        for (name, func) in gauge_funcs {
            snapshot.insert(name, MetricValue::Gauge(func()));
        }

        if reset.histograms {
            let histograms = mem::take(&mut *self.histograms.write());
            let drained: Vec<String> = histograms.keys().cloned().collect();
            for (name, histogram) in histograms {
                let histogram = histogram.into_inner();
                if !histogram.is_empty() {
                    snapshot.insert(name, MetricValue::Histogram(histogram.snapshot()));
                }
            }
            self.release_unused(MetricKind::Histogram, &drained);
        } else {
            for (name, histogram) in self.histograms.read().iter() {
                let histogram = histogram.lock();
                if !histogram.is_empty() {
                    snapshot.insert(name.clone(), MetricValue::Histogram(histogram.snapshot()));
                }
            }
        }

        if reset.text {
            let text = mem::take(&mut *self.text.write());
            let drained: Vec<String> = text.keys().cloned().collect();
            for (name, value) in text {
                snapshot.insert(name, MetricValue::Text(value.into_inner()));
            }
            self.release_unused(MetricKind::Text, &drained);
        } else {
            for (name, value) in self.text.read().iter() {
                snapshot.insert(name.clone(), MetricValue::Text(value.lock().clone()));
            }
        }
        let text_funcs: Vec<(String, TextFn)> = self
            .text_funcs
            .read()
            .iter()
            .map(|(name, func)| (name.clone(), func.clone()))
            .collect();
        for (name, func) in text_funcs {
            snapshot.insert(name, MetricValue::Text(func()));
        }

        snapshot
    }
}

fn accept_name(name: &str) -> bool {
    if name.is_empty() {
        warn!("MetricRegistry: ignoring write with empty metric name");
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_reset_returns_sum_and_zeroes() {
        let registry = MetricRegistry::new();
        registry.increment("requests");
        registry.add("requests", 4);
        registry.increment_by("requests", 5);

        let snapshot = registry.snapshot(ResetPolicy::default());
        assert_eq!(snapshot.get("requests"), Some(&MetricValue::Counter(10)));
        assert_eq!(registry.counter_or_zero("requests"), 0);
        assert!(registry.snapshot(ResetPolicy::default()).is_empty());
    }

    #[test]
    fn test_counter_cumulative_without_reset() {
        let registry = MetricRegistry::new();
        registry.set_counter("foo", 30);
        registry.snapshot(ResetPolicy::NONE);
        registry.increment("foo");
        let snapshot = registry.snapshot(ResetPolicy::NONE);
        assert_eq!(snapshot.get("foo"), Some(&MetricValue::Counter(31)));
    }

    #[test]
    fn test_gauge_survives_snapshot() {
        let registry = MetricRegistry::new();
        registry.set_gauge("foo", 30);

        let first = registry.snapshot(ResetPolicy::default());
        let second = registry.snapshot(ResetPolicy::default());
        assert_eq!(first.get("foo"), Some(&MetricValue::Gauge(GaugeValue::Int(30))));
        assert_eq!(first, second);
    }

    #[test]
    fn test_gauge_reset_when_configured() {
        let registry = MetricRegistry::new();
        registry.set_gauge("load", 0.75);
        let policy = ResetPolicy {
            gauges: true,
            ..ResetPolicy::NONE
        };
        assert_eq!(registry.snapshot(policy).len(), 1);
        assert!(registry.gauge("load").is_none());
    }

    #[test]
    fn test_add_gauge() {
        let registry = MetricRegistry::new();
        registry.add_gauge("inflight", 2);
        registry.add_gauge("inflight", -1);
        assert_eq!(registry.gauge("inflight"), Some(GaugeValue::Int(1)));
    }

    #[test]
    fn test_histogram_reset() {
        let registry = MetricRegistry::new();
        registry.timing("latency", 30.28);
        registry.record_value("latency", 31.0);

        let snapshot = registry.snapshot(ResetPolicy::default());
        assert_eq!(
            snapshot.get("latency"),
            Some(&MetricValue::Histogram(vec![
                "H[3.0e+01]=1".to_string(),
                "H[3.1e+01]=1".to_string()
            ]))
        );
        assert_eq!(registry.histogram_count("latency"), None);
    }

    #[test]
    fn test_histogram_kept_without_reset() {
        let registry = MetricRegistry::new();
        registry.timing("latency", 12.0);
        registry.snapshot(ResetPolicy::NONE);
        assert_eq!(registry.histogram_count("latency"), Some(1));
    }

    #[test]
    fn test_text_and_reset() {
        let registry = MetricRegistry::new();
        registry.set_text("version", "1.0");
        registry.set_text("version", "1.1");
        assert_eq!(
            registry.snapshot(ResetPolicy::default()).get("version"),
            Some(&MetricValue::Text("1.1".to_string()))
        );
        assert_eq!(registry.text("version"), Some("1.1".to_string()));

        let policy = ResetPolicy {
            text: true,
            ..ResetPolicy::NONE
        };
        registry.snapshot(policy);
        assert_eq!(registry.text("version"), None);
    }

    #[test]
    fn test_funcs_evaluated_at_snapshot() {
        let registry = MetricRegistry::new();
        let calls = Arc::new(AtomicI64::new(0));
        let seen = calls.clone();
        registry.set_gauge_func(
            "calls",
            Arc::new(move || GaugeValue::Int(seen.fetch_add(1, Ordering::SeqCst) + 1)),
        );
        registry.set_text_func("state", Arc::new(|| "ready".to_string()));

        let snapshot = registry.snapshot(ResetPolicy::default());
        assert_eq!(snapshot.get("calls"), Some(&MetricValue::Gauge(GaugeValue::Int(1))));
        assert_eq!(snapshot.get("state"), Some(&MetricValue::Text("ready".to_string())));

        registry.remove_gauge_func("calls");
        registry.remove_text_func("state");
        assert!(registry.snapshot(ResetPolicy::default()).is_empty());
    }

    #[test]
    fn test_empty_name_ignored() {
        let registry = MetricRegistry::new();
        registry.increment("");
        registry.set_gauge("", 1);
        registry.timing("", 1.0);
        registry.set_text("", "x");
        assert!(registry.snapshot(ResetPolicy::NONE).is_empty());
        assert_eq!(registry.kind_of(""), None);
    }

    #[test]
    #[should_panic(expected = "cannot use it as a gauge")]
    fn test_kind_mismatch_panics() {
        let registry = MetricRegistry::new();
        registry.increment("foo");
        registry.set_gauge("foo", 1);
    }

    #[test]
    #[should_panic(expected = "is a counter")]
    fn test_kind_binding_held_while_value_present() {
        let registry = MetricRegistry::new();
        registry.increment("foo");
        registry.snapshot(ResetPolicy::NONE);
        registry.set_text("foo", "bar");
    }

    #[test]
    fn test_reset_releases_kind_binding() {
        let registry = MetricRegistry::new();
        registry.increment("requests|ST[request_id:41]");
        registry.timing("latency|ST[request_id:41]", 12.0);
        registry.set_gauge("load", 0.5);

        registry.snapshot(ResetPolicy::default());

        assert_eq!(registry.kind_of("requests|ST[request_id:41]"), None);
        assert_eq!(registry.kind_of("latency|ST[request_id:41]"), None);
        assert_eq!(registry.kind_of("load"), Some(MetricKind::Gauge));

        // the released name is free for another kind
        registry.set_text("requests|ST[request_id:41]", "done");
        assert_eq!(
            registry.kind_of("requests|ST[request_id:41]"),
            Some(MetricKind::Text)
        );
    }

    #[test]
    fn test_remove_releases_kind_binding() {
        let registry = MetricRegistry::new();
        registry.set_text("motd", "hello");
        registry.remove_text("motd");
        assert_eq!(registry.text("motd"), None);
        assert_eq!(registry.kind_of("motd"), None);
    }

    #[test]
    fn test_binding_kept_while_callback_registered() {
        let registry = MetricRegistry::new();
        registry.set_gauge("load", 1);
        registry.set_gauge_func("load", Arc::new(|| GaugeValue::Int(2)));

        registry.remove_gauge("load");
        assert_eq!(registry.kind_of("load"), Some(MetricKind::Gauge));

        registry.remove_gauge_func("load");
        assert_eq!(registry.kind_of("load"), None);
    }

    #[test]
    fn test_callback_takes_precedence_over_stored_value() {
        let registry = MetricRegistry::new();
        registry.set_gauge("load", 1);
        registry.set_gauge_func("load", Arc::new(|| GaugeValue::Int(2)));
        registry.set_text("state", "stored");
        registry.set_text_func("state", Arc::new(|| "live".to_string()));

        let snapshot = registry.snapshot(ResetPolicy::NONE);
        assert_eq!(snapshot.get("load"), Some(&MetricValue::Gauge(GaugeValue::Int(2))));
        assert_eq!(snapshot.get("state"), Some(&MetricValue::Text("live".to_string())));
    }

    #[test]
    fn test_increment_by_saturates() {
        let registry = MetricRegistry::new();
        registry.increment_by("bytes", u64::MAX);
        assert_eq!(registry.counter("bytes"), Some(i64::MAX));
    }
}
