pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use application::flusher::FlushOutcome;
pub use application::metrics::Metrics;
pub use application::tagging::TagMode;
pub use application::trap_resolver::{TrapEndpoint, TrapState};
pub use config::{Config, Settings};
pub use domain::metric::{GaugeValue, MetricKind, MetricSnapshot, MetricValue, ResetPolicy};

#[cfg(test)]
mod config_tests;
