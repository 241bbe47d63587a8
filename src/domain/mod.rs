// Check-management resources
pub mod check_bundle;

// Domain-specific error types
pub mod errors;

// Log-linear histogram storage
pub mod histogram;

// Metric kinds and wire values
pub mod metric;

// Port interfaces
pub mod ports;

// Tag parsing and stream-tag names
pub mod tags;
