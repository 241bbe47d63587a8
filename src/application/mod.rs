// Snapshot-and-submit cycle
pub mod flusher;

// Public metrics handle
pub mod metrics;

// Concurrent metric storage
pub mod registry;

// Periodic flush timer
pub mod scheduler;

// Stream-tag and metric-rules tagging
pub mod tagging;

// Trap endpoint lookup and caching
pub mod trap_resolver;
