//! Observability: structured logging and in-process counters

pub mod logging;
pub mod metrics;

// Re-export for convenience
pub use logging::{init_default_logging, init_logging, parse_log_level, LogFormat};
pub use metrics::{BridgeMetrics, MetricsSnapshot};

// Span macros for structured logging
pub use logging::{event_span, lifecycle_span, mqtt_span};
