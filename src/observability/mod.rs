//! Structured logging and ingestion metrics

pub mod logging;
pub mod metrics;

pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{IngestMetrics, MetricsSnapshot};

pub use logging::{command_span, ingest_span, mqtt_span, reconcile_span};
