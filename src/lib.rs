// ------------------------------------------------------------
// Module declarations
// ------------------------------------------------------------
//
// Each module represents a well-defined responsibility:
//
// - config:    Configuration structs loaded from JSON
// - schema:    The quote record decoded from the source
// - util:      Shared helper utilities (formatting, panic payloads)
// - source:    Record sources (HTTP, demo) and the fetch error taxonomy
// - pool:      Rate gate, fetch workers and completion coordinator
// - consumer:  Consumer loop and output sinks
// - metrics:   Fetch metrics registry
// - exporter:  `/metrics` endpoint and periodic metrics log line
//
pub mod config;
pub mod consumer;
pub mod exporter;
pub mod metrics;
pub mod pool;
pub mod schema;
pub mod source;
pub mod util;

pub use config::Config;
pub use consumer::{RecordSink, run_consumer};
pub use metrics::{FetchMetrics, MetricsSink};
pub use pool::{PoolHandle, PoolParams, PoolReport, PoolState, spawn_pool};
pub use schema::Record;
pub use source::{FetchError, RecordSource};
