//! # Observability
//!
//! - **Logging**: structured logs via `tracing`
//! - **Metrics**: atomic counters, gauges and histograms for session activity
//!
//! ```rust,ignore
//! use echoscan_core::observe::{init_logging, LogConfig, SessionMetrics};
//!
//! init_logging(&LogConfig::default());
//!
//! let metrics = SessionMetrics::new();
//! metrics.bmode_acquisitions.inc();
//! metrics.simulate_latency_ms.observe(42.0);
//! println!("{}", metrics.to_prometheus());
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogConfig, LogFormat, LogLevel};
pub use metrics::{Counter, Gauge, Histogram, MetricsSnapshot, SessionMetrics};
