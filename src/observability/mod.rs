//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events with request_id / api / endpoint fields
//!     → metrics.rs (counters, histograms through the `metrics` facade)
//!
//! Consumers:
//!     → logging.rs installs the fmt subscriber (stdout)
//!     → the host process installs a metrics recorder/exporter
//! ```
//!
//! # Design Decisions
//! - Request ID flows through every log line of a dispatch
//! - Metric updates are no-ops until a recorder is installed

pub mod logging;
pub mod metrics;
