//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, one span per commit cycle)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stderr (log aggregation)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Every cycle log line carries the cycle id from its span
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
