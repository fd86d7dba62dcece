//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Sessions and listeners produce:
//!     → logging.rs (structured log events, filtered by EnvFilter)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stderr/stdout via the fmt layer
//!     → Metrics endpoint (Prometheus scrape), when enabled
//! ```
//!
//! # Design Decisions
//! - Every session log line carries its `connection_id`
//! - Metric updates are cheap enough to stay on even when nothing scrapes them
//! - `RUST_LOG` always overrides the configured filter

pub mod logging;
pub mod metrics;

pub use logging::{default_filter, init_logging};
