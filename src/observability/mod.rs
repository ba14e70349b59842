//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Instrumentors produce:
//!     → logging.rs (structured log events through an injected Logger)
//!     → metrics.rs (request counter and duration histogram)
//!
//! Consumers:
//!     → Log aggregation (stdout, JSON in production)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Metrics are cheap (atomic increments)
//! - Nothing global: each server owns its logger handle and aggregates

pub mod logging;
pub mod metrics;

pub use self::logging::Logger;
pub use self::metrics::{HttpMetrics, MetricsError, RequestLabels};
