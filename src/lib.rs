//! Instrumentation and lifecycle harness for axum services.
//!
//! Wraps an application router with access logging, panic recovery and
//! request metrics, serves it, and drains it on a termination signal.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use config::schema::ServiceConfig;
pub use http::{Instrumentation, RequestErrors, StringSet};
pub use lifecycle::{App, AppBuilder, LifecycleError, LifecycleState, RegisterFn, RouteRegistrar, ShutdownSignal};
pub use observability::{HttpMetrics, Logger};
