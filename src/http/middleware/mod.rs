//! Instrumentation middleware.
//!
//! # Request Flow
//! ```text
//! request
//!     → recovery.rs (catch and classify panics)
//!     → metrics.rs (count and time)
//!     → logging.rs (access log)
//!     → caller middleware, /ping, application routes
//! ```
//!
//! Post-processing runs in reverse on the way out: the access log is written
//! first, then the observation recorded. A recovered panic skips both.

pub mod logging;
pub mod metrics;
pub mod recovery;

use std::sync::Arc;

use axum::middleware::from_fn_with_state;
use axum::Router;

use crate::http::client_ip::TrustedProxy;
use crate::http::skip::StringSet;
use crate::observability::logging::Logger;
use crate::observability::metrics::HttpMetrics;

pub use self::logging::{logging_middleware, LoggingState, RequestRecord};
pub use self::metrics::{metrics_middleware, MetricsState};
pub use self::recovery::{
    default_policy, recovery_middleware, PanicEvent, PanicKind, RecoveryPolicy, RecoveryState,
};

/// The instrumentor chain, with everything it shares.
#[derive(Clone)]
pub struct Instrumentation {
    logger: Logger,
    proxy: TrustedProxy,
    metrics: Arc<HttpMetrics>,
    log_skip: Arc<StringSet>,
    metrics_skip: Arc<StringSet>,
    policy: RecoveryPolicy,
    dump_body_limit: usize,
}

impl Instrumentation {
    pub fn new(logger: Logger, proxy: TrustedProxy, metrics: Arc<HttpMetrics>) -> Self {
        Self {
            logger,
            proxy,
            metrics,
            log_skip: Arc::default(),
            metrics_skip: Arc::default(),
            policy: default_policy(),
            dump_body_limit: 64 * 1024,
        }
    }

    /// Paths excluded from the access log (exact match).
    pub fn log_skip(mut self, paths: StringSet) -> Self {
        self.log_skip = Arc::new(paths);
        self
    }

    /// Path prefixes excluded from request metrics.
    pub fn metrics_skip(mut self, prefixes: StringSet) -> Self {
        self.metrics_skip = Arc::new(prefixes);
        self
    }

    pub fn recovery_policy(mut self, policy: RecoveryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn dump_body_limit(mut self, limit: usize) -> Self {
        self.dump_body_limit = limit;
        self
    }

    pub fn metrics(&self) -> &Arc<HttpMetrics> {
        &self.metrics
    }

    /// Wrap every route currently on `router` (and its fallback).
    ///
    /// The last layer added is the outermost, so recovery goes on last.
    pub fn apply(&self, router: Router) -> Router {
        router
            .layer(from_fn_with_state(
                LoggingState {
                    logger: self.logger.clone(),
                    skip: self.log_skip.clone(),
                    proxy: self.proxy.clone(),
                },
                logging_middleware,
            ))
            .layer(from_fn_with_state(
                MetricsState {
                    metrics: self.metrics.clone(),
                    skip: self.metrics_skip.clone(),
                },
                metrics_middleware,
            ))
            .layer(from_fn_with_state(
                RecoveryState {
                    logger: self.logger.clone(),
                    policy: self.policy.clone(),
                    dump_body_limit: self.dump_body_limit,
                },
                recovery_middleware,
            ))
    }
}

impl std::fmt::Debug for Instrumentation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instrumentation")
            .field("proxy", &self.proxy)
            .field("metrics", &self.metrics)
            .field("log_skip", &self.log_skip)
            .field("metrics_skip", &self.metrics_skip)
            .field("dump_body_limit", &self.dump_body_limit)
            .finish_non_exhaustive()
    }
}
