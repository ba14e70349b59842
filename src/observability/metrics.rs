//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Own the request counter and duration histogram aggregates
//! - Expose them in the Prometheus text format
//!
//! # Metrics
//! - `http_requests_total` (counter): requests by status, host, method, path
//! - `http_request_duration_seconds` (histogram): latency distribution
//!
//! Both names take an optional namespace prefix (`<ns>_http_requests_total`).
//!
//! # Design Decisions
//! - One `HttpMetrics` per server, no global recorder: independent servers
//!   (and tests) never share aggregates
//! - The recorder is built on first use and exactly once (`OnceLock`)
//! - Handles for identical labels resolve to the same aggregate
//! - Low-overhead updates (atomic operations inside the recorder)

use std::sync::{Arc, OnceLock};

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use metrics::{Counter, Histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusRecorder};

use crate::config::ObservabilityConfig;

/// Prometheus' default latency buckets, in seconds.
pub const DEFAULT_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

const REQUESTS_TOTAL: &str = "http_requests_total";
const REQUEST_DURATION: &str = "http_request_duration_seconds";

/// Error building the metrics aggregates.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("histogram buckets must not be empty")]
    EmptyBuckets,
}

/// Label values of one request observation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestLabels {
    pub status: String,
    pub host: String,
    pub method: String,
    pub path: String,
}

impl RequestLabels {
    fn pairs(&self) -> [(&'static str, String); 4] {
        [
            ("status", self.status.clone()),
            ("host", self.host.clone()),
            ("method", self.method.clone()),
            ("path", self.path.clone()),
        ]
    }
}

/// Request counter and duration histogram for one server.
pub struct HttpMetrics {
    requests_total: String,
    request_duration: String,
    buckets: Vec<f64>,
    recorder: OnceLock<PrometheusRecorder>,
}

impl HttpMetrics {
    /// Aggregates named under `namespace` (may be empty).
    pub fn new(namespace: &str, buckets: &[f64]) -> Result<Self, MetricsError> {
        if buckets.is_empty() {
            return Err(MetricsError::EmptyBuckets);
        }
        Ok(Self {
            requests_total: qualified(namespace, REQUESTS_TOTAL),
            request_duration: qualified(namespace, REQUEST_DURATION),
            buckets: buckets.to_vec(),
            recorder: OnceLock::new(),
        })
    }

    pub fn from_config(config: &ObservabilityConfig) -> Result<Self, MetricsError> {
        Self::new(&config.metrics_namespace, &config.histogram_buckets)
    }

    pub fn requests_total_name(&self) -> &str {
        &self.requests_total
    }

    pub fn request_duration_name(&self) -> &str {
        &self.request_duration
    }

    fn recorder(&self) -> &PrometheusRecorder {
        self.recorder.get_or_init(|| {
            // Buckets were checked non-empty in `new`, the only failure case.
            let builder = match PrometheusBuilder::new().set_buckets(&self.buckets) {
                Ok(builder) => builder,
                Err(_) => PrometheusBuilder::new(),
            };
            let recorder = builder.build_recorder();
            metrics::with_local_recorder(&recorder, || {
                metrics::describe_counter!(
                    self.requests_total.clone(),
                    "Total number of HTTP requests made."
                );
                metrics::describe_histogram!(
                    self.request_duration.clone(),
                    metrics::Unit::Seconds,
                    "The HTTP request latencies in seconds."
                );
            });
            tracing::debug!(
                counter = %self.requests_total,
                histogram = %self.request_duration,
                "HTTP metrics registered"
            );
            recorder
        })
    }

    /// Handle to the request counter for `labels`.
    pub fn requests_counter(&self, labels: &RequestLabels) -> Counter {
        let labels = labels.pairs();
        metrics::with_local_recorder(self.recorder(), || {
            metrics::counter!(self.requests_total.clone(), &labels)
        })
    }

    /// Handle to the duration histogram for `labels`.
    pub fn duration_histogram(&self, labels: &RequestLabels) -> Histogram {
        let labels = labels.pairs();
        metrics::with_local_recorder(self.recorder(), || {
            metrics::histogram!(self.request_duration.clone(), &labels)
        })
    }

    /// Record one completed request.
    pub fn observe(&self, labels: &RequestLabels, seconds: f64) {
        self.requests_counter(labels).increment(1);
        self.duration_histogram(labels).record(seconds);
    }

    /// Current state of every aggregate in the Prometheus text format.
    pub fn render(&self) -> String {
        self.recorder().handle().render()
    }
}

impl std::fmt::Debug for HttpMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpMetrics")
            .field("requests_total", &self.requests_total)
            .field("request_duration", &self.request_duration)
            .field("initialized", &self.recorder.get().is_some())
            .finish()
    }
}

fn qualified(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}_{name}")
    }
}

/// Exposition handler: renders the aggregates, records nothing itself.
pub async fn render_metrics(State(metrics): State<Arc<HttpMetrics>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics.render(),
    )
}

/// A router serving the exposition at `path` (GET).
pub fn exposition_router(path: &str, metrics: Arc<HttpMetrics>) -> Router {
    Router::new()
        .route(path, get(render_metrics))
        .with_state(metrics)
}
