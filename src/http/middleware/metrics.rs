//! Request metrics middleware.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::http::request::request_host;
use crate::http::skip::StringSet;
use crate::observability::metrics::{HttpMetrics, RequestLabels};

/// State for the metrics middleware.
#[derive(Clone)]
pub struct MetricsState {
    pub metrics: Arc<HttpMetrics>,
    /// Resolved paths starting with any of these are not measured.
    pub skip: Arc<StringSet>,
}

/// Count the request and time it, labeled by the matched route template.
///
/// Unmatched requests fall back to the raw path, so label cardinality is
/// bounded only by the skip prefixes.
pub async fn metrics_middleware(
    State(state): State<MetricsState>,
    req: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let host = request_host(req.headers(), req.uri());
    let method = req.method().to_string();

    let response = next.run(req).await;
    let elapsed = start.elapsed().as_secs_f64();

    if state.skip.matches_prefix(&path) {
        return response;
    }

    let labels = RequestLabels {
        status: response.status().as_u16().to_string(),
        host,
        method,
        path,
    };
    state.metrics.observe(&labels, elapsed);
    response
}
