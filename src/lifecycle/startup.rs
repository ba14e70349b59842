//! Router assembly for the `Idle → Running` transition.
//!
//! # Responsibilities
//! - Register the liveness route
//! - Let the caller attach application routes and middleware
//! - Put the instrumentor chain in front of all of it
//! - Mount the metrics exposition outside the chain
//!
//! # Design Decisions
//! - The exposition router sits in front of the instrumented router and hands
//!   it every other request as its fallback. The exposition is never measured,
//!   while unmatched requests still pass through the instrumentors

use std::sync::Arc;

use axum::routing::any;
use axum::Router;

use crate::http::middleware::Instrumentation;
use crate::observability::metrics::exposition_router;

/// Path of the liveness route.
pub const PING_PATH: &str = "/ping";

/// Attaches application routes to the router handed over at startup.
///
/// Invoked exactly once, before the server starts listening.
pub trait RouteRegistrar: Send + Sync {
    fn register(&self, router: Router) -> Router;
}

impl RouteRegistrar for Router {
    fn register(&self, router: Router) -> Router {
        router.merge(self.clone())
    }
}

/// A registrar backed by a closure.
pub struct RegisterFn<F>(pub F);

impl<F> RouteRegistrar for RegisterFn<F>
where
    F: Fn(Router) -> Router + Send + Sync,
{
    fn register(&self, router: Router) -> Router {
        (self.0)(router)
    }
}

/// Caller-supplied router wrapper, applied inside the instrumentor chain.
pub type Middleware = Arc<dyn Fn(Router) -> Router + Send + Sync>;

async fn pong() -> &'static str {
    "pong"
}

/// Build the complete router served by the app.
pub(crate) fn build_router(
    instrumentation: &Instrumentation,
    registrar: &dyn RouteRegistrar,
    middleware: &[Middleware],
    exposition_path: Option<&str>,
) -> Router {
    let mut router = registrar.register(Router::new().route(PING_PATH, any(pong)));
    for wrap in middleware {
        router = wrap(router);
    }
    let router = instrumentation.apply(router);

    match exposition_path {
        Some(path) => {
            exposition_router(path, instrumentation.metrics().clone()).fallback_service(router)
        }
        None => router,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::Request;
    use axum::http::{HeaderValue, Method, StatusCode};
    use axum::routing::get;
    use tower::ServiceExt;

    use crate::http::client_ip::TrustedProxy;
    use crate::http::skip::StringSet;
    use crate::observability::logging::capture;
    use crate::observability::metrics::{HttpMetrics, DEFAULT_BUCKETS};

    fn instrumentation() -> (Instrumentation, capture::CapturedLogs) {
        let (logger, logs) = capture::logger();
        let metrics = Arc::new(HttpMetrics::new("", DEFAULT_BUCKETS).unwrap());
        let chain = Instrumentation::new(
            logger,
            TrustedProxy::new("127.0.0.0/8".parse().unwrap()),
            metrics,
        )
        .metrics_skip(StringSet::new(["/metrics"]));
        (chain, logs)
    }

    fn request(method: Method, uri: &str) -> Request {
        axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_ping_any_method() {
        let (chain, _logs) = instrumentation();
        let router = build_router(&chain, &Router::new(), &[], None);

        for method in [Method::GET, Method::POST, Method::DELETE] {
            let res = router.clone().oneshot(request(method, "/ping")).await.unwrap();
            assert_eq!(res.status(), StatusCode::OK);
            let body = axum::body::to_bytes(res.into_body(), 64).await.unwrap();
            assert_eq!(&body[..], b"pong");
        }
    }

    #[tokio::test]
    async fn test_registrar_and_middleware_order() {
        let (chain, logs) = instrumentation();
        let registrar = RegisterFn(|router: Router| router.route("/hello", get(|| async { "hi" })));
        let tag: Middleware = Arc::new(|router: Router| {
            router.layer(axum::middleware::map_response(
                |mut res: axum::response::Response| async move {
                    res.headers_mut().insert("x-tagged", HeaderValue::from_static("1"));
                    res
                },
            ))
        });

        let router = build_router(&chain, &registrar, &[tag], Some("/metrics"));
        let res = router.clone().oneshot(request(Method::GET, "/hello")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()["x-tagged"], "1");
        assert_eq!(logs.at_level("INFO").len(), 1);

        let res = router.oneshot(request(Method::GET, "/metrics")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = axum::body::to_bytes(res.into_body(), 1 << 20).await.unwrap();
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("path=\"/hello\""));
        // The exposition itself is neither logged nor measured.
        assert!(!text.contains("path=\"/metrics\""));
        assert_eq!(logs.at_level("INFO").len(), 1);
    }

    #[tokio::test]
    async fn test_unmatched_request_is_instrumented_with_exposition() {
        let (chain, logs) = instrumentation();
        let router = build_router(&chain, &Router::new(), &[], Some("/metrics"));

        let res = router.clone().oneshot(request(Method::GET, "/nowhere")).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let info = logs.at_level("INFO");
        assert_eq!(info.len(), 1);
        assert_eq!(info[0]["fields"]["message"], "/nowhere");
        assert_eq!(info[0]["fields"]["http_status"], 404);

        let res = router.oneshot(request(Method::GET, "/metrics")).await.unwrap();
        let body = axum::body::to_bytes(res.into_body(), 1 << 20).await.unwrap();
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("path=\"/nowhere\""));
        assert!(text.contains("status=\"404\""));
    }
}
