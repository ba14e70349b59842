//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use http_harness::lifecycle::{App, AppBuilder, LifecycleError, LifecycleState, ShutdownSignal};
use http_harness::{Logger, ServiceConfig};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// JSON log lines written by a test logger.
#[derive(Clone, Default)]
pub struct Logs {
    buf: Arc<Mutex<Vec<u8>>>,
}

struct Sink(Arc<Mutex<Vec<u8>>>);

impl io::Write for Sink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Logs {
    pub fn entries(&self) -> Vec<Value> {
        let buf = self.buf.lock().unwrap();
        String::from_utf8_lossy(&buf)
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    pub fn at_level(&self, level: &str) -> Vec<Value> {
        self.entries()
            .into_iter()
            .filter(|e| e["level"] == level)
            .collect()
    }

    /// Entries whose message is `message`.
    pub fn with_message(&self, message: &str) -> Vec<Value> {
        self.entries()
            .into_iter()
            .filter(|e| e["fields"]["message"] == message)
            .collect()
    }
}

pub fn test_logger() -> (Logger, Logs) {
    let logs = Logs::default();
    let buf = logs.buf.clone();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(move || Sink(buf.clone()))
        .finish();
    (Logger::new(tracing::Dispatch::new(subscriber)), logs)
}

pub fn config(drain: Duration) -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.listener.drain_timeout_ms = drain.as_millis() as u64;
    config
}

/// Sample application: `/slow` sleeps for `slow` before answering.
pub fn routes(slow: Duration) -> impl Fn(Router) -> Router + Send + Sync + 'static {
    routes_notifying(slow, Arc::new(Notify::new()))
}

/// Like [`routes`], and `/slow` notifies `started` once its handler runs.
pub fn routes_notifying(
    slow: Duration,
    started: Arc<Notify>,
) -> impl Fn(Router) -> Router + Send + Sync + 'static {
    move |router: Router| {
        let started = started.clone();
        router
            .route(
                "/slow",
                get(move || {
                    let started = started.clone();
                    async move {
                        started.notify_one();
                        tokio::time::sleep(slow).await;
                        "done"
                    }
                }),
            )
            .route("/hello/{name}", get(|axum::extract::Path(name): axum::extract::Path<String>| async move {
                format!("hello, {name}")
            }))
    }
}

/// An app serving on an ephemeral port.
pub struct TestApp {
    pub addr: SocketAddr,
    pub shutdown: ShutdownSignal,
    pub state: watch::Receiver<LifecycleState>,
    pub logs: Logs,
    pub run: JoinHandle<Result<(), LifecycleError>>,
}

/// Wait until a `/slow` handler has started.
pub async fn handler_started(started: &Notify) {
    tokio::time::timeout(Duration::from_secs(10), started.notified())
        .await
        .expect("handler did not start in time");
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn wait_for(&mut self, state: LifecycleState) {
        tokio::time::timeout(Duration::from_secs(10), self.state.wait_for(|s| *s == state))
            .await
            .expect("state not reached in time")
            .unwrap();
    }
}

/// Build with `configure`, then serve until the test triggers shutdown.
pub async fn spawn_app(
    config: ServiceConfig,
    configure: impl FnOnce(AppBuilder) -> AppBuilder,
) -> TestApp {
    let (logger, logs) = test_logger();
    let app = configure(App::builder(config).logger(logger)).build().unwrap();
    let state = app.state();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = ShutdownSignal::new();
    let run = tokio::spawn(app.serve(listener, CancellationToken::new(), shutdown.clone()));

    let mut app = TestApp {
        addr,
        shutdown,
        state,
        logs,
        run,
    };
    app.wait_for(LifecycleState::Running).await;
    app
}
