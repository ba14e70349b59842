//! HTTP server: accept loop, connection tracking and drain.
//!
//! # Responsibilities
//! - Bind the listener (or take a pre-bound one)
//! - Serve HTTP/1.1 and HTTP/2 connections through the instrumented router
//! - Stop accepting on request, then drain in-flight connections
//! - Force-close whatever is still open when the drain deadline passes
//!
//! # Design Decisions
//! - Own accept loop instead of `axum::serve`: the drain needs a handle on
//!   every connection task to abort it at the deadline
//! - `ConnectInfo<SocketAddr>` is inserted per connection so instrumentors
//!   see the peer address
//! - A bind failure is logged, never propagated: the process keeps waiting
//!   for its shutdown signal

use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use hyper_util::server::graceful::GracefulShutdown;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tower::Service;

use crate::observability::logging::Logger;

/// Where the server listens.
#[derive(Debug)]
pub enum Listen {
    /// Bind this address when the server starts.
    Addr(String),
    /// Serve an already bound listener.
    Bound(TcpListener),
}

/// The drain did not finish before its deadline.
#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    #[error("drain deadline exceeded with {open} connection(s) still open")]
    DeadlineExceeded { open: usize },
}

/// HTTP server for an instrumented router.
pub struct HttpServer {
    router: Router,
    logger: Logger,
}

impl HttpServer {
    pub fn new(router: Router, logger: Logger) -> Self {
        Self { router, logger }
    }

    /// Start the accept loop on a background task.
    pub fn spawn(self, listen: Listen) -> RunningServer {
        let stop = CancellationToken::new();
        let (addr_tx, addr_rx) = watch::channel(None);
        let task = tokio::spawn(accept_loop(self, listen, stop.clone(), addr_tx));
        RunningServer {
            stop,
            task,
            local_addr: addr_rx,
        }
    }
}

/// Handle on a spawned server.
pub struct RunningServer {
    stop: CancellationToken,
    task: JoinHandle<Option<Connections>>,
    local_addr: watch::Receiver<Option<SocketAddr>>,
}

impl RunningServer {
    /// The bound address, once listening. `None` if binding failed.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        let mut rx = self.local_addr.clone();
        let bound = rx.wait_for(Option::is_some).await.ok().and_then(|addr| *addr);
        bound
    }

    /// Stop accepting and drain open connections until `deadline` fires.
    ///
    /// A server that never started listening shuts down trivially.
    pub async fn shutdown(self, deadline: &CancellationToken) -> Result<(), ShutdownError> {
        self.stop.cancel();
        match self.task.await {
            Ok(Some(connections)) => connections.drain(deadline).await,
            Ok(None) => Ok(()),
            Err(e) => {
                tracing::error!(error = %e, "accept loop task failed");
                Ok(())
            }
        }
    }
}

/// Connections accepted by the loop, still being served.
struct Connections {
    graceful: GracefulShutdown,
    tasks: JoinSet<()>,
    logger: Logger,
}

impl Connections {
    async fn drain(self, deadline: &CancellationToken) -> Result<(), ShutdownError> {
        let Connections {
            graceful,
            mut tasks,
            logger,
        } = self;
        logger.in_scope(|| tracing::info!(open = tasks.len(), "draining connections"));

        tokio::select! {
            _ = graceful.shutdown() => {
                while tasks.join_next().await.is_some() {}
                Ok(())
            }
            _ = deadline.cancelled() => {
                let open = tasks.len();
                tasks.abort_all();
                while tasks.join_next().await.is_some() {}
                Err(ShutdownError::DeadlineExceeded { open })
            }
        }
    }
}

async fn accept_loop(
    server: HttpServer,
    listen: Listen,
    stop: CancellationToken,
    addr_tx: watch::Sender<Option<SocketAddr>>,
) -> Option<Connections> {
    let HttpServer { router, logger } = server;

    let listener = match listen {
        Listen::Bound(listener) => listener,
        Listen::Addr(addr) => match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(e) => {
                logger.in_scope(|| {
                    tracing::error!(error = %e, address = %addr, "listen_and_serve");
                });
                return None;
            }
        },
    };

    match listener.local_addr() {
        Ok(addr) => {
            logger.in_scope(|| tracing::info!(address = %addr, "HTTP server listening"));
            addr_tx.send_replace(Some(addr));
        }
        Err(e) => {
            logger.in_scope(|| tracing::error!(error = %e, "listener has no local address"));
        }
    }
    drop(addr_tx);

    let builder = AutoBuilder::new(TokioExecutor::new());
    let graceful = GracefulShutdown::new();
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            result = listener.accept() => {
                let (socket, remote_addr) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        logger.in_scope(|| tracing::error!(error = %e, "failed to accept connection"));
                        continue;
                    }
                };

                if let Err(e) = socket.set_nodelay(true) {
                    logger.in_scope(|| tracing::warn!(error = %e, "failed to set TCP_NODELAY"));
                }

                let router = router.clone();
                let service = hyper::service::service_fn(
                    move |req: hyper::Request<hyper::body::Incoming>| {
                        let mut router = router.clone();
                        let mut req = req.map(axum::body::Body::new);
                        req.extensions_mut().insert(ConnectInfo(remote_addr));
                        async move { router.call(req).await }
                    },
                );

                let conn = builder
                    .serve_connection_with_upgrades(TokioIo::new(socket), service)
                    .into_owned();
                let conn = graceful.watch(conn);

                let logger = logger.clone();
                tasks.spawn(async move {
                    if let Err(e) = conn.await {
                        logger.in_scope(|| tracing::debug!(error = %e, "connection closed"));
                    }
                });
            }
            // Reap finished connections so the set only holds live ones.
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
        }
    }

    logger.in_scope(|| tracing::info!("stopped accepting connections"));
    drop(listener);

    Some(Connections {
        graceful,
        tasks,
        logger,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::routing::get;
    use tokio::sync::Notify;

    use crate::observability::logging::capture;

    /// `/slow` answers after 300ms and notifies `started` when it begins.
    fn slow_router(started: Arc<Notify>) -> Router {
        Router::new().route(
            "/slow",
            get(move || {
                let started = started.clone();
                async move {
                    started.notify_one();
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    "done"
                }
            }),
        )
    }

    /// Send `GET /slow` and return once its handler is running.
    async fn slow_request(
        addr: SocketAddr,
        started: &Notify,
    ) -> tokio::task::JoinHandle<reqwest::Result<String>> {
        let client = reqwest::Client::new();
        let request = tokio::spawn(async move {
            client.get(format!("http://{addr}/slow")).send().await?.text().await
        });
        tokio::time::timeout(Duration::from_secs(10), started.notified())
            .await
            .expect("handler did not start in time");
        request
    }

    #[tokio::test]
    async fn test_bind_failure_is_logged() {
        let (logger, logs) = capture::logger();
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();
        let server =
            HttpServer::new(slow_router(Arc::new(Notify::new())), logger).spawn(Listen::Addr(addr));

        assert_eq!(server.local_addr().await, None);
        assert!(server.shutdown(&CancellationToken::new()).await.is_ok());
        let errors = logs.at_level("ERROR");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0]["fields"]["message"], "listen_and_serve");
    }

    #[tokio::test]
    async fn test_drain_waits_for_in_flight() {
        let (logger, _logs) = capture::logger();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let started = Arc::new(Notify::new());
        let server =
            HttpServer::new(slow_router(started.clone()), logger).spawn(Listen::Bound(listener));
        let addr = server.local_addr().await.unwrap();
        let request = slow_request(addr, &started).await;

        let deadline = CancellationToken::new();
        let timer = deadline.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            timer.cancel();
        });

        server.shutdown(&deadline).await.unwrap();
        assert_eq!(request.await.unwrap().unwrap(), "done");
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_deadline_aborts_connections() {
        let (logger, _logs) = capture::logger();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let started = Arc::new(Notify::new());
        let server =
            HttpServer::new(slow_router(started.clone()), logger).spawn(Listen::Bound(listener));
        let addr = server.local_addr().await.unwrap();
        let request = slow_request(addr, &started).await;

        let deadline = CancellationToken::new();
        deadline.cancel();
        let err = server.shutdown(&deadline).await.unwrap_err();
        assert!(matches!(err, ShutdownError::DeadlineExceeded { open: 1 }));
        assert!(request.await.unwrap().is_err());
    }
}
