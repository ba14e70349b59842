//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Trusted proxy → instrumentors → /ping → caller routes → listen
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain connections → Stop
//!
//! Signals (signals.rs):
//!     SIGQUIT/SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # States
//! `Idle → Running → Draining → Stopped`. `Stopped` is terminal.
//!
//! # Design Decisions
//! - A listen failure is logged and the app keeps waiting for its signal
//! - A drain that overruns its deadline is fatal: connections are
//!   force-closed and `run` returns `LifecycleError::ForcedShutdown`
//! - After a clean drain the app still waits out the drain window before
//!   reporting `Stopped`

pub mod shutdown;
pub mod signals;
pub mod startup;

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::response::Response;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::ServiceConfig;
use crate::http::client_ip::{IpNetwork, NetworkParseError, TrustedProxy};
use crate::http::middleware::{Instrumentation, PanicEvent, RecoveryPolicy};
use crate::http::server::{HttpServer, Listen, ShutdownError};
use crate::http::skip::StringSet;
use crate::observability::logging::Logger;
use crate::observability::metrics::{HttpMetrics, MetricsError};

pub use shutdown::ShutdownSignal;
pub use signals::forward_os_signals;
pub use startup::{Middleware, RegisterFn, RouteRegistrar, PING_PATH};

/// Where an app is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Running => "running",
            LifecycleState::Draining => "draining",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// In-flight requests outlived the drain window.
    #[error("server forced to shutdown: {0}")]
    ForcedShutdown(#[source] ShutdownError),
    #[error("shutdown signal already consumed")]
    SignalConsumed,
    #[error(transparent)]
    TrustedProxy(#[from] NetworkParseError),
    #[error(transparent)]
    Metrics(#[from] MetricsError),
}

/// Builder for [`App`].
pub struct AppBuilder {
    config: ServiceConfig,
    logger: Option<Logger>,
    registrar: Option<Arc<dyn RouteRegistrar>>,
    metrics: Option<Arc<HttpMetrics>>,
    policy: Option<RecoveryPolicy>,
    middleware: Vec<Middleware>,
    exposition_path: Option<String>,
}

impl AppBuilder {
    /// Log through `logger` instead of the thread's default subscriber.
    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Application routes, attached once at startup.
    pub fn routes(mut self, registrar: impl RouteRegistrar + 'static) -> Self {
        self.registrar = Some(Arc::new(registrar));
        self
    }

    /// Record into existing aggregates instead of fresh ones.
    pub fn metrics(mut self, metrics: Arc<HttpMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Response for recovered panics. Defaults to a `500` JSON body.
    pub fn recovery_policy<F>(mut self, policy: F) -> Self
    where
        F: Fn(&PanicEvent) -> Response + Send + Sync + 'static,
    {
        self.policy = Some(Arc::new(policy));
        self
    }

    /// Wrap the application routes; applied in call order, inside the
    /// instrumentors.
    pub fn middleware<F>(mut self, wrap: F) -> Self
    where
        F: Fn(Router) -> Router + Send + Sync + 'static,
    {
        self.middleware.push(Arc::new(wrap));
        self
    }

    /// Serve the metrics exposition at `path`, outside the instrumentors.
    pub fn expose_metrics(mut self, path: impl Into<String>) -> Self {
        self.exposition_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<App, LifecycleError> {
        let logger = self.logger.unwrap_or_else(Logger::current);
        let observability = &self.config.observability;

        let network: IpNetwork = self.config.proxy.trusted_network.parse()?;
        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => Arc::new(HttpMetrics::from_config(observability)?),
        };

        let mut instrumentation =
            Instrumentation::new(logger.clone(), TrustedProxy::new(network), metrics.clone())
                .log_skip(StringSet::new(observability.log_skip_paths.iter().cloned()))
                .metrics_skip(StringSet::new(
                    observability.metrics_skip_prefixes.iter().cloned(),
                ))
                .dump_body_limit(self.config.recovery.dump_body_limit);
        if let Some(policy) = self.policy {
            instrumentation = instrumentation.recovery_policy(policy);
        }

        let registrar: Arc<dyn RouteRegistrar> = match self.registrar {
            Some(registrar) => registrar,
            None => Arc::new(Router::new()),
        };
        let router = startup::build_router(
            &instrumentation,
            registrar.as_ref(),
            &self.middleware,
            self.exposition_path.as_deref(),
        );

        let (state, _) = watch::channel(LifecycleState::Idle);
        let (local_addr, _) = watch::channel(None);
        Ok(App {
            config: self.config,
            logger,
            router,
            metrics,
            state,
            local_addr,
        })
    }
}

/// An instrumented HTTP service with a supervised lifecycle.
pub struct App {
    config: ServiceConfig,
    logger: Logger,
    router: Router,
    metrics: Arc<HttpMetrics>,
    state: watch::Sender<LifecycleState>,
    local_addr: watch::Sender<Option<SocketAddr>>,
}

impl App {
    pub fn builder(config: ServiceConfig) -> AppBuilder {
        AppBuilder {
            config,
            logger: None,
            registrar: None,
            metrics: None,
            policy: None,
            middleware: Vec::new(),
            exposition_path: None,
        }
    }

    /// The fully assembled router.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn metrics(&self) -> &Arc<HttpMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Bound address, published when the listener is up.
    pub fn local_addr(&self) -> watch::Receiver<Option<SocketAddr>> {
        self.local_addr.subscribe()
    }

    /// Listen on the configured address until `shutdown` fires, then drain.
    ///
    /// The drain window is a child of `parent`: cancelling `parent` ends it
    /// early.
    pub async fn run(
        self,
        parent: CancellationToken,
        shutdown: ShutdownSignal,
    ) -> Result<(), LifecycleError> {
        let addr = self.config.listener.bind_address.clone();
        self.run_with(Listen::Addr(addr), parent, shutdown).await
    }

    /// Like [`App::run`], on an already bound listener.
    pub async fn serve(
        self,
        listener: TcpListener,
        parent: CancellationToken,
        shutdown: ShutdownSignal,
    ) -> Result<(), LifecycleError> {
        self.run_with(Listen::Bound(listener), parent, shutdown).await
    }

    async fn run_with(
        self,
        listen: Listen,
        parent: CancellationToken,
        shutdown: ShutdownSignal,
    ) -> Result<(), LifecycleError> {
        let App {
            config,
            logger,
            router,
            state,
            local_addr,
            ..
        } = self;
        let drain_timeout = config.listener.drain_timeout();

        let signalled = shutdown.wait();
        let server = HttpServer::new(router, logger.clone()).spawn(listen);
        local_addr.send_replace(server.local_addr().await);
        state.send_replace(LifecycleState::Running);

        let reason = match signalled.await {
            Ok(reason) => reason,
            Err(e) => {
                let now = CancellationToken::new();
                now.cancel();
                let _ = server.shutdown(&now).await;
                state.send_replace(LifecycleState::Stopped);
                return Err(e);
            }
        };

        state.send_replace(LifecycleState::Draining);
        logger.in_scope(|| {
            tracing::info!(signal = reason, drain_timeout = ?drain_timeout, "shutting down server");
        });

        let drain = parent.child_token();
        let timer = drain.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(drain_timeout) => timer.cancel(),
                _ = timer.cancelled() => {}
            }
        });

        if let Err(e) = server.shutdown(&drain).await {
            logger.in_scope(|| tracing::error!(error = %e, "server forced to shutdown"));
            state.send_replace(LifecycleState::Stopped);
            logger.flush();
            return Err(LifecycleError::ForcedShutdown(e));
        }

        drain.cancelled().await;
        logger.in_scope(|| tracing::info!(timeout_of_context = ?drain_timeout, "timeout"));
        state.send_replace(LifecycleState::Stopped);
        logger.flush();
        Ok(())
    }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("config", &self.config)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}
