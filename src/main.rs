//! http-harness demo service.
//!
//! Serves a sample application behind the instrumentor chain:
//!
//! ```text
//! client
//!   → recovery → metrics → access log
//!   → /ping, /hello/{name}, /panic
//! /metrics (Prometheus exposition, not instrumented)
//! ```
//!
//! Configuration comes from an optional TOML file plus the `ENV` and
//! `HTTP_METRICS_NAMESPACE` environment variables. SIGQUIT, SIGTERM or SIGINT
//! start a graceful drain; a drain that overruns its window exits with
//! status 1.

use std::path::PathBuf;
use std::process::ExitCode;

use axum::extract::Path;
use axum::routing::get;
use axum::{Extension, Router};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use http_harness::config::loader;
use http_harness::lifecycle::{forward_os_signals, App, LifecycleError, RegisterFn, ShutdownSignal};
use http_harness::observability::logging;
use http_harness::RequestErrors;

#[derive(Parser, Debug)]
#[command(name = "http-harness")]
#[command(about = "Instrumented HTTP service with graceful drain", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding the configuration.
    #[arg(short, long)]
    addr: Option<String>,

    /// Path of the metrics exposition.
    #[arg(long, default_value = "/metrics")]
    metrics_path: String,
}

fn routes(router: Router) -> Router {
    router
        .route("/hello/{name}", get(hello))
        .route("/panic", get(requested_panic))
}

async fn requested_panic() -> &'static str {
    panic!("panic: requested by client")
}

async fn hello(Path(name): Path<String>, Extension(errors): Extension<RequestErrors>) -> String {
    if name.is_empty() || name.len() > 64 {
        errors.push(format!("suspicious name length {}", name.len()));
    }
    format!("hello, {name}")
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => loader::load_config(path),
        None => loader::from_env(),
    };
    let mut config = match loaded {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(addr) = cli.addr {
        config.listener.bind_address = addr;
    }

    let logger = logging::init(&config.observability);
    tracing::info!(
        bind_address = %config.listener.bind_address,
        drain_timeout_ms = config.listener.drain_timeout_ms,
        environment = %config.observability.environment,
        "http-harness v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let app = match App::builder(config)
        .logger(logger.clone())
        .routes(RegisterFn(routes))
        .expose_metrics(cli.metrics_path)
        .build()
    {
        Ok(app) => app,
        Err(e) => {
            tracing::error!(error = %e, "failed to build app");
            logger.flush();
            return ExitCode::FAILURE;
        }
    };

    let shutdown = ShutdownSignal::new();
    forward_os_signals(shutdown.clone());

    match app.run(CancellationToken::new(), shutdown).await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e @ LifecycleError::ForcedShutdown(_)) => {
            tracing::error!(error = %e, "exiting after forced shutdown");
            logger.flush();
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!(error = %e, "lifecycle failed");
            logger.flush();
            ExitCode::FAILURE
        }
    }
}
