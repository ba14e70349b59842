//! OS signal handling.
//!
//! # Responsibilities
//! - Register handlers for SIGQUIT, SIGTERM and SIGINT
//! - Translate the first one received into a `ShutdownSignal` trigger
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - The handler only sets the notification; the lifecycle does the rest
//! - Non-unix targets only see Ctrl+C

use tokio::task::JoinHandle;

use crate::lifecycle::shutdown::ShutdownSignal;

/// Forward the first termination signal to `shutdown`.
pub fn forward_os_signals(shutdown: ShutdownSignal) -> JoinHandle<()> {
    tokio::spawn(async move {
        let reason = termination_signal().await;
        tracing::info!(signal = reason, "termination signal received");
        shutdown.trigger(reason);
    })
}

#[cfg(unix)]
async fn termination_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let kinds = [
        (SignalKind::quit(), "SIGQUIT"),
        (SignalKind::terminate(), "SIGTERM"),
        (SignalKind::interrupt(), "SIGINT"),
    ];
    let mut streams = Vec::with_capacity(kinds.len());
    for (kind, name) in kinds {
        match signal(kind) {
            Ok(stream) => streams.push((stream, name)),
            Err(e) => tracing::error!(signal = name, error = %e, "failed to register signal handler"),
        }
    }
    if streams.is_empty() {
        return ctrl_c().await;
    }

    let waits = streams.into_iter().map(|(mut stream, name)| {
        Box::pin(async move {
            stream.recv().await;
            name
        })
    });
    futures_util::future::select_all(waits).await.0
}

#[cfg(not(unix))]
async fn termination_signal() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    "SIGINT"
}
