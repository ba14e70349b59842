//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber for the binary
//! - Provide an injectable `Logger` handle to the instrumentors
//! - Flush buffered output before exit
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, pretty format for development
//! - Log level from `RUST_LOG`, otherwise `info` (production) / `debug`
//! - A `Logger` wraps a `tracing::Dispatch`, so each server can log to its own
//!   subscriber and tests never touch the global one

use std::io::Write;

use tracing::Dispatch;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Handle to the structured logger used by the instrumentors.
#[derive(Clone)]
pub struct Logger {
    dispatch: Dispatch,
}

impl Logger {
    /// Log through the given dispatcher.
    pub fn new(dispatch: Dispatch) -> Self {
        Self { dispatch }
    }

    /// Log through whatever dispatcher is the default on this thread.
    pub fn current() -> Self {
        Self {
            dispatch: tracing::dispatcher::get_default(Dispatch::clone),
        }
    }

    /// Run `f` with this logger as the default dispatcher.
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, f)
    }

    /// Flush buffered output.
    pub fn flush(&self) {
        let _ = std::io::stdout().flush();
        let _ = std::io::stderr().flush();
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger").finish_non_exhaustive()
    }
}

/// Build the subscriber described by `config`, install it as the global
/// default and return a `Logger` bound to it.
pub fn init(config: &ObservabilityConfig) -> Logger {
    let default_level = config
        .log_level
        .clone()
        .unwrap_or_else(|| if config.is_production() { "info" } else { "debug" }.to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into());

    let dispatch = if config.is_production() {
        Dispatch::new(
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_ansi(false)),
        )
    } else {
        Dispatch::new(
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_ansi(false)),
        )
    };

    if tracing::dispatcher::set_global_default(dispatch.clone()).is_err() {
        tracing::warn!("global subscriber already installed, keeping it");
        return Logger::current();
    }
    Logger::new(dispatch)
}
