//! Recovery middleware.
//!
//! Catches panics escaping the downstream chain, classifies them and turns
//! them into a response so one request can never take the server down.
//!
//! - **Broken pipe**: the peer is gone. Logged without a stack trace, recorded
//!   on the request's error list, connection aborted without a body.
//! - **Generic**: logged with a stack trace, answered by the response policy
//!   (default: `500` JSON).
//!
//! The stack is captured by a process-wide panic hook at the panic site, while
//! the downstream future is being polled under recovery. Those panics skip the
//! default hook's stderr report; every other panic still reaches it.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::pin::pin;
use std::sync::{Arc, Once};

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures_util::FutureExt;

use crate::http::request::{RequestDump, RequestErrors};
use crate::http::response;
use crate::observability::logging::Logger;

/// How a caught failure is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanicKind {
    /// The peer closed the connection mid-response.
    BrokenPipe,
    Generic,
}

/// A failure caught by the recovery middleware.
#[derive(Debug)]
pub struct PanicEvent {
    pub kind: PanicKind,
    /// Message extracted from the panic payload.
    pub error: String,
    /// Captured for `Generic` failures only.
    pub stack: Option<String>,
    pub request: RequestDump,
}

impl PanicEvent {
    /// Classify a panic payload.
    pub fn classify(payload: &(dyn Any + Send), request: RequestDump) -> Self {
        let (error, broken_pipe) = describe(payload);
        let kind = if broken_pipe {
            PanicKind::BrokenPipe
        } else {
            PanicKind::Generic
        };
        let captured = take_panic_stack();
        let stack = match kind {
            PanicKind::BrokenPipe => None,
            PanicKind::Generic => {
                Some(captured.unwrap_or_else(|| Backtrace::force_capture().to_string()))
            }
        };
        Self {
            kind,
            error,
            stack,
            request,
        }
    }
}

/// Builds the response for a `Generic` failure.
pub type RecoveryPolicy = Arc<dyn Fn(&PanicEvent) -> Response + Send + Sync>;

/// The default policy: `500 {"code":"internal_server_error",...}`.
pub fn default_policy() -> RecoveryPolicy {
    Arc::new(|_event: &PanicEvent| response::internal_server_error())
}

/// State for the recovery middleware.
#[derive(Clone)]
pub struct RecoveryState {
    pub logger: Logger,
    pub policy: RecoveryPolicy,
    /// Bodies up to this size are buffered for the failure dump.
    pub dump_body_limit: usize,
}

pub async fn recovery_middleware(
    State(state): State<RecoveryState>,
    req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    let (mut req, dump) = match RequestDump::capture(req, state.dump_body_limit).await {
        Ok(captured) => captured,
        Err(e) => {
            state.logger.in_scope(|| {
                tracing::warn!(error = %e, path = %path, "failed to read request body");
            });
            return StatusCode::BAD_REQUEST.into_response();
        }
    };
    let errors = RequestErrors::attach(&mut req);

    install_panic_hook();
    let mut downstream = pin!(AssertUnwindSafe(next.run(req)).catch_unwind());
    let outcome = futures_util::future::poll_fn(|cx| {
        let _guard = RecoveryScope::enter();
        downstream.as_mut().poll(cx)
    })
    .await;
    let payload = match outcome {
        Ok(response) => return response,
        Err(payload) => payload,
    };

    let event = PanicEvent::classify(payload.as_ref(), dump);
    match event.kind {
        PanicKind::BrokenPipe => {
            state.logger.in_scope(|| {
                tracing::error!(
                    error = %event.error,
                    request = %event.request,
                    "{}", path
                );
            });
            errors.push(&event.error);
            response::aborted()
        }
        PanicKind::Generic => {
            state.logger.in_scope(|| {
                tracing::error!(
                    time = %chrono::Utc::now().to_rfc3339(),
                    error = %event.error,
                    request = %event.request,
                    stack = event.stack.as_deref().unwrap_or_default(),
                    "recover_from_panic"
                );
            });
            (state.policy)(&event)
        }
    }
}

thread_local! {
    static RECOVERY_DEPTH: Cell<usize> = const { Cell::new(0) };
    static PANIC_STACK: RefCell<Option<String>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Install the hook that records the stack of panics raised under recovery.
///
/// Idempotent. Panics outside a recovery scope go to the previous hook.
pub fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let recovering = RECOVERY_DEPTH.try_with(Cell::get).unwrap_or(0) > 0;
            if !recovering {
                previous(info);
                return;
            }
            let stack = format!("{info}\n{}", Backtrace::force_capture());
            let _ = PANIC_STACK.try_with(|slot| *slot.borrow_mut() = Some(stack));
        }));
    });
}

fn take_panic_stack() -> Option<String> {
    PANIC_STACK.try_with(|slot| slot.borrow_mut().take()).ok().flatten()
}

/// Marks the current thread as polling a recovered future.
///
/// The outermost scope clears any stack left by a panic that was caught
/// further down, so a stack is only ever read by the scope it belongs to.
struct RecoveryScope;

impl RecoveryScope {
    fn enter() -> Self {
        let depth = RECOVERY_DEPTH.with(|d| {
            let depth = d.get();
            d.set(depth + 1);
            depth
        });
        if depth == 0 {
            take_panic_stack();
        }
        RecoveryScope
    }
}

impl Drop for RecoveryScope {
    fn drop(&mut self) {
        RECOVERY_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

/// Message of a panic payload, and whether it is a broken connection.
fn describe(payload: &(dyn Any + Send)) -> (String, bool) {
    if let Some(err) = payload.downcast_ref::<io::Error>() {
        return (err.to_string(), is_broken_pipe(err));
    }
    if let Some(err) = payload.downcast_ref::<Box<dyn std::error::Error + Send + Sync>>() {
        let broken = source_chain(err.as_ref()).any(|e| {
            e.downcast_ref::<io::Error>()
                .is_some_and(is_broken_pipe)
        });
        return (err.to_string(), broken);
    }
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        return ((*msg).to_string(), false);
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return (msg.clone(), false);
    }
    ("unknown panic payload".to_string(), false)
}

fn source_chain<'a>(
    err: &'a (dyn std::error::Error + 'static),
) -> impl Iterator<Item = &'a (dyn std::error::Error + 'static)> {
    std::iter::successors(Some(err), |e| e.source())
}

fn is_broken_pipe(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
    ) {
        return true;
    }
    let msg = err.to_string().to_lowercase();
    msg.contains("broken pipe") || msg.contains("connection reset by peer")
}

impl fmt::Display for PanicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PanicKind::BrokenPipe => f.write_str("broken_pipe"),
            PanicKind::Generic => f.write_str("generic"),
        }
    }
}
