//! Shutdown coordination.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;

use crate::lifecycle::LifecycleError;

/// Single-slot shutdown notification.
///
/// Any number of triggers may fire; only the first is recorded. The
/// notification can be waited on exactly once, so at most one shutdown
/// sequence runs per signal.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    token: CancellationToken,
    reason: Arc<OnceLock<&'static str>>,
    consumed: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver the notification. Returns false if it was already delivered.
    pub fn trigger(&self, reason: &'static str) -> bool {
        let first = self.reason.set(reason).is_ok();
        self.token.cancel();
        first
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// What triggered the notification, if anything has.
    pub fn reason(&self) -> Option<&'static str> {
        self.reason.get().copied()
    }

    /// Claim the notification and wait for it.
    ///
    /// The claim happens on the call, not on the first poll.
    pub fn wait(&self) -> impl Future<Output = Result<&'static str, LifecycleError>> + Send + 'static {
        let claimed = !self.consumed.swap(true, Ordering::AcqRel);
        let signal = self.clone();
        async move {
            if !claimed {
                return Err(LifecycleError::SignalConsumed);
            }
            signal.token.cancelled().await;
            Ok(signal.reason().unwrap_or("unknown"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_trigger_wins() {
        let signal = ShutdownSignal::new();
        assert!(signal.trigger("SIGTERM"));
        assert!(!signal.trigger("SIGINT"));
        assert_eq!(signal.wait().await.unwrap(), "SIGTERM");
    }

    #[tokio::test]
    async fn test_consumed_once() {
        let signal = ShutdownSignal::new();
        let handle = tokio::spawn(signal.wait());
        tokio::task::yield_now().await;
        signal.trigger("SIGQUIT");
        assert_eq!(handle.await.unwrap().unwrap(), "SIGQUIT");

        assert!(matches!(
            signal.wait().await,
            Err(LifecycleError::SignalConsumed)
        ));
    }
}
