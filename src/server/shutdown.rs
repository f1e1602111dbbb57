//! Process-wide stop signal
//!
//! A running flag for loops that poll, plus a cancellation token that every
//! blocking await races against. Cloning shares the same signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

#[derive(Clone, Debug)]
pub struct Shutdown {
    running: Arc<AtomicBool>,
    token: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            token: CancellationToken::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.token.is_cancelled()
    }

    /// Clear the running flag and wake every waiter. Idempotent.
    pub fn trigger(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            tracing::info!("Shutdown requested");
        }
        self.token.cancel();
    }

    /// Resolves once `trigger` has been called
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Token cancelled by `trigger` or by its own `cancel`
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
