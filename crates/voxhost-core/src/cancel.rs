//! Cooperative cancellation driven by termination signals.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use signal_hook::consts::signal::{SIGINT, SIGTERM};
use tracing::debug;

/// Shared flag checked by the engine before every mutation and poll.
///
/// Cancelling stops convergence; it never undoes work already done.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a token that `SIGINT` and `SIGTERM` will cancel.
    ///
    /// # Errors
    ///
    /// Returns an IO error when the handlers cannot be registered.
    pub fn from_signals() -> io::Result<Self> {
        let token = Self::new();
        for signal in [SIGINT, SIGTERM] {
            signal_hook::flag::register(signal, Arc::clone(&token.flag))?;
        }
        debug!(target: "voxhost_core::cancel", "termination signals cancel the run");
        Ok(token)
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
