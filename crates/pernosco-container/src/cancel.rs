//! Operator interrupt handling.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use signal_hook::consts::{SIGINT, SIGTERM};

/// Shared flag raised when the operator asks the supervisor to stop.
///
/// Clones observe the same flag. Signal handlers only set it; all reactions
/// happen on the supervising thread.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates an unraised token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the token.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns true once the token has been raised.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Raises the token on `SIGINT` and `SIGTERM`.
    ///
    /// Later signals only raise the flag again, so the supervisor always
    /// gets to stop and remove the container before the process exits.
    ///
    /// # Errors
    ///
    /// Returns the error reported when a handler cannot be registered.
    pub fn install_interrupt_handler(&self) -> io::Result<()> {
        for signal in [SIGINT, SIGTERM] {
            signal_hook::flag::register(signal, Arc::clone(&self.flag))?;
        }
        Ok(())
    }
}
