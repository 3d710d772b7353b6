//! Cooperative cancellation for long-running streaming operations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::err::Error;

/// Shared cancellation flag, polled at row/chunk granularity.
///
/// Cancellation is cooperative; latency is bounded by one row or chunk of
/// work, never instantaneous.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; takes effect at the next poll point.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Bail out with [`Error::Cancelled`] if cancellation was requested.
    pub fn check(&self) -> Result<(), Error> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
