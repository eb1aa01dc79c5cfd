//! Cooperative cancellation between package-manager invocations

use crossgrader_errors::{Error, TransactionError};
use tokio::sync::watch;

/// Requests cancellation; held by the binary's signal handler
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Checked by the executor before every invocation; never interrupts one
#[derive(Clone, Debug)]
pub struct Cancellation {
    rx: watch::Receiver<bool>,
}

/// Create a linked handle/token pair
#[must_use]
pub fn cancellation() -> (CancelHandle, Cancellation) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, Cancellation { rx })
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl Cancellation {
    /// Token that is never cancelled
    #[must_use]
    pub fn never() -> Self {
        let (_handle, token) = cancellation();
        token
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Fail with `TransactionError::Cancelled` once cancellation was requested
    ///
    /// # Errors
    ///
    /// Returns an error after [`CancelHandle::cancel`] was called.
    pub fn check(&self) -> Result<(), Error> {
        if self.is_cancelled() {
            Err(TransactionError::Cancelled.into())
        } else {
            Ok(())
        }
    }

    /// Resolve when cancellation is requested; pending forever otherwise
    pub async fn cancelled(&mut self) {
        if self.rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::never()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_observed_by_clones() {
        let (handle, token) = cancellation();
        let clone = token.clone();
        assert!(token.check().is_ok());
        handle.cancel();
        assert!(clone.is_cancelled());
        assert!(token.check().unwrap_err().is_cancelled());
    }

    #[test]
    fn test_never_stays_clear() {
        let token = Cancellation::never();
        assert!(token.check().is_ok());
    }
}
