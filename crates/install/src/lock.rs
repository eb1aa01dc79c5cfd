//! Global transaction lock

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Serializes every package-manager mutation
///
/// The guard lives only for the duration of the one invocation passed to
/// [`TransactionLock::run`]; waiting on downloads or the event channel never
/// happens while it is held. Clones share the same lock.
#[derive(Clone, Debug, Default)]
pub struct TransactionLock {
    inner: Arc<Mutex<()>>,
}

impl TransactionLock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one mutating invocation while holding the lock
    pub async fn run<F, T>(&self, op: F) -> T
    where
        F: Future<Output = T>,
    {
        let _guard = self.inner.lock().await;
        op.await
    }

    /// Whether a mutation is in flight
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}
