//! Cooperative cancellation for the main loop.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Requests shutdown. Cloneable so it can be moved into a signal handler.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Observes shutdown requests. Dropping every handle counts as a request.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn channel() -> (ShutdownHandle, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (ShutdownHandle { tx: Arc::new(tx) }, Shutdown { rx })
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolves once shutdown has been requested.
    pub async fn cancelled(&mut self) {
        // Err means every handle is gone, which is also a shutdown
        let _ = self.rx.wait_for(|&stop| stop).await;
    }

    /// Sleep for `duration` unless shutdown comes first.
    ///
    /// Returns `true` if the full delay elapsed.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        if self.is_triggered() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.cancelled() => false,
        }
    }
}
