//! Job-scoped cancellation.
//!
//! One `CancelSource` per job; clones of the `CancelToken` are handed to
//! every subsystem with a suspension point (retry sleeps, lock polls,
//! child waits). Cancellation is level-triggered and latches.

use tokio::sync::watch;

/// The cancelling side. Held by the driver's cancellation-watch task.
#[derive(Debug)]
pub struct CancelSource {
    tx: watch::Sender<bool>,
}

/// The observing side. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

/// Create a connected source/token pair.
pub fn cancel_pair() -> (CancelSource, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelSource { tx }, CancelToken { rx })
}

impl CancelSource {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl CancelToken {
    /// A token that never fires, for callers without a job scope (tests,
    /// one-shot tools).
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        // Leak the sender so the channel stays open.
        std::mem::forget(tx);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve when cancellation is signalled. Already-cancelled tokens
    /// resolve immediately.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        // Channel closure (source dropped) means the job can no longer be
        // cancelled; park forever rather than spuriously firing.
        loop {
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
            if *rx.borrow() {
                return;
            }
        }
    }
}
