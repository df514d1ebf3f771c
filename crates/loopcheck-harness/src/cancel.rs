//! Cooperative cancellation, observed between chunks and between trials.
//!
//! A transfer already in flight is never interrupted; it completes or times
//! out and the runner stops at the next boundary.

use tokio::sync::watch;

/// Held by whoever decides to abort (usually the Ctrl-C handler).
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Checked by runners. Cheap to clone; one per execution context.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: Option<watch::Receiver<bool>>,
}

pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx: Some(rx) })
}

impl CancelHandle {
    pub fn cancel(&self) {
        // Stored even with no receivers, so tokens handed out later see it.
        self.tx.send_replace(true);
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: Some(self.tx.subscribe()),
        }
    }
}

impl CancelToken {
    /// A token that never fires.
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::never()
    }
}
