//! Cooperative cancellation for a pagination run.
//!
//! The paginator checks the signal before each page request and the retry policy races it
//! against backoff waits. An in-flight request is never interrupted.

use tokio::sync::watch;

/// Receiving side of a cancellation signal. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    rx: Option<watch::Receiver<bool>>,
}

/// Sending side; cancelling is idempotent.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl Cancellation {
    /// A connected handle/signal pair.
    pub fn new() -> (CancelHandle, Cancellation) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, Cancellation { rx: Some(rx) })
    }

    /// A signal that never fires.
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once cancellation fires. Pends forever for [`Cancellation::never`] or when the
    /// handle was dropped without cancelling.
    pub async fn cancelled(&self) {
        let Some(rx) = &self.rx else {
            return std::future::pending().await;
        };
        let mut rx = rx.clone();
        let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}
