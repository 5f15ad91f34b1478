//! Cooperative shutdown signal shared by all workers.
//!
//! Cancellation never interrupts in-flight I/O; every loop selects
//! against [`Shutdown::cancelled`] between units of work.

use tokio::sync::watch;

/// Cloneable cancellation handle.
///
/// `child()` derives a signal that fires when either the child or its
/// parent is cancelled, so the registry can stop one worker without
/// stopping the rest, while a run-wide stop reaches everyone.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
    parent: Option<Box<Shutdown>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx,
            rx,
            parent: None,
        }
    }

    /// Derive a child signal that also honors this one.
    pub fn child(&self) -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx,
            rx,
            parent: Some(Box::new(self.clone())),
        }
    }

    /// Request shutdown. Idempotent.
    pub fn cancel(&self) {
        // Receivers may all be dropped already; that is fine.
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.parent.as_ref().is_some_and(|p| p.is_cancelled())
    }

    /// Resolves when shutdown is requested on this signal or any parent.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let own = async move {
            while !*rx.borrow_and_update() {
                if rx.changed().await.is_err() {
                    // Sender dropped without cancelling; park forever,
                    // the sibling branch (if any) decides.
                    std::future::pending::<()>().await;
                }
            }
        };

        match &self.parent {
            Some(parent) => {
                tokio::select! {
                    _ = own => {}
                    _ = Box::pin(parent.cancelled()) => {}
                }
            }
            None => own.await,
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
