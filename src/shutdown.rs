//! Loop-control cancellation signal
//!
//! A thin wrapper over `tokio::sync::watch`. The scheduler owns one
//! [`ShutdownTrigger`] and hands a [`Shutdown`] to every loop. Job bodies get
//! [`Shutdown::never`], which can not fire, so work that has started always
//! runs to completion.

use std::time::Duration;
use tokio::sync::watch;

/// Sending half: flips every subscribed [`Shutdown`] to cancelled
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

/// Receiving half, cheap to clone
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// Create a connected trigger/signal pair
pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl ShutdownTrigger {
    /// Cancel all subscribers. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Whether `trigger` has been called
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Create another signal connected to this trigger
    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
}

impl Shutdown {
    /// A signal that is never cancelled
    pub fn never() -> Self {
        // The sender is dropped here; `cancelled` treats a closed channel as
        // "will never fire".
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is requested
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Sleep for `duration` unless cancelled first.
    ///
    /// Returns true if the full duration elapsed, false if cancelled.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.cancelled() => false,
        }
    }
}
