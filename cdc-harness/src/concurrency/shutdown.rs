//! Broadcast stop signal built on a [`watch`] channel.
//!
//! Every task of a run holds a [`ShutdownRx`] and checks it between units of work, so a stop
//! request never interrupts a write that is already in flight.

use std::sync::Arc;

use tokio::sync::watch;

/// Sending half of the stop signal. Cloning shares the same channel.
#[derive(Debug, Clone)]
pub struct ShutdownTx(Arc<watch::Sender<bool>>);

impl ShutdownTx {
    /// Signals shutdown to every current and future subscriber.
    pub fn shutdown(&self) {
        self.0.send_replace(true);
    }

    /// Returns a new receiver observing this signal.
    pub fn subscribe(&self) -> ShutdownRx {
        ShutdownRx(self.0.subscribe())
    }

    /// Returns `true` once [`ShutdownTx::shutdown`] has been called.
    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow()
    }
}

/// Receiving half of the stop signal.
#[derive(Debug, Clone)]
pub struct ShutdownRx(watch::Receiver<bool>);

impl ShutdownRx {
    /// Returns `true` if shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once shutdown is requested.
    ///
    /// Stays pending forever if every sender is dropped without signalling.
    pub async fn wait_for_shutdown(&mut self) {
        if self.0.wait_for(|stopped| *stopped).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Creates a new stop signal in the running state.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTx(Arc::new(tx)), ShutdownRx(rx))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn subscribers_observe_shutdown() {
        let (tx, mut rx) = create_shutdown_channel();
        let mut late = tx.subscribe();
        assert!(!rx.is_shutdown());

        tx.shutdown();

        rx.wait_for_shutdown().await;
        late.wait_for_shutdown().await;
        assert!(rx.is_shutdown());
        assert!(tx.is_shutdown());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_sender_never_resolves() {
        let (tx, mut rx) = create_shutdown_channel();
        drop(tx);

        let waited = tokio::time::timeout(Duration::from_secs(1), rx.wait_for_shutdown()).await;
        assert!(waited.is_err());
    }
}
