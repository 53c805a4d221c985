//! Stop signal shared by long-running tasks.

use std::sync::Arc;

use tokio::sync::watch;

/// Create a connected stopper/signal pair.
pub fn stop_channel() -> (Stopper, StopSignal) {
    let (stop_tx, stop_rx) = watch::channel(false);
    (
        Stopper {
            stop_tx: Arc::new(stop_tx),
        },
        StopSignal {
            stop_rx,
            _keepalive: None,
        },
    )
}

/// Handle that requests a stop.
#[derive(Debug, Clone)]
pub struct Stopper {
    stop_tx: Arc<watch::Sender<bool>>,
}

impl Stopper {
    /// Request a stop. Idempotent.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    /// A new signal observing this stopper.
    pub fn signal(&self) -> StopSignal {
        StopSignal {
            stop_rx: self.stop_tx.subscribe(),
            _keepalive: None,
        }
    }
}

/// Observer side of a [`Stopper`].
#[derive(Debug, Clone)]
pub struct StopSignal {
    stop_rx: watch::Receiver<bool>,
    _keepalive: Option<Arc<watch::Sender<bool>>>,
}

impl StopSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            stop_rx,
            _keepalive: Some(Arc::new(stop_tx)),
        }
    }

    /// Whether a stop was requested.
    pub fn is_stopped(&self) -> bool {
        *self.stop_rx.borrow()
    }

    /// Resolve once a stop is requested.
    ///
    /// A dropped stopper counts as a stop.
    pub async fn stopped(&self) {
        let mut rx = self.stop_rx.clone();
        // wait_for errors only when the sender is gone
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_stop_wakes_waiters() {
        let (stopper, signal) = stop_channel();
        let waiter = tokio::spawn({
            let signal = signal.clone();
            async move { signal.stopped().await }
        });

        assert!(!signal.is_stopped());
        stopper.stop();

        let joined = tokio::time::timeout(Duration::from_secs(1), waiter).await;
        assert!(matches!(joined, Ok(Ok(()))));
        assert!(signal.is_stopped());
    }

    #[tokio::test]
    async fn test_dropped_stopper_counts_as_stop() {
        let (stopper, signal) = stop_channel();
        drop(stopper);
        let done = tokio::time::timeout(Duration::from_secs(1), signal.stopped()).await;
        assert!(done.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_does_not_fire() {
        let signal = StopSignal::never();
        let fired = tokio::time::timeout(Duration::from_secs(60), signal.stopped()).await;
        assert!(fired.is_err());
    }
}
