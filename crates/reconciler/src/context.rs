//! Per-reconcile context.

use std::future::Future;
use std::time::Duration;

use gobj_core::{Error, Result, StopSignal};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shutdown signal and call deadline handed to every reconcile.
#[derive(Debug, Clone)]
pub struct Context {
    stop: StopSignal,
    request_timeout: Duration,
}

impl Context {
    /// Create a context observing `stop`.
    pub const fn new(stop: StopSignal, request_timeout: Duration) -> Self {
        Self {
            stop,
            request_timeout,
        }
    }

    /// A context that is never cancelled.
    pub fn detached() -> Self {
        Self::new(StopSignal::never(), DEFAULT_REQUEST_TIMEOUT)
    }

    /// Whether shutdown has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Run one backend call under the shutdown signal and the call deadline.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` if shutdown fires first, `Transient` if the
    /// deadline passes, or the call's own error.
    pub async fn call<T, F>(&self, operation: &str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }

        tokio::select! {
            biased;
            () = self.stop.stopped() => Err(Error::Cancelled),
            outcome = tokio::time::timeout(self.request_timeout, call) => {
                outcome.unwrap_or_else(|_| {
                    Err(Error::transient(
                        operation,
                        format!("timed out after {:?}", self.request_timeout),
                    ))
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gobj_core::stop_channel;

    #[tokio::test(start_paused = true)]
    async fn test_call_times_out_as_transient() {
        let ctx = Context::new(StopSignal::never(), Duration::from_secs(1));
        let outcome: Result<()> = ctx
            .call("update_status", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(outcome, Err(Error::Transient { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_observes_shutdown() {
        let (stopper, signal) = stop_channel();
        let ctx = Context::new(signal, Duration::from_secs(60));
        let pending = tokio::spawn(async move {
            ctx.call("get", async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(1)
            })
            .await
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        stopper.stop();
        let outcome = pending.await.map_err(|e| e.to_string());
        assert!(matches!(outcome, Ok(Err(Error::Cancelled))));
    }

    #[tokio::test]
    async fn test_call_passes_result_through() {
        let ctx = Context::detached();
        let outcome = ctx.call("get", async { Ok(7) }).await;
        assert_eq!(outcome, Ok(7));
        assert!(!ctx.is_cancelled());
    }
}
