//! Worker pool driving reconciles from the work queue.

use std::sync::Arc;
use std::time::Duration;

use gobj_core::{ObjectKey, Result, StopSignal};
use gobj_queue::WorkQueue;
use gobj_store::StateStore;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::ControllerConfig;
use crate::context::Context;
use crate::correlator::EventCorrelator;
use crate::reconciler::{Action, Reconcile};

/// Runs the correlator, the resync ticker and a fixed pool of workers.
pub struct Controller {
    store: Arc<StateStore>,
    reconciler: Arc<dyn Reconcile>,
    queue: WorkQueue<ObjectKey>,
    workers: usize,
    resync_period: Option<Duration>,
    request_timeout: Duration,
}

impl Controller {
    /// Create a controller for `reconciler`, sized by `config`.
    pub fn new(
        store: Arc<StateStore>,
        reconciler: Arc<dyn Reconcile>,
        config: &ControllerConfig,
    ) -> Self {
        Self {
            store,
            reconciler,
            queue: WorkQueue::with_backoff(config.backoff),
            workers: config.workers.max(1),
            resync_period: config.resync(),
            request_timeout: config.request_timeout,
        }
    }

    /// The controller's work queue.
    pub const fn queue(&self) -> &WorkQueue<ObjectKey> {
        &self.queue
    }

    /// Run until `shutdown` fires, then drain and join every task.
    pub async fn run(self, shutdown: StopSignal) {
        let subscription = self.store.subscribe();
        let initial = EventCorrelator::new(Arc::clone(&self.store), self.queue.clone())
            .enqueue_all()
            .await;
        info!(
            workers = self.workers,
            resync = ?self.resync_period,
            initial,
            "Starting controller"
        );

        let mut tasks: Vec<(String, JoinHandle<()>)> = Vec::new();

        let correlator = EventCorrelator::new(Arc::clone(&self.store), self.queue.clone());
        let stop = shutdown.clone();
        tasks.push((
            "correlator".to_string(),
            tokio::spawn(async move { correlator.run(subscription, stop).await }),
        ));

        if let Some(period) = self.resync_period {
            let correlator = EventCorrelator::new(Arc::clone(&self.store), self.queue.clone());
            let stop = shutdown.clone();
            tasks.push((
                "resync".to_string(),
                tokio::spawn(async move { resync_loop(correlator, period, stop).await }),
            ));
        }

        let ctx = Context::new(shutdown.clone(), self.request_timeout);
        for id in 0..self.workers {
            let queue = self.queue.clone();
            let reconciler = Arc::clone(&self.reconciler);
            let ctx = ctx.clone();
            tasks.push((
                format!("worker-{id}"),
                tokio::spawn(async move { worker(id, queue, reconciler, ctx).await }),
            ));
        }

        shutdown.stopped().await;
        info!("Shutting down controller");
        self.queue.shutdown();

        for (name, task) in tasks {
            if let Err(e) = task.await {
                error!(task = %name, error = %e, "Controller task ended abnormally");
            }
        }
        info!("Controller stopped");
    }
}

async fn resync_loop(correlator: EventCorrelator, period: Duration, stop: StopSignal) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = stop.stopped() => break,
            _ = ticker.tick() => {
                let count = correlator.enqueue_all().await;
                debug!(count, "Periodic resync");
            }
        }
    }
}

async fn worker(
    id: usize,
    queue: WorkQueue<ObjectKey>,
    reconciler: Arc<dyn Reconcile>,
    ctx: Context,
) {
    debug!(worker = id, "Worker started");
    while let Some(key) = queue.get().await {
        let started = Instant::now();
        let outcome = reconciler.reconcile(&key, &ctx).await;
        debug!(worker = id, key = %key, elapsed = ?started.elapsed(), "Reconciled");
        handle_outcome(&queue, &key, outcome);
        queue.done(&key);
    }
    debug!(worker = id, "Worker stopped");
}

/// Turn a reconcile outcome into queue bookkeeping.
///
/// Errors are never dropped: apart from `Cancelled`, every error goes back on
/// the queue with per-key exponential backoff.
pub fn handle_outcome(queue: &WorkQueue<ObjectKey>, key: &ObjectKey, outcome: Result<Action>) {
    match outcome {
        Ok(Action { requeue_after: None }) => queue.forget(key),
        Ok(Action {
            requeue_after: Some(delay),
        }) => {
            queue.forget(key);
            queue.add_after(key.clone(), delay);
        }
        Err(e) if e.is_cancelled() => {
            debug!(key = %key, "Reconcile cancelled by shutdown");
        }
        Err(e) if e.is_retryable() => {
            warn!(
                key = %key,
                error = %e,
                requeues = queue.num_requeues(key),
                "Reconcile failed, backing off"
            );
            queue.add_rate_limited(key.clone());
        }
        Err(e) => {
            error!(key = %key, error = %e, requeues = queue.num_requeues(key), "Reconcile failed");
            queue.add_rate_limited(key.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use gobj_core::Error;

    fn key() -> ObjectKey {
        ObjectKey::new("default", "obj-1")
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_is_rate_limited() {
        let queue = WorkQueue::new();
        queue.add(key());
        let k = queue.get().await.unwrap();
        handle_outcome(&queue, &k, Err(Error::transient("update_status", "throttled")));
        queue.done(&k);

        assert_eq!(queue.num_requeues(&k), 1);
        assert_eq!(queue.len(), 0);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_zero_requeue_is_immediate_without_penalty() {
        let queue = WorkQueue::new();
        queue.add(key());
        let k = queue.get().await.unwrap();
        handle_outcome(&queue, &k, Ok(Action::requeue_now()));
        queue.done(&k);

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.num_requeues(&k), 0);
    }

    #[tokio::test]
    async fn test_success_forgets_failures() {
        let queue = WorkQueue::new();
        queue.add_rate_limited(key());
        assert_eq!(queue.num_requeues(&key()), 1);
        handle_outcome(&queue, &key(), Ok(Action::await_change()));
        assert_eq!(queue.num_requeues(&key()), 0);
    }

    #[tokio::test]
    async fn test_cancelled_is_dropped() {
        let queue = WorkQueue::new();
        handle_outcome(&queue, &key(), Err(Error::Cancelled));
        assert_eq!(queue.num_requeues(&key()), 0);
        assert!(queue.is_empty());
    }
}
