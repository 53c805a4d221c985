//! Deduplicating work queue with in-progress tracking.
//!
//! A key is in at most one of three places: queued (waiting for `get`),
//! processing (handed out, waiting for `done`), or both queued-later and
//! processing (it was added again while in progress, and is re-queued when
//! `done` is called). This is what guarantees that no two workers ever hold
//! the same key at the same time.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use gobj_core::{ExponentialBackoff, Stopper, stop_channel};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::rate_limiter::RateLimiter;

/// A queued key and when it entered the queue.
#[derive(Debug)]
struct Request<K> {
    key: K,
    enqueued_at: Instant,
}

struct QueueState<K> {
    queue: VecDeque<Request<K>>,
    /// Keys that need processing, with the time they were first added.
    dirty: HashMap<K, Instant>,
    processing: HashSet<K>,
    limiter: RateLimiter<K>,
    shutting_down: bool,
}

struct Shared<K> {
    state: Mutex<QueueState<K>>,
    available: Notify,
    idle: Notify,
    stopper: Stopper,
}

/// Work queue of reconcile keys, cheap to clone and share between tasks.
pub struct WorkQueue<K> {
    shared: Arc<Shared<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K> Default for WorkQueue<K>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
    /// Create a queue with the default rate-limit backoff (5ms doubling to 1000s).
    pub fn new() -> Self {
        Self::with_backoff(ExponentialBackoff::default())
    }

    /// Create a queue whose rate-limited adds use `backoff`.
    pub fn with_backoff(backoff: ExponentialBackoff) -> Self {
        let (stopper, _) = stop_channel();
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState {
                    queue: VecDeque::new(),
                    dirty: HashMap::new(),
                    processing: HashSet::new(),
                    limiter: RateLimiter::new(backoff),
                    shutting_down: false,
                }),
                available: Notify::new(),
                idle: Notify::new(),
                stopper,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<K>> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `key` unless it is already waiting.
    ///
    /// A key that is currently being processed is remembered and re-queued
    /// by [`WorkQueue::done`]. Ignored after shutdown.
    pub fn add(&self, key: K) {
        let mut state = self.lock();
        if state.shutting_down {
            trace!(key = ?key, "Dropping add after shutdown");
            return;
        }
        if state.dirty.contains_key(&key) {
            return;
        }

        let now = Instant::now();
        state.dirty.insert(key.clone(), now);
        if state.processing.contains(&key) {
            trace!(key = ?key, "Key in progress, deferring until done");
            return;
        }
        state.queue.push_back(Request {
            key,
            enqueued_at: now,
        });
        drop(state);
        self.shared.available.notify_one();
    }

    /// Wait for the next key and mark it in progress.
    ///
    /// Returns `None` once the queue is shut down and nothing is left queued.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.shared.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(Request { key, enqueued_at }) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    trace!(key = ?key, waited = ?enqueued_at.elapsed(), "Dequeued");
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Mark `key` as finished, re-queueing it if it was added meanwhile.
    pub fn done(&self, key: &K) {
        let mut state = self.lock();
        state.processing.remove(key);

        let mut requeued = false;
        if let Some(enqueued_at) = state.dirty.get(key).copied() {
            state.queue.push_back(Request {
                key: key.clone(),
                enqueued_at,
            });
            requeued = true;
        }
        let drained = state.shutting_down && state.processing.is_empty();
        drop(state);

        if requeued {
            self.shared.available.notify_one();
        }
        if drained {
            self.shared.idle.notify_waiters();
        }
    }

    /// Re-add `key` after its per-key exponential backoff.
    pub fn add_rate_limited(&self, key: K) {
        let delay = self.lock().limiter.when(&key);
        debug!(key = ?key, delay = ?delay, "Rate-limited requeue");
        self.add_after(key, delay);
    }

    /// Add `key` once `delay` has passed. A zero delay adds immediately.
    pub fn add_after(&self, key: K, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }

        let queue = self.clone();
        let stop = self.shared.stopper.signal();
        tokio::spawn(async move {
            tokio::select! {
                () = stop.stopped() => {}
                () = tokio::time::sleep(delay) => queue.add(key),
            }
        });
    }

    /// Clear the failure history of `key`.
    pub fn forget(&self, key: &K) {
        self.lock().limiter.forget(key);
    }

    /// Rate-limited requeues of `key` since it was last forgotten.
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.lock().limiter.num_requeues(key)
    }

    /// Number of keys waiting to be handed out.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Whether no key is waiting to be handed out.
    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    /// Whether [`WorkQueue::shutdown`] has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Stop accepting keys and wake every blocked `get`.
    ///
    /// Keys already queued are still handed out; pending delayed adds are
    /// dropped.
    pub fn shutdown(&self) {
        {
            let mut state = self.lock();
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
        }
        self.shared.stopper.stop();
        self.shared.available.notify_waiters();
        debug!("Work queue shutting down");
    }

    /// Shut down, then wait until every in-progress key is `done`.
    pub async fn shutdown_with_drain(&self) {
        self.shutdown();
        loop {
            let idle = self.shared.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();

            if self.lock().processing.is_empty() {
                return;
            }
            idle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[tokio::test]
    async fn test_get_returns_insertion_order() {
        let queue = WorkQueue::new();
        queue.add("a");
        queue.add("b");
        queue.add("c");
        assert_eq!(queue.get().await, Some("a"));
        assert_eq!(queue.get().await, Some("b"));
        assert_eq!(queue.get().await, Some("c"));
    }

    #[tokio::test]
    async fn test_readd_while_processing_waits_for_done() {
        let queue = WorkQueue::new();
        queue.add("a");
        let key = queue.get().await.unwrap();

        queue.add("a");
        assert_eq!(queue.len(), 0);

        queue.done(&key);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await, Some("a"));
    }

    #[tokio::test]
    async fn test_done_without_readd_leaves_queue_empty() {
        let queue = WorkQueue::new();
        queue.add("a");
        let key = queue.get().await.unwrap();
        queue.done(&key);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_after_delays_add() {
        let queue = WorkQueue::new();
        queue.add_after("a", Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(queue.len(), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_delayed_adds() {
        let queue = WorkQueue::new();
        queue.add_after("a", Duration::from_secs(5));
        queue.shutdown();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.get().await, None);
    }
}
