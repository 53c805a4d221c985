//! Maps store notifications to GlobalObject keys on the work queue.

use std::sync::Arc;

use gobj_core::{Object, ObjectKey, StopSignal};
use gobj_queue::WorkQueue;
use gobj_store::{Notification, StateStore, StoreSubscription};
use tracing::{debug, info, trace, warn};

/// The GlobalObject a changed object belongs to.
///
/// A GlobalObject maps to itself; a LocalObject to the owner reference of
/// kind `GlobalObject`, in the LocalObject's namespace. `None` when a
/// LocalObject has no such owner.
pub fn map_to_global(object: &Object) -> Option<ObjectKey> {
    match object {
        Object::GlobalObject(global) => Some(global.metadata.key()),
        Object::LocalObject(local) => local.owner_key(),
    }
}

/// Feeds the work queue from store notifications.
pub struct EventCorrelator {
    store: Arc<StateStore>,
    queue: WorkQueue<ObjectKey>,
}

impl EventCorrelator {
    /// Create a correlator enqueueing into `queue`.
    pub const fn new(store: Arc<StateStore>, queue: WorkQueue<ObjectKey>) -> Self {
        Self { store, queue }
    }

    /// Handle one notification.
    pub async fn handle(&self, notification: Notification) {
        match notification {
            Notification::Event(event) => match map_to_global(&event.object) {
                Some(key) => {
                    trace!(
                        event = ?event.event_type,
                        kind = %event.object.kind(),
                        object = %event.object.key(),
                        key = %key,
                        "Enqueueing owner"
                    );
                    self.queue.add(key);
                }
                None => warn!(
                    kind = %event.object.kind(),
                    object = %event.object.key(),
                    "LocalObject has no GlobalObject owner reference, skipping"
                ),
            },
            Notification::Malformed { kind, reason } => {
                warn!(kind = %kind, reason = %reason, "Skipping malformed event");
            }
            Notification::Resync(kind) => {
                let count = self.enqueue_all().await;
                info!(kind = %kind, count, "Resynced after relist");
            }
            Notification::Lagged(missed) => {
                let count = self.enqueue_all().await;
                warn!(missed, count, "Missed notifications, enqueued every GlobalObject");
            }
        }
    }

    /// Enqueue every cached GlobalObject. Returns how many keys were added.
    pub async fn enqueue_all(&self) -> usize {
        let keys = self.store.global_keys().await;
        let count = keys.len();
        for key in keys {
            self.queue.add(key);
        }
        count
    }

    /// Handle notifications until `stop` fires or the store goes away.
    pub async fn run(self, mut subscription: StoreSubscription, stop: StopSignal) {
        debug!("Event correlator started");
        loop {
            let notification = tokio::select! {
                () = stop.stopped() => break,
                notification = subscription.recv() => notification,
            };
            match notification {
                Some(notification) => self.handle(notification).await,
                None => break,
            }
        }
        debug!("Event correlator stopped");
    }
}
