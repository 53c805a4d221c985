//! Watch-fed cache of cluster state.
//!
//! [`StateStore::connect`] opens a watch per kind, lists every kind, and
//! spawns one reflector task per kind that folds watch events into the
//! cache. A broken watch is re-established with exponential backoff followed
//! by a full relist, after which subscribers receive [`Notification::Resync`].
//!
//! Events only replace cached state when they carry a newer resource version,
//! so a write the controller fed back through [`StateStore::observe`] is not
//! reported a second time when its own watch event arrives. Deleted keys keep
//! a tombstone with their last version until the next relist of their kind,
//! so a late event from before the deletion cannot bring them back.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;
use gobj_core::{
    Error, ExponentialBackoff, GlobalObject, LocalObject, Object, ObjectKey, Resource,
    ResourceKind, Result, Selector, StopSignal, Stopper, stop_channel,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{StateBackend, WatchEvent, WatchEventType, WatchStream};

const NOTIFICATION_BUFFER: usize = 1024;

/// Something subscribers of the store should react to.
#[derive(Debug, Clone)]
pub enum Notification {
    /// A watch event changed the cache.
    Event(WatchEvent),
    /// A watch payload could not be decoded and was skipped.
    Malformed { kind: ResourceKind, reason: String },
    /// The cache was rebuilt from a relist; individual changes may be lost.
    Resync(ResourceKind),
    /// This subscriber fell behind and missed this many notifications.
    Lagged(u64),
}

/// Receiving side of the store's notifications.
pub struct StoreSubscription {
    receiver: broadcast::Receiver<Notification>,
}

impl StoreSubscription {
    /// Next notification, or `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<Notification> {
        match self.receiver.recv().await {
            Ok(notification) => Some(notification),
            Err(RecvError::Lagged(missed)) => Some(Notification::Lagged(missed)),
            Err(RecvError::Closed) => None,
        }
    }
}

#[derive(Default)]
struct Cache {
    globals: BTreeMap<ObjectKey, GlobalObject>,
    locals: BTreeMap<ObjectKey, LocalObject>,
    tombstones: BTreeMap<(ResourceKind, ObjectKey), u64>,
}

impl Cache {
    fn version_of(&self, kind: ResourceKind, key: &ObjectKey) -> Option<u64> {
        let cached = match kind {
            ResourceKind::GlobalObject => {
                self.globals.get(key).map(|o| o.metadata.resource_version)
            }
            ResourceKind::LocalObject => {
                self.locals.get(key).map(|o| o.metadata.resource_version)
            }
        };
        cached.or_else(|| self.tombstones.get(&(kind, key.clone())).copied())
    }

    fn bury(&mut self, kind: ResourceKind, key: ObjectKey, version: u64) {
        let tombstone = self.tombstones.entry((kind, key)).or_insert(version);
        *tombstone = (*tombstone).max(version);
    }

    fn insert(&mut self, object: Object) {
        self.tombstones.remove(&(object.kind(), object.key()));
        match object {
            Object::GlobalObject(o) => {
                self.globals.insert(o.metadata.key(), o);
            }
            Object::LocalObject(o) => {
                self.locals.insert(o.metadata.key(), o);
            }
        }
    }

    fn remove(&mut self, kind: ResourceKind, key: &ObjectKey) -> bool {
        match kind {
            ResourceKind::GlobalObject => self.globals.remove(key).is_some(),
            ResourceKind::LocalObject => self.locals.remove(key).is_some(),
        }
    }

    /// Fold one change into the cache. Returns whether anything changed.
    fn apply(&mut self, event_type: WatchEventType, object: &Object) -> bool {
        let kind = object.kind();
        let key = object.key();
        let incoming = object.meta().resource_version;
        let cached = self.version_of(kind, &key);

        let gone = event_type == WatchEventType::Deleted
            || (object.meta().is_deleting() && object.meta().finalizers.is_empty());
        if gone {
            if cached.is_some_and(|v| v > incoming) {
                return false;
            }
            let removed = self.remove(kind, &key);
            self.bury(kind, key, incoming);
            return removed;
        }

        if cached.is_some_and(|v| v >= incoming) {
            return false;
        }
        self.insert(object.clone());
        true
    }

    fn replace_kind(&mut self, kind: ResourceKind, objects: Vec<Object>) {
        match kind {
            ResourceKind::GlobalObject => self.globals.clear(),
            ResourceKind::LocalObject => self.locals.clear(),
        }
        self.tombstones.retain(|(k, _), _| *k != kind);
        for object in objects.into_iter().filter(|o| o.kind() == kind) {
            self.insert(object);
        }
    }
}

/// Cached, watch-fed view of every GlobalObject and LocalObject.
pub struct StateStore {
    backend: Arc<dyn StateBackend>,
    cache: RwLock<Cache>,
    notifications: broadcast::Sender<Notification>,
    synced: AtomicBool,
    reconnect: ExponentialBackoff,
    stopper: Stopper,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StateStore {
    /// Connect with the default reconnect backoff.
    ///
    /// # Errors
    ///
    /// Returns the backend error if a watch cannot be opened or the initial
    /// list fails.
    pub async fn connect(backend: Arc<dyn StateBackend>) -> Result<Arc<Self>> {
        Self::connect_with_backoff(backend, ExponentialBackoff::default()).await
    }

    /// Connect, reconnecting broken watches with `reconnect`.
    ///
    /// Watches are opened before listing so no change falls between the two.
    ///
    /// # Errors
    ///
    /// Returns the backend error if a watch cannot be opened or the initial
    /// list fails.
    pub async fn connect_with_backoff(
        backend: Arc<dyn StateBackend>,
        reconnect: ExponentialBackoff,
    ) -> Result<Arc<Self>> {
        let (notifications, _) = broadcast::channel(NOTIFICATION_BUFFER);
        let (stopper, _) = stop_channel();
        let store = Arc::new(Self {
            backend,
            cache: RwLock::new(Cache::default()),
            notifications,
            synced: AtomicBool::new(false),
            reconnect,
            stopper,
            tasks: Mutex::new(Vec::new()),
        });

        let mut streams = Vec::with_capacity(ResourceKind::ALL.len());
        for kind in ResourceKind::ALL {
            streams.push((kind, store.backend.watch(kind).await?));
        }
        for kind in ResourceKind::ALL {
            store.relist(kind).await?;
        }

        let mut tasks = store.tasks.lock().await;
        for (kind, stream) in streams {
            let reflector = Arc::clone(&store);
            let stop = store.stopper.signal();
            tasks.push(tokio::spawn(async move {
                reflector.reflect(kind, stream, stop).await;
            }));
        }
        drop(tasks);

        store.synced.store(true, Ordering::SeqCst);
        let (globals, locals) = {
            let cache = store.cache.read().await;
            (cache.globals.len(), cache.locals.len())
        };
        info!(globals, locals, "State store synced");
        Ok(store)
    }

    /// Whether the cache reflects a complete list of both kinds.
    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    /// The backend this store reads from.
    pub fn backend(&self) -> Arc<dyn StateBackend> {
        Arc::clone(&self.backend)
    }

    /// Subscribe to cache changes.
    pub fn subscribe(&self) -> StoreSubscription {
        StoreSubscription {
            receiver: self.notifications.subscribe(),
        }
    }

    /// Cached GlobalObject by key.
    pub async fn global(&self, key: &ObjectKey) -> Option<GlobalObject> {
        self.cache.read().await.globals.get(key).cloned()
    }

    /// Cached LocalObjects whose owner reference points at `owner`.
    pub async fn locals_owned_by(&self, owner: &ObjectKey) -> Vec<LocalObject> {
        let selector = Selector::owned_by(ResourceKind::GlobalObject, owner);
        self.list(ResourceKind::LocalObject, &selector)
            .await
            .into_iter()
            .filter_map(LocalObject::from_object)
            .collect()
    }

    /// Keys of every cached GlobalObject, in key order.
    pub async fn global_keys(&self) -> Vec<ObjectKey> {
        self.cache.read().await.globals.keys().cloned().collect()
    }

    /// Cached objects of one kind matching `selector`.
    pub async fn list(&self, kind: ResourceKind, selector: &Selector) -> Vec<Object> {
        let cache = self.cache.read().await;
        match kind {
            ResourceKind::GlobalObject => cache
                .globals
                .values()
                .filter(|o| selector.matches(&o.metadata))
                .cloned()
                .map(Object::from)
                .collect(),
            ResourceKind::LocalObject => cache
                .locals
                .values()
                .filter(|o| selector.matches(&o.metadata))
                .cloned()
                .map(Object::from)
                .collect(),
        }
    }

    /// Feed the result of a successful write back into the cache.
    ///
    /// Ignored when the cache already holds the same or a newer version.
    pub async fn observe(&self, object: &Object) {
        let changed = self
            .cache
            .write()
            .await
            .apply(WatchEventType::Modified, object);
        if changed {
            debug!(
                kind = %object.kind(),
                key = %object.key(),
                version = object.meta().resource_version,
                "Observed own write"
            );
        }
    }

    /// Rebuild one kind from a fresh list and notify subscribers.
    ///
    /// # Errors
    ///
    /// Returns the backend error if listing fails; the cache is left as is.
    pub async fn refresh(&self, kind: ResourceKind) -> Result<()> {
        self.relist(kind).await?;
        self.notify(Notification::Resync(kind));
        Ok(())
    }

    /// Rebuild every kind from a fresh list.
    ///
    /// # Errors
    ///
    /// Returns the first backend error encountered.
    pub async fn refresh_all(&self) -> Result<()> {
        for kind in ResourceKind::ALL {
            self.refresh(kind).await?;
        }
        Ok(())
    }

    /// Stop the reflectors, wait for them, and drop cached state.
    pub async fn shutdown(&self) {
        self.stopper.stop();
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Reflector task ended abnormally");
            }
        }
        self.synced.store(false, Ordering::SeqCst);
        *self.cache.write().await = Cache::default();
        info!("State store shut down");
    }

    async fn relist(&self, kind: ResourceKind) -> Result<()> {
        let objects = self.backend.list(kind, &Selector::all()).await?;
        let count = objects.len();
        self.cache.write().await.replace_kind(kind, objects);
        debug!(kind = %kind, count, "Relisted");
        Ok(())
    }

    fn notify(&self, notification: Notification) {
        // No subscribers yet is fine.
        let _ = self.notifications.send(notification);
    }

    async fn apply_event(&self, event: WatchEvent) {
        let changed = self.cache.write().await.apply(event.event_type, &event.object);
        if changed {
            self.notify(Notification::Event(event));
        }
    }

    async fn reflect(&self, kind: ResourceKind, mut stream: WatchStream, stop: StopSignal) {
        debug!(kind = %kind, "Reflector started");
        loop {
            let item = tokio::select! {
                () = stop.stopped() => break,
                item = stream.next() => item,
            };

            match item {
                Some(Ok(event)) => self.apply_event(event).await,
                Some(Err(Error::Malformed { reason })) => {
                    debug!(kind = %kind, reason = %reason, "Undecodable watch payload");
                    self.notify(Notification::Malformed { kind, reason });
                }
                Some(Err(e)) => {
                    warn!(kind = %kind, error = %e, "Watch broken, re-establishing");
                    match self.reestablish(kind, &stop).await {
                        Some(next) => stream = next,
                        None => break,
                    }
                }
                None => {
                    warn!(kind = %kind, "Watch closed by backend, re-establishing");
                    match self.reestablish(kind, &stop).await {
                        Some(next) => stream = next,
                        None => break,
                    }
                }
            }
        }
        debug!(kind = %kind, "Reflector stopped");
    }

    /// Reopen the watch and relist until both succeed or a stop is requested.
    async fn reestablish(&self, kind: ResourceKind, stop: &StopSignal) -> Option<WatchStream> {
        self.synced.store(false, Ordering::SeqCst);
        let mut attempt = 0u32;
        loop {
            let delay = self.reconnect.delay(attempt);
            tokio::select! {
                () = stop.stopped() => return None,
                () = tokio::time::sleep(delay) => {}
            }

            let reopened = match self.backend.watch(kind).await {
                Ok(stream) => self.relist(kind).await.map(|()| stream),
                Err(e) => Err(e),
            };
            match reopened {
                Ok(stream) => {
                    self.synced.store(true, Ordering::SeqCst);
                    info!(kind = %kind, attempts = attempt + 1, "Watch re-established");
                    self.notify(Notification::Resync(kind));
                    return Some(stream);
                }
                Err(e) => {
                    warn!(kind = %kind, attempt, error = %e, "Failed to re-establish watch");
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use gobj_core::{GlobalObjectSpec, LocalObjectSpec};

    fn global_at(name: &str, version: u64) -> Object {
        let mut global = GlobalObject::new("default", name, GlobalObjectSpec::new("o8000"));
        global.metadata.resource_version = version;
        global.into()
    }

    #[test]
    fn test_apply_ignores_stale_versions() {
        let mut cache = Cache::default();
        assert!(cache.apply(WatchEventType::Added, &global_at("obj-1", 5)));
        assert!(!cache.apply(WatchEventType::Modified, &global_at("obj-1", 5)));
        assert!(!cache.apply(WatchEventType::Modified, &global_at("obj-1", 3)));
        assert!(cache.apply(WatchEventType::Modified, &global_at("obj-1", 6)));
    }

    #[test]
    fn test_apply_delete_removes_entry() {
        let mut cache = Cache::default();
        cache.apply(WatchEventType::Added, &global_at("obj-1", 5));
        assert!(cache.apply(WatchEventType::Deleted, &global_at("obj-1", 7)));
        assert!(!cache.apply(WatchEventType::Deleted, &global_at("obj-1", 7)));
        assert!(cache.globals.is_empty());
    }

    #[test]
    fn test_stale_event_does_not_resurrect_deleted_entry() {
        let mut cache = Cache::default();
        cache.apply(WatchEventType::Added, &global_at("obj-1", 5));
        assert!(cache.apply(WatchEventType::Deleted, &global_at("obj-1", 7)));

        assert!(!cache.apply(WatchEventType::Modified, &global_at("obj-1", 5)));
        assert!(!cache.apply(WatchEventType::Added, &global_at("obj-1", 7)));
        assert!(cache.globals.is_empty());

        // Recreated objects carry a newer version and come back.
        assert!(cache.apply(WatchEventType::Added, &global_at("obj-1", 9)));
        assert!(cache.tombstones.is_empty());
    }

    #[test]
    fn test_relist_clears_tombstones_of_its_kind() {
        let mut cache = Cache::default();
        cache.apply(WatchEventType::Added, &global_at("obj-1", 5));
        cache.apply(WatchEventType::Deleted, &global_at("obj-1", 6));

        cache.replace_kind(ResourceKind::GlobalObject, Vec::new());
        assert!(cache.tombstones.is_empty());
    }

    #[test]
    fn test_released_object_leaves_cache() {
        let mut cache = Cache::default();
        cache.apply(WatchEventType::Added, &global_at("obj-1", 5));
        let mut released = global_at("obj-1", 6);
        released.meta_mut().deletion_timestamp = Some(chrono::Utc::now());
        assert!(cache.apply(WatchEventType::Modified, &released));
        assert!(cache.globals.is_empty());
    }

    #[test]
    fn test_replace_kind_keeps_other_kind() {
        let mut cache = Cache::default();
        let local: Object =
            LocalObject::new("default", "shard-0", LocalObjectSpec::default()).into();
        cache.apply(WatchEventType::Added, &local);
        cache.apply(WatchEventType::Added, &global_at("obj-1", 1));

        cache.replace_kind(ResourceKind::GlobalObject, vec![global_at("obj-2", 2)]);
        assert_eq!(cache.globals.keys().map(|k| k.name.as_str()).collect::<Vec<_>>(), ["obj-2"]);
        assert_eq!(cache.locals.len(), 1);
    }
}
