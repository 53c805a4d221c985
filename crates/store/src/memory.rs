//! In-memory state backend with API-server semantics.
//!
//! Resource versions come from one monotonic counter shared by both kinds,
//! the generation moves only when a spec changes, and deletion honours
//! finalizers: deleting an object that still carries finalizers only stamps
//! `deletion_timestamp`, and the object disappears once the last finalizer
//! is removed through [`StateBackend::update`].
//!
//! Faults, raw payloads and watch disconnects can be injected so tests can
//! drive every error path of the controller.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use gobj_core::{Error, Object, ObjectKey, Resource, ResourceKind, Result, Selector};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, trace};
use ulid::Ulid;

use crate::backend::{StateBackend, WatchEvent, WatchEventType, WatchStream};

const WATCH_BUFFER: usize = 1024;

/// Backend operations that faults can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
    Get,
    List,
    Update,
    UpdateStatus,
    Watch,
}

#[derive(Debug, Clone)]
enum Delivery {
    Event(WatchEvent),
    Raw(ResourceKind, serde_json::Value),
    Disconnect,
}

#[derive(Default)]
struct BackendState {
    objects: BTreeMap<(ResourceKind, ObjectKey), Object>,
    revision: u64,
}

impl BackendState {
    fn next_revision(&mut self) -> u64 {
        self.revision = self.revision.saturating_add(1);
        self.revision
    }
}

/// In-memory backend for tests and local runs.
pub struct InMemoryBackend {
    state: RwLock<BackendState>,
    events: broadcast::Sender<Delivery>,
    faults: Mutex<HashMap<BackendOp, VecDeque<Error>>>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        let (events, _) = broadcast::channel(WATCH_BUFFER);
        Self {
            state: RwLock::new(BackendState::default()),
            events,
            faults: Mutex::new(HashMap::new()),
        }
    }
}

impl InMemoryBackend {
    /// Create a new in-memory backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new in-memory backend wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Create an object, as a client or node agent would.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if an object with the same kind and key exists.
    pub async fn create(&self, object: impl Into<Object>) -> Result<Object> {
        let mut object = object.into();
        let kind = object.kind();
        let key = object.key();

        let mut state = self.state.write().await;
        if state.objects.contains_key(&(kind, key.clone())) {
            return Err(Error::already_exists(kind, key));
        }

        let revision = state.next_revision();
        let meta = object.meta_mut();
        meta.uid = Some(Ulid::new().to_string());
        meta.resource_version = revision;
        meta.generation = 1;
        meta.creation_timestamp = Some(Utc::now());
        meta.deletion_timestamp = None;

        state.objects.insert((kind, key.clone()), object.clone());
        drop(state);

        debug!(kind = %kind, key = %key, revision, "Created object");
        self.emit(WatchEventType::Added, object.clone());
        Ok(object)
    }

    /// Write spec, status, labels and owners regardless of version.
    ///
    /// Creates the object when it does not exist. This is how node agents
    /// report shard health.
    ///
    /// # Errors
    ///
    /// Never fails for a missing object; kept fallible to mirror `create`.
    pub async fn upsert(&self, object: impl Into<Object>) -> Result<Object> {
        let object = object.into();
        let kind = object.kind();
        let key = object.key();

        let mut state = self.state.write().await;
        let Some(existing) = state.objects.get(&(kind, key.clone())).cloned() else {
            drop(state);
            return self.create(object).await;
        };

        let mut next = object;
        let revision = state.next_revision();
        let generation = if existing.same_spec(&next) {
            existing.meta().generation
        } else {
            existing.meta().generation.saturating_add(1)
        };
        let meta = next.meta_mut();
        meta.uid.clone_from(&existing.meta().uid);
        meta.creation_timestamp = existing.meta().creation_timestamp;
        meta.deletion_timestamp = existing.meta().deletion_timestamp;
        meta.finalizers.clone_from(&existing.meta().finalizers);
        meta.resource_version = revision;
        meta.generation = generation;

        state.objects.insert((kind, key), next.clone());
        drop(state);

        self.emit(WatchEventType::Modified, next.clone());
        Ok(next)
    }

    /// Request deletion.
    ///
    /// With finalizers present this only stamps `deletion_timestamp`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the object does not exist.
    pub async fn delete(&self, kind: ResourceKind, key: &ObjectKey) -> Result<()> {
        let mut state = self.state.write().await;
        let Some(existing) = state.objects.get(&(kind, key.clone())).cloned() else {
            return Err(Error::not_found(kind, key.clone()));
        };

        if existing.meta().finalizers.is_empty() {
            state.objects.remove(&(kind, key.clone()));
            drop(state);
            debug!(kind = %kind, key = %key, "Deleted object");
            self.emit(WatchEventType::Deleted, existing);
            return Ok(());
        }

        if existing.meta().is_deleting() {
            return Ok(());
        }

        let mut next = existing;
        let revision = state.next_revision();
        next.meta_mut().deletion_timestamp = Some(Utc::now());
        next.meta_mut().resource_version = revision;
        state.objects.insert((kind, key.clone()), next.clone());
        drop(state);

        debug!(
            kind = %kind,
            key = %key,
            finalizers = ?next.meta().finalizers,
            "Deletion pending on finalizers"
        );
        self.emit(WatchEventType::Modified, next);
        Ok(())
    }

    /// Typed read that bypasses fault injection.
    pub async fn fetch<R: Resource>(&self, key: &ObjectKey) -> Option<R> {
        let state = self.state.read().await;
        state
            .objects
            .get(&(R::KIND, key.clone()))
            .cloned()
            .and_then(R::from_object)
    }

    /// Fail the next call of `op` with `error`. Faults queue up per operation.
    pub fn inject_fault(&self, op: BackendOp, error: Error) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Deliver a raw JSON payload to watchers of `kind`, decoded on their side.
    pub fn inject_raw(&self, kind: ResourceKind, payload: serde_json::Value) {
        let _ = self.events.send(Delivery::Raw(kind, payload));
    }

    /// Break every open watch stream.
    pub fn disconnect_watches(&self) {
        let _ = self.events.send(Delivery::Disconnect);
    }

    fn emit(&self, event_type: WatchEventType, object: Object) {
        trace!(?event_type, kind = %object.kind(), key = %object.key(), "Emitting watch event");
        // No receivers is fine: nobody is watching yet.
        let _ = self
            .events
            .send(Delivery::Event(WatchEvent::new(event_type, object)));
    }

    fn before(&self, op: BackendOp) -> Result<()> {
        let fault = self
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&op)
            .and_then(VecDeque::pop_front);
        fault.map_or(Ok(()), Err)
    }

    fn check_version(existing: &Object, incoming: &Object) -> Result<()> {
        let expected = incoming.meta().resource_version;
        let actual = existing.meta().resource_version;
        if expected == actual {
            Ok(())
        } else {
            Err(Error::version_conflict(
                existing.kind(),
                existing.key(),
                expected,
                actual,
            ))
        }
    }
}

#[async_trait]
impl StateBackend for InMemoryBackend {
    async fn get(&self, kind: ResourceKind, key: &ObjectKey) -> Result<Option<Object>> {
        self.before(BackendOp::Get)?;
        let state = self.state.read().await;
        Ok(state.objects.get(&(kind, key.clone())).cloned())
    }

    async fn list(&self, kind: ResourceKind, selector: &Selector) -> Result<Vec<Object>> {
        self.before(BackendOp::List)?;
        let state = self.state.read().await;
        Ok(state
            .objects
            .iter()
            .filter(|((k, _), object)| *k == kind && selector.matches(object.meta()))
            .map(|(_, object)| object.clone())
            .collect())
    }

    async fn update(&self, object: Object) -> Result<Object> {
        self.before(BackendOp::Update)?;
        let kind = object.kind();
        let key = object.key();

        let mut state = self.state.write().await;
        let Some(existing) = state.objects.get(&(kind, key.clone())).cloned() else {
            return Err(Error::not_found(kind, key));
        };
        Self::check_version(&existing, &object)?;

        let mut next = object;
        next.take_status_from(&existing);
        let generation = if existing.same_spec(&next) {
            existing.meta().generation
        } else {
            existing.meta().generation.saturating_add(1)
        };
        let revision = state.next_revision();
        let meta = next.meta_mut();
        meta.uid.clone_from(&existing.meta().uid);
        meta.creation_timestamp = existing.meta().creation_timestamp;
        meta.deletion_timestamp = existing.meta().deletion_timestamp;
        meta.resource_version = revision;
        meta.generation = generation;

        if next.meta().is_deleting() && next.meta().finalizers.is_empty() {
            state.objects.remove(&(kind, key.clone()));
            drop(state);
            debug!(kind = %kind, key = %key, "Last finalizer removed, object deleted");
            self.emit(WatchEventType::Deleted, next.clone());
            return Ok(next);
        }

        state.objects.insert((kind, key), next.clone());
        drop(state);
        self.emit(WatchEventType::Modified, next.clone());
        Ok(next)
    }

    async fn update_status(&self, object: Object) -> Result<Object> {
        self.before(BackendOp::UpdateStatus)?;
        let kind = object.kind();
        let key = object.key();

        let mut state = self.state.write().await;
        let Some(existing) = state.objects.get(&(kind, key.clone())).cloned() else {
            return Err(Error::not_found(kind, key));
        };
        Self::check_version(&existing, &object)?;

        let mut next = existing;
        next.take_status_from(&object);
        next.meta_mut().resource_version = state.next_revision();
        state.objects.insert((kind, key), next.clone());
        drop(state);

        self.emit(WatchEventType::Modified, next.clone());
        Ok(next)
    }

    async fn watch(&self, kind: ResourceKind) -> Result<WatchStream> {
        self.before(BackendOp::Watch)?;
        let receiver = self.events.subscribe();

        let stream = futures::stream::unfold(Some(receiver), move |receiver| async move {
            let mut receiver = receiver?;
            loop {
                match receiver.recv().await {
                    Ok(Delivery::Event(event)) if event.object.kind() == kind => {
                        return Some((Ok(event), Some(receiver)));
                    }
                    Ok(Delivery::Raw(target, payload)) if target == kind => {
                        return Some((WatchEvent::from_json(payload), Some(receiver)));
                    }
                    Ok(Delivery::Event(_) | Delivery::Raw(..)) => {}
                    Ok(Delivery::Disconnect) => {
                        let err = Error::transient("watch", "connection reset by backend");
                        return Some((Err(err), None));
                    }
                    Err(RecvError::Lagged(missed)) => {
                        let err =
                            Error::transient("watch", format!("watcher lagged by {missed} events"));
                        return Some((Err(err), None));
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });

        Ok(stream.boxed())
    }
}
