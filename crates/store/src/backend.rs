//! State backend contract.
//!
//! The controller reads and writes cluster state only through
//! [`StateBackend`]; nothing above this trait knows how the state is stored
//! or transported.

use async_trait::async_trait;
use futures::stream::BoxStream;
use gobj_core::{Object, ObjectKey, ResourceKind, Result, Selector};
use serde::{Deserialize, Serialize};

/// Kind of change carried by a watch event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
}

/// One change notification. For `Deleted` the object is its last known state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEvent {
    #[serde(rename = "type")]
    pub event_type: WatchEventType,
    pub object: Object,
}

impl WatchEvent {
    /// Create an event.
    pub const fn new(event_type: WatchEventType, object: Object) -> Self {
        Self { event_type, object }
    }

    /// Decode the `{"type": .., "object": ..}` wire form.
    ///
    /// # Errors
    ///
    /// Returns `Malformed` when the payload is not a valid event.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| gobj_core::Error::malformed(e.to_string()))
    }
}

/// Stream of watch events. `Err(Malformed)` items are skippable; any other
/// error means the watch is broken and must be re-established.
pub type WatchStream = BoxStream<'static, Result<WatchEvent>>;

/// Trait for state backends.
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Fetch one object. `Ok(None)` when it does not exist.
    async fn get(&self, kind: ResourceKind, key: &ObjectKey) -> Result<Option<Object>>;

    /// List objects of a kind matching the selector.
    async fn list(&self, kind: ResourceKind, selector: &Selector) -> Result<Vec<Object>>;

    /// Write metadata and spec, conditioned on `resource_version`.
    ///
    /// Clearing the last finalizer of an object being deleted removes it.
    async fn update(&self, object: Object) -> Result<Object>;

    /// Write the status subresource, conditioned on `resource_version`.
    async fn update_status(&self, object: Object) -> Result<Object>;

    /// Open a watch on one kind, starting from now.
    async fn watch(&self, kind: ResourceKind) -> Result<WatchStream>;
}
