//! GlobalObject and LocalObject resources.
//!
//! A GlobalObject is a logical distributed object; its LocalObjects are the
//! node-local shards that make it up. Shards point at their GlobalObject
//! through an owner reference, and the GlobalObject lists the shard ids it
//! expects in `spec.members`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::meta::{ObjectKey, ObjectMeta, OwnerReference};

/// API group/version of both resources.
pub const API_VERSION: &str = "k8s.v6d.io/v1alpha1";

/// Condition type summarising whether every member is healthy.
pub const CONDITION_READY: &str = "Ready";

/// Condition type recording a reconcile failure the controller cannot fix.
pub const CONDITION_RECONCILE_ERROR: &str = "ReconcileError";

/// Kinds of resource the controller knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    GlobalObject,
    LocalObject,
}

impl ResourceKind {
    /// All kinds, in watch-start order.
    pub const ALL: [Self; 2] = [Self::GlobalObject, Self::LocalObject];

    /// Kind name as used on the wire.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GlobalObject => "GlobalObject",
            Self::LocalObject => "LocalObject",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate phase of a GlobalObject.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// No shard has been observed yet.
    #[default]
    Pending,
    /// Every expected shard is present and healthy.
    Ready,
    /// At least one expected shard is missing or unhealthy.
    Degraded,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("Pending"),
            Self::Ready => f.write_str("Ready"),
            Self::Degraded => f.write_str("Degraded"),
        }
    }
}

/// Status of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// A single observation about a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    /// Only moves when `status` changes.
    pub last_transition_time: DateTime<Utc>,
}

/// Desired shape of a GlobalObject.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalObjectSpec {
    /// Object-store identifier of the distributed object.
    pub id: String,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub typename: String,
    /// Identifiers of the LocalObjects this object is composed of.
    #[serde(default)]
    pub members: Vec<String>,
}

impl GlobalObjectSpec {
    /// Create a spec for the given object-store id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Set the expected member ids.
    #[must_use]
    pub fn with_members<I, S>(mut self, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.members = members.into_iter().map(Into::into).collect();
        self
    }

    /// Set the type name.
    #[must_use]
    pub fn with_typename(mut self, typename: impl Into<String>) -> Self {
        self.typename = typename.into();
        self
    }
}

/// Observed state of a GlobalObject, written only by the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalObjectStatus {
    #[serde(default)]
    pub phase: Phase,
    #[serde(default)]
    pub ready_members: usize,
    #[serde(default)]
    pub observed_members: usize,
    #[serde(default)]
    pub expected_members: usize,
    #[serde(default)]
    pub observed_generation: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl GlobalObjectStatus {
    /// Find a condition by type.
    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    /// Insert or update a condition.
    ///
    /// The transition time is kept when the status does not change, so that
    /// re-asserting the same observation is a no-op.
    pub fn set_condition(
        &mut self,
        condition_type: &str,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        let reason = reason.into();
        let message = message.into();
        match self
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == condition_type)
        {
            Some(existing) => {
                if existing.status != status {
                    existing.last_transition_time = now;
                }
                existing.status = status;
                existing.reason = reason;
                existing.message = message;
            }
            None => self.conditions.push(Condition {
                condition_type: condition_type.to_string(),
                status,
                reason,
                message,
                last_transition_time: now,
            }),
        }
    }

    /// Remove a condition. Returns `false` if it was absent.
    pub fn remove_condition(&mut self, condition_type: &str) -> bool {
        let before = self.conditions.len();
        self.conditions.retain(|c| c.condition_type != condition_type);
        self.conditions.len() != before
    }
}

/// Cluster-level resource for a logical distributed object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalObject {
    pub metadata: ObjectMeta,
    pub spec: GlobalObjectSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<GlobalObjectStatus>,
}

impl GlobalObject {
    /// Create a GlobalObject with no status.
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        spec: GlobalObjectSpec,
    ) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec,
            status: None,
        }
    }

    /// Recorded phase, `Pending` when no status was written yet.
    pub fn phase(&self) -> Phase {
        self.status.as_ref().map_or(Phase::Pending, |s| s.phase)
    }
}

/// Shape of a node-local shard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalObjectSpec {
    /// Object-store identifier of the shard.
    pub id: String,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub typename: String,
    /// Node hosting the shard.
    #[serde(default)]
    pub hostname: String,
    /// Object-store instance on that node.
    #[serde(default)]
    pub instance_id: u64,
}

/// Liveness of a shard as reported by its node agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalObjectStatus {
    #[serde(default)]
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Node-local shard contributing to a GlobalObject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalObject {
    pub metadata: ObjectMeta,
    pub spec: LocalObjectSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<LocalObjectStatus>,
}

impl LocalObject {
    /// Create a LocalObject with no owner and no reported health.
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        spec: LocalObjectSpec,
    ) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec,
            status: None,
        }
    }

    /// Point this shard at its GlobalObject.
    #[must_use]
    pub fn owned_by(mut self, global_name: impl Into<String>) -> Self {
        self.metadata
            .owner_references
            .push(OwnerReference::new(ResourceKind::GlobalObject, global_name));
        self
    }

    /// Set the reported health.
    #[must_use]
    pub fn with_health(mut self, healthy: bool) -> Self {
        self.status = Some(LocalObjectStatus {
            healthy,
            message: None,
        });
        self
    }

    /// A shard that never reported health counts as unhealthy.
    pub fn is_healthy(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.healthy)
    }

    /// Key of the owning GlobalObject, if the owner reference is present.
    pub fn owner_key(&self) -> Option<ObjectKey> {
        self.metadata
            .owner_of_kind(ResourceKind::GlobalObject)
            .map(|owner| ObjectKey::new(self.metadata.namespace.clone(), owner.name.clone()))
    }
}

/// A resource of either kind, tagged by `kind` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Object {
    GlobalObject(GlobalObject),
    LocalObject(LocalObject),
}

impl Object {
    /// Kind of the wrapped resource.
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::GlobalObject(_) => ResourceKind::GlobalObject,
            Self::LocalObject(_) => ResourceKind::LocalObject,
        }
    }

    /// Metadata of the wrapped resource.
    pub const fn meta(&self) -> &ObjectMeta {
        match self {
            Self::GlobalObject(o) => &o.metadata,
            Self::LocalObject(o) => &o.metadata,
        }
    }

    /// Mutable metadata of the wrapped resource.
    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Self::GlobalObject(o) => &mut o.metadata,
            Self::LocalObject(o) => &mut o.metadata,
        }
    }

    /// Key of the wrapped resource.
    pub fn key(&self) -> ObjectKey {
        self.meta().key()
    }

    /// Whether both objects carry the same spec. Objects of different kinds never do.
    pub fn same_spec(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::GlobalObject(a), Self::GlobalObject(b)) => a.spec == b.spec,
            (Self::LocalObject(a), Self::LocalObject(b)) => a.spec == b.spec,
            _ => false,
        }
    }

    /// Copy the status of `other` into `self`, when the kinds match.
    pub fn take_status_from(&mut self, other: &Self) {
        match (self, other) {
            (Self::GlobalObject(a), Self::GlobalObject(b)) => a.status.clone_from(&b.status),
            (Self::LocalObject(a), Self::LocalObject(b)) => a.status.clone_from(&b.status),
            _ => {}
        }
    }
}

impl From<GlobalObject> for Object {
    fn from(object: GlobalObject) -> Self {
        Self::GlobalObject(object)
    }
}

impl From<LocalObject> for Object {
    fn from(object: LocalObject) -> Self {
        Self::LocalObject(object)
    }
}

/// Typed access to one kind of resource.
pub trait Resource: Clone + Send + Sync + 'static {
    /// Kind of this resource.
    const KIND: ResourceKind;

    /// Metadata of the resource.
    fn meta(&self) -> &ObjectMeta;

    /// Mutable metadata of the resource.
    fn meta_mut(&mut self) -> &mut ObjectMeta;

    /// Unwrap an [`Object`] of this kind.
    fn from_object(object: Object) -> Option<Self>;

    /// Wrap this resource in an [`Object`].
    fn into_object(self) -> Object;

    /// Key of the resource.
    fn key(&self) -> ObjectKey {
        self.meta().key()
    }
}

impl Resource for GlobalObject {
    const KIND: ResourceKind = ResourceKind::GlobalObject;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn from_object(object: Object) -> Option<Self> {
        match object {
            Object::GlobalObject(o) => Some(o),
            Object::LocalObject(_) => None,
        }
    }

    fn into_object(self) -> Object {
        Object::GlobalObject(self)
    }
}

impl Resource for LocalObject {
    const KIND: ResourceKind = ResourceKind::LocalObject;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn from_object(object: Object) -> Option<Self> {
        match object {
            Object::LocalObject(o) => Some(o),
            Object::GlobalObject(_) => None,
        }
    }

    fn into_object(self) -> Object {
        Object::LocalObject(self)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use chrono::Duration;

    fn shard(name: &str, id: &str) -> LocalObject {
        LocalObject::new(
            "default",
            name,
            LocalObjectSpec {
                id: id.to_string(),
                hostname: "node-a".to_string(),
                ..LocalObjectSpec::default()
            },
        )
    }

    #[test]
    fn test_shard_without_status_is_unhealthy() {
        assert!(!shard("s0", "o0").is_healthy());
        assert!(shard("s0", "o0").with_health(true).is_healthy());
    }

    #[test]
    fn test_owner_key_uses_shard_namespace() {
        let local = shard("s0", "o0").owned_by("obj-1");
        assert_eq!(local.owner_key(), Some(ObjectKey::new("default", "obj-1")));
        assert_eq!(shard("s1", "o1").owner_key(), None);
    }

    #[test]
    fn test_set_condition_keeps_transition_time_when_status_unchanged() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(30);
        let mut status = GlobalObjectStatus::default();

        status.set_condition(CONDITION_READY, ConditionStatus::False, "Pending", "", t0);
        status.set_condition(
            CONDITION_READY,
            ConditionStatus::False,
            "Degraded",
            "one missing",
            t1,
        );
        let ready = status.condition(CONDITION_READY).unwrap();
        assert_eq!(ready.last_transition_time, t0);
        assert_eq!(ready.reason, "Degraded");

        status.set_condition(CONDITION_READY, ConditionStatus::True, "AllMembersHealthy", "", t1);
        assert_eq!(status.condition(CONDITION_READY).unwrap().last_transition_time, t1);
        assert_eq!(status.conditions.len(), 1);
    }

    #[test]
    fn test_remove_condition() {
        let mut status = GlobalObjectStatus::default();
        status.set_condition(
            CONDITION_RECONCILE_ERROR,
            ConditionStatus::True,
            "InvalidSpec",
            "",
            Utc::now(),
        );
        assert!(status.remove_condition(CONDITION_RECONCILE_ERROR));
        assert!(!status.remove_condition(CONDITION_RECONCILE_ERROR));
    }

    #[test]
    fn test_object_is_tagged_by_kind() {
        let yaml = r"
kind: GlobalObject
apiVersion: k8s.v6d.io/v1alpha1
metadata:
  name: obj-1
  namespace: vineyard-system
spec:
  id: o8000000000000001
  typename: vineyard::DataFrame
  members: [o0001, o0002]
";
        let object: Object = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(object.kind(), ResourceKind::GlobalObject);
        assert_eq!(object.key(), ObjectKey::new("vineyard-system", "obj-1"));
        let global = GlobalObject::from_object(object).unwrap();
        assert_eq!(global.spec.members, vec!["o0001", "o0002"]);
        assert_eq!(global.phase(), Phase::Pending);
    }

    #[test]
    fn test_same_spec_across_kinds_is_false() {
        let global = Object::from(GlobalObject::new("default", "a", GlobalObjectSpec::new("o1")));
        let local = Object::from(shard("a", "o1"));
        assert!(!global.same_spec(&local));
        assert!(global.same_spec(&global.clone()));
    }
}
