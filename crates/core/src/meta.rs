//! Object identity and metadata.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::resource::ResourceKind;

/// Namespace used when a key or manifest does not name one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Cluster-unique `namespace/name` identifier of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    /// Namespace of the resource.
    pub namespace: String,
    /// Name of the resource.
    pub name: String,
}

impl ObjectKey {
    /// Create a key from namespace and name.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parse `namespace/name`, or a bare `name` in the default namespace.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` when a segment is empty or there are extra slashes.
    pub fn parse(input: &str) -> Result<Self, Error> {
        let mut parts = input.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), None, None) if !name.is_empty() => {
                Ok(Self::new(DEFAULT_NAMESPACE, name))
            }
            (Some(namespace), Some(name), None) if !namespace.is_empty() && !name.is_empty() => {
                Ok(Self::new(namespace, name))
            }
            _ => Err(Error::invalid_key(input, "expected 'namespace/name' or 'name'")),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for ObjectKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Reference from a dependent resource to the resource that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    /// API group/version of the owner.
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Kind of the owner.
    pub kind: ResourceKind,
    /// Name of the owner, in the dependent's namespace.
    pub name: String,
    /// UID of the owner, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    /// Whether the owner is the managing controller.
    #[serde(default)]
    pub controller: bool,
}

impl OwnerReference {
    /// Reference an owner of the given kind by name.
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            api_version: default_api_version(),
            kind,
            name: name.into(),
            uid: None,
            controller: true,
        }
    }
}

fn default_api_version() -> String {
    crate::resource::API_VERSION.to_string()
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

/// Metadata common to every resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Name, unique within the namespace.
    pub name: String,
    /// Namespace of the resource.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Backend-assigned unique id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    /// Backend-assigned version, bumped on every write.
    #[serde(default)]
    pub resource_version: u64,
    /// Bumped by the backend whenever the spec changes.
    #[serde(default)]
    pub generation: u64,
    /// Free-form labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Finalizers blocking deletion.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
    /// Owners of this resource.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
    /// Set by the backend when the resource was created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    /// Set by the backend when deletion was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    /// Create metadata for a new resource.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            uid: None,
            resource_version: 0,
            generation: 0,
            labels: BTreeMap::new(),
            finalizers: Vec::new(),
            owner_references: Vec::new(),
            creation_timestamp: None,
            deletion_timestamp: None,
        }
    }

    /// The `namespace/name` key of this resource.
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }

    /// Whether deletion has been requested.
    pub const fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    /// Whether the named finalizer is present.
    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    /// Add a finalizer. Returns `false` if it was already present.
    pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }
        self.finalizers.push(finalizer.to_string());
        true
    }

    /// Remove a finalizer. Returns `false` if it was not present.
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let before = self.finalizers.len();
        self.finalizers.retain(|f| f != finalizer);
        self.finalizers.len() != before
    }

    /// The first owner reference of the given kind.
    pub fn owner_of_kind(&self, kind: ResourceKind) -> Option<&OwnerReference> {
        self.owner_references.iter().find(|r| r.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_parse_namespaced_key() {
        let key = ObjectKey::parse("vineyard-system/obj-1").unwrap();
        assert_eq!(key, ObjectKey::new("vineyard-system", "obj-1"));
        assert_eq!(key.to_string(), "vineyard-system/obj-1");
    }

    #[test]
    fn test_parse_bare_name_uses_default_namespace() {
        let key: ObjectKey = "obj-1".parse().unwrap();
        assert_eq!(key.namespace, DEFAULT_NAMESPACE);
    }

    #[test]
    fn test_parse_rejects_malformed_keys() {
        for input in ["", "/", "a/", "/b", "a/b/c"] {
            assert!(ObjectKey::parse(input).is_err(), "{input} should not parse");
        }
    }

    #[test]
    fn test_finalizer_bookkeeping() {
        let mut meta = ObjectMeta::new("default", "obj-1");
        assert!(meta.add_finalizer("example.io/cleanup"));
        assert!(!meta.add_finalizer("example.io/cleanup"));
        assert!(meta.has_finalizer("example.io/cleanup"));
        assert!(meta.remove_finalizer("example.io/cleanup"));
        assert!(!meta.remove_finalizer("example.io/cleanup"));
        assert!(meta.finalizers.is_empty());
    }

    #[test]
    fn test_owner_of_kind() {
        let mut meta = ObjectMeta::new("default", "shard-0");
        meta.owner_references
            .push(OwnerReference::new(ResourceKind::GlobalObject, "obj-1"));
        let owner = meta.owner_of_kind(ResourceKind::GlobalObject).unwrap();
        assert_eq!(owner.name, "obj-1");
        assert!(meta.owner_of_kind(ResourceKind::LocalObject).is_none());
    }
}
