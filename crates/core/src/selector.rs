//! Selectors for listing resources.

use crate::meta::{ObjectKey, ObjectMeta};
use crate::resource::ResourceKind;

/// Filter applied by `list` calls. An empty selector matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    owner: Option<(ResourceKind, ObjectKey)>,
}

impl Selector {
    /// Match every resource.
    pub fn all() -> Self {
        Self::default()
    }

    /// Match resources owned by `key` of the given kind (same namespace, owner name).
    pub fn owned_by(kind: ResourceKind, key: &ObjectKey) -> Self {
        Self {
            owner: Some((kind, key.clone())),
        }
    }

    /// Whether the metadata satisfies the selector.
    pub fn matches(&self, meta: &ObjectMeta) -> bool {
        self.owner.as_ref().is_none_or(|(kind, key)| {
            meta.namespace == key.namespace
                && meta
                    .owner_references
                    .iter()
                    .any(|r| r.kind == *kind && r.name == key.name)
        })
    }
}
