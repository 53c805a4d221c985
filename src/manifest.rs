//! Seeding the backend from YAML manifests.
//!
//! A manifest file holds any number of `---`-separated GlobalObject and
//! LocalObject documents, tagged by `kind` as in Kubernetes.

use std::path::Path;

use anyhow::{Context, Result};
use gobj_core::Object;
use gobj_store::InMemoryBackend;
use serde::Deserialize;
use tracing::{info, warn};

/// Parse every non-empty document of a multi-document YAML string.
///
/// # Errors
///
/// Fails on the first document that is not a GlobalObject or LocalObject.
pub fn parse_manifests(input: &str) -> Result<Vec<Object>> {
    let mut objects = Vec::new();
    for (index, document) in serde_yaml::Deserializer::from_str(input).enumerate() {
        let value = serde_yaml::Value::deserialize(document)
            .with_context(|| format!("document {} is not valid YAML", index + 1))?;
        if value.is_null() {
            continue;
        }
        let object: Object = serde_yaml::from_value(value).with_context(|| {
            format!("document {} is not a GlobalObject or LocalObject", index + 1)
        })?;
        objects.push(object);
    }
    Ok(objects)
}

/// Read and parse a manifest file.
///
/// # Errors
///
/// Fails if the file cannot be read or parsed.
pub fn load_manifests(path: &Path) -> Result<Vec<Object>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read manifests from {}", path.display()))?;
    parse_manifests(&content).with_context(|| format!("invalid manifests in {}", path.display()))
}

/// Create every object in the backend. Existing objects are left alone.
///
/// # Errors
///
/// Fails on any backend error other than `AlreadyExists`.
pub async fn seed(backend: &InMemoryBackend, objects: Vec<Object>) -> Result<usize> {
    let mut created = 0;
    for object in objects {
        let kind = object.kind();
        let key = object.key();
        match backend.create(object).await {
            Ok(_) => created += 1,
            Err(gobj_core::Error::AlreadyExists { .. }) => {
                warn!(kind = %kind, key = %key, "Manifest object already exists, skipping");
            }
            Err(e) => return Err(e).with_context(|| format!("failed to create {kind} {key}")),
        }
    }
    info!(created, "Seeded backend from manifests");
    Ok(created)
}
