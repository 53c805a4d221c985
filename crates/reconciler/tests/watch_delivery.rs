//! Reconciles that read the watch-fed cache as it is, without relisting.
//!
//! Each test lets the reflectors deliver changes (or withholds them) and
//! replays stale and duplicate payloads, the way a flaky watch would.

#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use gobj_core::{
    DEFAULT_NAMESPACE, Error, ExponentialBackoff, GlobalObject, GlobalObjectSpec, LocalObject,
    LocalObjectSpec, Object, ObjectKey, Phase, ResourceKind,
};
use gobj_reconciler::{
    Action, Context, DEFAULT_FINALIZER, Reconcile, Reconciler, ReconcilerConfig,
};
use gobj_store::{BackendOp, InMemoryBackend, StateStore, WatchEvent, WatchEventType};

fn key() -> ObjectKey {
    ObjectKey::new(DEFAULT_NAMESPACE, "obj-1")
}

fn global(members: &[&str]) -> GlobalObject {
    GlobalObject::new(
        DEFAULT_NAMESPACE,
        "obj-1",
        GlobalObjectSpec::new("o8000000000000001").with_members(members.iter().copied()),
    )
}

fn shard(id: &str, healthy: bool) -> LocalObject {
    LocalObject::new(
        DEFAULT_NAMESPACE,
        format!("obj-1-{id}"),
        LocalObjectSpec {
            id: id.to_string(),
            ..LocalObjectSpec::default()
        },
    )
    .owned_by("obj-1")
    .with_health(healthy)
}

/// Keeps a broken watch down for the whole test.
fn slow_reconnect() -> ExponentialBackoff {
    ExponentialBackoff::new(Duration::from_secs(3600), Duration::from_secs(3600))
}

/// Redeliver `object` as a MODIFIED payload on its kind's watch.
fn replay(backend: &InMemoryBackend, object: &Object) {
    let event = WatchEvent::new(WatchEventType::Modified, object.clone());
    backend.inject_raw(object.kind(), serde_json::to_value(&event).unwrap());
}

/// Wait until the LocalObject watch has delivered everything sent so far.
///
/// Writes a marker shard behind all earlier deliveries and waits for it to
/// reach the cache; the LocalObject watch is ordered.
async fn settle(backend: &InMemoryBackend, store: &StateStore) {
    let owner = ObjectKey::new(DEFAULT_NAMESPACE, "watch-marker-owner");
    let marker = LocalObject::new(
        DEFAULT_NAMESPACE,
        "watch-marker",
        LocalObjectSpec {
            id: "marker".to_string(),
            ..LocalObjectSpec::default()
        },
    )
    .owned_by(owner.name.clone());
    let version = backend.upsert(marker).await.unwrap().meta().resource_version;

    for _ in 0..2000 {
        let seen = store
            .locals_owned_by(&owner)
            .await
            .iter()
            .any(|m| m.metadata.resource_version == version);
        if seen {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("watch did not deliver the marker");
}

/// Given a store whose watches broke and stay down
/// When the GlobalObject changes behind the cache and a reconcile conflicts
/// Then the conflict re-reads the object so the next pass makes progress
#[tokio::test]
async fn test_conflict_rereads_while_watch_is_down() {
    let backend = InMemoryBackend::new_arc();
    backend.create(global(&["o1"])).await.unwrap();
    let store = StateStore::connect_with_backoff(backend.clone(), slow_reconnect())
        .await
        .unwrap();
    let reconciler = Reconciler::builder().with_store(Arc::clone(&store)).build().unwrap();
    let ctx = Context::detached();

    backend.disconnect_watches();
    let mut labelled: GlobalObject = backend.fetch(&key()).await.unwrap();
    labelled
        .metadata
        .labels
        .insert("team".to_string(), "storage".to_string());
    let labelled = backend.upsert(labelled).await.unwrap();
    assert!(
        store.global(&key()).await.unwrap().metadata.resource_version
            < labelled.meta().resource_version
    );

    let first = reconciler.reconcile(&key(), &ctx).await.unwrap();
    assert_eq!(first, Action::requeue_now());
    let cached = store.global(&key()).await.unwrap();
    assert_eq!(cached.metadata.resource_version, labelled.meta().resource_version);

    let second = reconciler.reconcile(&key(), &ctx).await.unwrap();
    assert_eq!(second, Action::requeue(ReconcilerConfig::default().pending_requeue));
    let current: GlobalObject = backend.fetch(&key()).await.unwrap();
    assert!(current.metadata.has_finalizer(DEFAULT_FINALIZER));
    assert_eq!(current.phase(), Phase::Pending);
    assert_eq!(current.metadata.labels.get("team").map(String::as_str), Some("storage"));

    store.shutdown().await;
}

/// Given a conflict for an object that was deleted meanwhile
/// When the reconcile re-reads it
/// Then the pass ends without a requeue
#[tokio::test]
async fn test_conflict_on_vanished_object_awaits_change() {
    let backend = InMemoryBackend::new_arc();
    backend.create(global(&["o1"])).await.unwrap();
    let store = StateStore::connect_with_backoff(backend.clone(), slow_reconnect())
        .await
        .unwrap();
    let reconciler = Reconciler::builder().with_store(Arc::clone(&store)).build().unwrap();

    backend.disconnect_watches();
    backend.delete(ResourceKind::GlobalObject, &key()).await.unwrap();
    backend.inject_fault(
        BackendOp::Update,
        Error::version_conflict(ResourceKind::GlobalObject, key(), 1, 2),
    );
    assert!(store.global(&key()).await.is_some());

    let action = reconciler.reconcile(&key(), &Context::detached()).await.unwrap();
    assert_eq!(action, Action::await_change());

    store.shutdown().await;
}

/// Given shards whose events arrive duplicated and out of order
/// When obj-1 is reconciled from the watch-fed cache
/// Then stale payloads never roll the cache back and the phase follows the
/// latest state
#[tokio::test]
async fn test_stale_and_duplicate_events_do_not_change_the_outcome() {
    let backend = InMemoryBackend::new_arc();
    backend.create(global(&["o1", "o2"])).await.unwrap();
    let store = StateStore::connect(backend.clone()).await.unwrap();
    let reconciler = Reconciler::builder().with_store(Arc::clone(&store)).build().unwrap();
    let ctx = Context::detached();

    let o1_healthy = backend.create(shard("o1", true)).await.unwrap();
    let o2_healthy = backend.create(shard("o2", true)).await.unwrap();
    let o2_unhealthy = backend.upsert(shard("o2", false)).await.unwrap();
    let o1_key = o1_healthy.key();
    backend.delete(ResourceKind::LocalObject, &o1_key).await.unwrap();

    replay(&backend, &o2_healthy);
    replay(&backend, &o2_unhealthy);
    replay(&backend, &o1_healthy);
    settle(&backend, &store).await;

    reconciler.reconcile(&key(), &ctx).await.unwrap();
    let current: GlobalObject = backend.fetch(&key()).await.unwrap();
    let status = current.status.clone().unwrap();
    assert_eq!(status.phase, Phase::Degraded);
    assert_eq!(status.observed_members, 1);
    assert_eq!(status.ready_members, 0);

    let o1_back = backend.create(shard("o1", true)).await.unwrap();
    backend.upsert(shard("o2", true)).await.unwrap();
    replay(&backend, &o2_unhealthy);
    replay(&backend, &o1_back);
    settle(&backend, &store).await;

    assert_eq!(reconciler.reconcile(&key(), &ctx).await.unwrap(), Action::await_change());
    let current: GlobalObject = backend.fetch(&key()).await.unwrap();
    assert_eq!(current.phase(), Phase::Ready);

    store.shutdown().await;
}
