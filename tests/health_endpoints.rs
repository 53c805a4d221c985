//! Health endpoint tests driven through the router with `tower::ServiceExt`.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use globalobject_controller::health::{self, Readiness};
use gobj_store::{InMemoryBackend, StateStore};
use http_body_util::BodyExt;
use tower::ServiceExt;

async fn get(router: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = router
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

/// Given a controller that has not synced yet
/// When /healthz is requested
/// Then it answers ok with the package version
#[tokio::test]
async fn test_healthz_reports_version() {
    let readiness: Arc<dyn Readiness> = Arc::new(AtomicBool::new(false));
    let (status, body) = get(health::router(readiness), "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

/// Given a readiness flag
/// When it flips from false to true
/// Then /readyz moves from 503 to 200
#[tokio::test]
async fn test_readyz_follows_readiness() {
    let flag = Arc::new(AtomicBool::new(false));
    let router = health::router(Arc::clone(&flag) as Arc<dyn Readiness>);

    let (status, body) = get(router.clone(), "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "not-ready");

    flag.store(true, Ordering::SeqCst);
    let (status, body) = get(router, "/readyz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
}

/// Given a connected state store
/// When /readyz is requested
/// Then the store reports ready
#[tokio::test]
async fn test_synced_store_is_ready() {
    let store = StateStore::connect(InMemoryBackend::new_arc()).await.unwrap();
    let router = health::router(Arc::clone(&store) as Arc<dyn Readiness>);
    let (status, _) = get(router, "/readyz").await;

    assert_eq!(status, StatusCode::OK);
    store.shutdown().await;
}

#[tokio::test]
async fn test_unknown_path_is_not_found() {
    let readiness: Arc<dyn Readiness> = Arc::new(AtomicBool::new(true));
    let response = health::router(readiness)
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
