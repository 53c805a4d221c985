//! Health endpoints: GET /healthz, GET /readyz

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use gobj_core::StopSignal;
use gobj_store::StateStore;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Something that can tell whether the controller is ready to serve.
pub trait Readiness: Send + Sync {
    fn is_ready(&self) -> bool;
}

impl Readiness for StateStore {
    fn is_ready(&self) -> bool {
        self.is_synced()
    }
}

impl Readiness for AtomicBool {
    fn is_ready(&self) -> bool {
        self.load(Ordering::SeqCst)
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

impl HealthResponse {
    const fn new(status: &'static str) -> Self {
        Self {
            status,
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// GET /healthz - the process is up
async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse::new("ok"))
}

/// GET /readyz - the state store has synced
async fn readyz(State(readiness): State<Arc<dyn Readiness>>) -> (StatusCode, Json<HealthResponse>) {
    if readiness.is_ready() {
        (StatusCode::OK, Json(HealthResponse::new("ready")))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(HealthResponse::new("not-ready")))
    }
}

/// Build the health router.
pub fn router(readiness: Arc<dyn Readiness>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .layer(TraceLayer::new_for_http())
        .with_state(readiness)
}

/// Bind the health server address.
///
/// # Errors
///
/// Fails if the address cannot be bound.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind health server to {addr}"))?;
    info!(addr = %listener.local_addr().unwrap_or(addr), "Health server listening");
    Ok(listener)
}

/// Serve `router` on a bound `listener` until `shutdown` fires.
///
/// # Errors
///
/// Fails if the server errors.
pub async fn serve(listener: TcpListener, router: Router, shutdown: StopSignal) -> Result<()> {
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.stopped().await })
        .await
        .context("health server failed")
}
