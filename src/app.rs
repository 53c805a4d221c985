//! Process wiring: configuration loading and the controller run loop.
//!
//! ## Startup order
//!
//! 1. Health listener, bound before anything else so a taken port fails fast
//! 2. Backend, seeded from manifests when given
//! 3. State store, connected and synced
//! 4. Reconciler and controller, with the health server serving alongside
//!
//! Shutdown runs the other way round once the stop signal fires.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context as _, Result};
use gobj_core::StopSignal;
use gobj_reconciler::{Controller, ControllerConfig, Reconciler, ReconcilerConfig};
use gobj_store::{InMemoryBackend, StateStore};
use tracing::{error, info};

use crate::{health, manifest};

/// Build the effective configuration: file (or defaults), then environment
/// overrides from `lookup`, then validation.
///
/// # Errors
///
/// Fails if the file is unreadable, a variable is malformed or validation fails.
pub fn load_config<F>(path: Option<&Path>, lookup: F) -> Result<ControllerConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let base = match path {
        Some(path) => ControllerConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => ControllerConfig::default(),
    };
    let config = base
        .with_env_overrides(lookup)
        .context("invalid environment override")?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Run the controller until `shutdown` fires.
///
/// # Errors
///
/// Fails if the health address cannot be bound, the manifests cannot be
/// loaded, the store cannot sync, or the health server fails.
pub async fn run(
    config: ControllerConfig,
    manifests: Option<PathBuf>,
    shutdown: StopSignal,
) -> Result<()> {
    let start_time = Instant::now();

    let listener = health::bind(config.health_addr).await?;

    let backend = InMemoryBackend::new_arc();
    if let Some(path) = manifests {
        let objects = manifest::load_manifests(&path)?;
        manifest::seed(&backend, objects).await?;
    }

    let store = StateStore::connect_with_backoff(backend, config.backoff)
        .await
        .context("state store failed to sync")?;

    let reconciler = Reconciler::builder()
        .with_store(Arc::clone(&store))
        .with_policy(config.aggregation.build())
        .with_config(ReconcilerConfig::from(&config))
        .build()
        .context("failed to build reconciler")?;
    info!(policy = reconciler.policy_name(), "Reconciler initialized");

    let controller = Controller::new(Arc::clone(&store), Arc::new(reconciler), &config);

    let health_router = health::router(Arc::clone(&store) as Arc<dyn health::Readiness>);
    let health_task = tokio::spawn(health::serve(listener, health_router, shutdown.clone()));

    info!(
        workers = config.workers,
        elapsed = ?start_time.elapsed(),
        "Controller started"
    );
    controller.run(shutdown).await;

    let health = match health_task.await {
        Ok(outcome) => outcome,
        Err(e) => Err(anyhow::Error::new(e).context("health server task panicked")),
    };
    store.shutdown().await;

    match health {
        Ok(()) => {
            info!("Controller stopped gracefully");
            Ok(())
        }
        Err(e) => {
            error!(error = %format!("{e:#}"), "Health server stopped with an error");
            Err(e)
        }
    }
}
