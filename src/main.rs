//! # globalobject-controller
//!
//! Entry point. Parses the command line, initializes tracing, then either
//! runs the controller until Ctrl+C or checks a configuration file.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use anyhow::{Context, Result};
use clap::Parser;
use globalobject_controller::app;
use globalobject_controller::cli::{Cli, Commands};
use gobj_core::stop_channel;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            manifests,
            workers,
            health_addr,
        } => {
            let mut config = app::load_config(config.as_deref(), |name| std::env::var(name).ok())?;
            if let Some(workers) = workers {
                config = config.with_workers(workers);
            }
            if let Some(addr) = health_addr {
                config = config.with_health_addr(addr);
            }
            config.validate().context("invalid command line override")?;

            init_tracing(&config.log_level);
            info!("GlobalObject controller starting...");

            let (stopper, shutdown) = stop_channel();
            tokio::spawn(async move {
                wait_for_shutdown().await;
                stopper.stop();
            });

            app::run(config, manifests, shutdown).await
        }
        Commands::CheckConfig { config: path } => {
            let config = app::load_config(Some(&path), |name| std::env::var(name).ok())?;
            let rendered = if path.extension().is_some_and(|e| e == "json") {
                serde_json::to_string_pretty(&config).context("failed to render config")?
            } else {
                toml::to_string_pretty(&config).context("failed to render config")?
            };
            println!("{rendered}");
            Ok(())
        }
    }
}

/// Initialize tracing. `RUST_LOG` wins over the configured level.
fn init_tracing(default_level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for shutdown signal (Ctrl+C).
async fn wait_for_shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
        Err(err) => error!("Failed to listen for shutdown signal: {}", err),
    }
}
