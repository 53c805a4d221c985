//! CLI command definitions using clap.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// GlobalObject controller
#[derive(Parser, Debug)]
#[command(name = "globalobject-controller")]
#[command(version)]
#[command(about = "Keeps GlobalObject resources in sync with their node-local shards")]
#[command(
    long_about = "Watches GlobalObject and LocalObject resources, aggregates shard health \
                  into each GlobalObject's status, and holds a finalizer on every \
                  GlobalObject until its cleanup has run."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the controller until interrupted
    Run {
        /// Configuration file (TOML, or JSON with a .json extension)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// YAML manifests of GlobalObjects and LocalObjects to seed the backend with
        #[arg(short, long)]
        manifests: Option<PathBuf>,

        /// Number of reconcile workers
        #[arg(short, long)]
        workers: Option<usize>,

        /// Address of the health server
        #[arg(long)]
        health_addr: Option<SocketAddr>,
    },

    /// Validate a configuration file and print the effective configuration
    CheckConfig {
        /// Configuration file to check
        #[arg(short, long)]
        config: PathBuf,
    },
}
