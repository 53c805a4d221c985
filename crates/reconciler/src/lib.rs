//! K8s-style reconciliation of GlobalObject resources.
//!
//! A GlobalObject is a logical distributed object made of node-local
//! LocalObject shards. This crate keeps each GlobalObject's status in line
//! with the shards that reference it:
//!
//! - **Correlation**: store notifications are mapped to GlobalObject keys
//!   ([`EventCorrelator`], [`map_to_global`]) and pushed onto a work queue
//! - **Reconciliation**: a [`Reconciler`] pass aggregates shard health with
//!   an [`AggregationPolicy`] and writes the status when it changed
//! - **Deletion**: a finalizer keeps a deleting GlobalObject around until
//!   its [`FinalizerHook`] has run
//! - **Runtime**: a [`Controller`] runs a fixed pool of workers against the
//!   queue and shuts down cleanly on a [`StopSignal`](gobj_core::StopSignal)
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use gobj_core::stop_channel;
//! use gobj_reconciler::{Controller, ControllerConfig, Reconciler, ReconcilerConfig};
//! use gobj_store::{InMemoryBackend, StateStore};
//!
//! let config = ControllerConfig::default();
//! let store = StateStore::connect(InMemoryBackend::new_arc()).await?;
//! let reconciler = Reconciler::builder()
//!     .with_store(Arc::clone(&store))
//!     .with_policy(config.aggregation.build())
//!     .with_config(ReconcilerConfig::from(&config))
//!     .build()?;
//!
//! let (stopper, shutdown) = stop_channel();
//! Controller::new(store, Arc::new(reconciler), &config).run(shutdown).await;
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod config;
pub mod context;
pub mod controller;
pub mod correlator;
pub mod finalizer;
pub mod policy;
pub mod reconciler;

pub use gobj_core::{Error, Result};

pub use config::{ControllerConfig, DEFAULT_FINALIZER};
pub use context::Context;
pub use controller::{Controller, handle_outcome};
pub use correlator::{EventCorrelator, map_to_global};
pub use finalizer::{FinalizerHook, LogOnlyFinalizer};
pub use policy::{Aggregate, AggregationConfig, AggregationPolicy, AllHealthy, MinHealthy};
pub use reconciler::{Action, Reconcile, Reconciler, ReconcilerBuilder, ReconcilerConfig};
