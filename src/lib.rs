#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # globalobject-controller
//!
//! Process-level pieces of the controller binary: command line, config
//! loading, manifest seeding and the health server. The reconciliation
//! machinery lives in the `gobj-*` workspace crates, re-exported here.

pub use gobj_core;
pub use gobj_queue;
pub use gobj_reconciler;
pub use gobj_store;

pub mod app;
pub mod cli;
pub mod health;
pub mod manifest;
