//! State access for the GlobalObject controller.
//!
//! - [`StateBackend`]: the read/write/watch contract against cluster state
//! - [`InMemoryBackend`]: a faithful in-process backend with fault injection
//! - [`StateStore`]: a watch-fed cache the reconciler reads from

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod backend;
pub mod memory;
pub mod store;

pub use backend::{StateBackend, WatchEvent, WatchEventType, WatchStream};
pub use memory::{BackendOp, InMemoryBackend};
pub use store::{Notification, StateStore, StoreSubscription};
