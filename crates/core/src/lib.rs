//! Core types for the GlobalObject controller.
//!
//! - **Resources**: [`GlobalObject`], [`LocalObject`] and the kind-tagged [`Object`]
//! - **Identity**: [`ObjectKey`] (`namespace/name`) and [`ObjectMeta`]
//! - **Errors**: one [`Error`] taxonomy whose variants map to queue behaviour
//! - **Utilities**: [`ExponentialBackoff`], [`Selector`] and the stop signal

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod backoff;
pub mod error;
pub mod meta;
pub mod resource;
pub mod result;
pub mod selector;
pub mod serde_duration;
pub mod signal;

pub use backoff::ExponentialBackoff;
pub use error::Error;
pub use meta::{DEFAULT_NAMESPACE, ObjectKey, ObjectMeta, OwnerReference};
pub use resource::{
    API_VERSION, CONDITION_READY, CONDITION_RECONCILE_ERROR, Condition, ConditionStatus,
    GlobalObject, GlobalObjectSpec, GlobalObjectStatus, LocalObject, LocalObjectSpec,
    LocalObjectStatus, Object, Phase, Resource, ResourceKind,
};
pub use result::{OptionExt, Result, ResultExt};
pub use selector::Selector;
pub use signal::{StopSignal, Stopper, stop_channel};
