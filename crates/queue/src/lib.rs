//! Work queue for controller reconcile requests.
//!
//! [`WorkQueue`] collapses duplicate keys, hands each key to at most one
//! worker at a time, and supports delayed and rate-limited re-adds driven by
//! [`RateLimiter`].

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod queue;
pub mod rate_limiter;

pub use queue::WorkQueue;
pub use rate_limiter::RateLimiter;
