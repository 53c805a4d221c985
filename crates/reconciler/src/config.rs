//! Controller configuration.
//!
//! Loaded from a TOML (or `.json`) file, then overridden by `GOBJ_*`
//! environment variables, then validated.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use gobj_core::serde_duration;
use gobj_core::{Error, ExponentialBackoff, Result};
use serde::{Deserialize, Serialize};

use crate::policy::AggregationConfig;

/// Finalizer the controller places on every GlobalObject it manages.
pub const DEFAULT_FINALIZER: &str = "k8s.v6d.io/globalobject";

/// Configuration for the controller and its reconciler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Number of concurrent reconcile workers.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Requeue delay while a GlobalObject is still `Pending`.
    #[serde(with = "serde_duration::secs", default = "default_pending_requeue")]
    pub pending_requeue: Duration,

    /// Requeue delay for a GlobalObject with an invalid spec.
    #[serde(with = "serde_duration::secs", default = "default_fatal_requeue")]
    pub fatal_requeue: Duration,

    /// Period of the full resync. Zero disables it.
    #[serde(with = "serde_duration::secs", default)]
    pub resync_period: Duration,

    /// Deadline for a single backend call.
    #[serde(with = "serde_duration::secs", default = "default_request_timeout")]
    pub request_timeout: Duration,

    /// Rate-limited requeue backoff.
    #[serde(default)]
    pub backoff: ExponentialBackoff,

    /// How member health is folded into the GlobalObject phase.
    #[serde(default)]
    pub aggregation: AggregationConfig,

    #[serde(default = "default_finalizer")]
    pub finalizer: String,

    /// Address of the health server.
    #[serde(default = "default_health_addr")]
    pub health_addr: SocketAddr,

    /// Default tracing filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            pending_requeue: default_pending_requeue(),
            fatal_requeue: default_fatal_requeue(),
            resync_period: Duration::ZERO,
            request_timeout: default_request_timeout(),
            backoff: ExponentialBackoff::default(),
            aggregation: AggregationConfig::default(),
            finalizer: default_finalizer(),
            health_addr: default_health_addr(),
            log_level: default_log_level(),
        }
    }
}

impl ControllerConfig {
    /// Set the worker count.
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the pending requeue delay.
    #[must_use]
    pub const fn with_pending_requeue(mut self, delay: Duration) -> Self {
        self.pending_requeue = delay;
        self
    }

    /// Set the fatal requeue delay.
    #[must_use]
    pub const fn with_fatal_requeue(mut self, delay: Duration) -> Self {
        self.fatal_requeue = delay;
        self
    }

    /// Set the resync period.
    #[must_use]
    pub const fn with_resync_period(mut self, period: Duration) -> Self {
        self.resync_period = period;
        self
    }

    /// Set the per-call deadline.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the requeue backoff.
    #[must_use]
    pub const fn with_backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the aggregation policy.
    #[must_use]
    pub const fn with_aggregation(mut self, aggregation: AggregationConfig) -> Self {
        self.aggregation = aggregation;
        self
    }

    /// Set the health server address.
    #[must_use]
    pub const fn with_health_addr(mut self, addr: SocketAddr) -> Self {
        self.health_addr = addr;
        self
    }

    /// Resync period, if enabled.
    pub fn resync(&self) -> Option<Duration> {
        (!self.resync_period.is_zero()).then_some(self.resync_period)
    }

    /// Load configuration from a file. `.json` files are parsed as JSON,
    /// anything else as TOML.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::invalid_config(format!("failed to read {}: {e}", path.display()))
        })?;

        if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&content).map_err(|e| {
                Error::invalid_config(format!("failed to parse {}: {e}", path.display()))
            })
        } else {
            toml::from_str(&content).map_err(|e| {
                Error::invalid_config(format!("failed to parse {}: {e}", path.display()))
            })
        }
    }

    /// Defaults overridden by the process environment.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if a variable is set but unparsable.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides(|name| std::env::var(name).ok())
    }

    /// Apply `GOBJ_WORKERS`, `GOBJ_LOG_LEVEL` and `GOBJ_HEALTH_ADDR` as
    /// returned by `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if a variable is set but unparsable.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(workers) = lookup("GOBJ_WORKERS") {
            self.workers = workers
                .trim()
                .parse()
                .map_err(|e| Error::invalid_config(format!("GOBJ_WORKERS={workers}: {e}")))?;
        }

        if let Some(level) = lookup("GOBJ_LOG_LEVEL") {
            self.log_level = level;
        }

        if let Some(addr) = lookup("GOBJ_HEALTH_ADDR") {
            self.health_addr = addr
                .trim()
                .parse()
                .map_err(|e| Error::invalid_config(format!("GOBJ_HEALTH_ADDR={addr}: {e}")))?;
        }

        Ok(self)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::invalid_config("workers must be at least 1"));
        }
        if self.pending_requeue.is_zero() {
            return Err(Error::invalid_config("pending_requeue must be positive"));
        }
        if self.fatal_requeue.is_zero() {
            return Err(Error::invalid_config("fatal_requeue must be positive"));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::invalid_config("request_timeout must be positive"));
        }
        if self.backoff.base_delay.is_zero() {
            return Err(Error::invalid_config("backoff.base_delay must be positive"));
        }
        if self.backoff.max_delay < self.backoff.base_delay {
            return Err(Error::invalid_config(
                "backoff.max_delay must not be below backoff.base_delay",
            ));
        }
        if !(0.0..=1.0).contains(&self.backoff.jitter) {
            return Err(Error::invalid_config("backoff.jitter must be within 0.0..=1.0"));
        }
        if let AggregationConfig::MinHealthy { count: 0 } = self.aggregation {
            return Err(Error::invalid_config("aggregation.count must be at least 1"));
        }
        if self.finalizer.is_empty() || !self.finalizer.contains('/') {
            return Err(Error::invalid_config(format!(
                "finalizer '{}' must be a domain-qualified name",
                self.finalizer
            )));
        }
        Ok(())
    }
}

const fn default_workers() -> usize {
    2
}

const fn default_pending_requeue() -> Duration {
    Duration::from_secs(10)
}

const fn default_fatal_requeue() -> Duration {
    Duration::from_secs(300)
}

const fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_finalizer() -> String {
    DEFAULT_FINALIZER.to_string()
}

fn default_health_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8081))
}

fn default_log_level() -> String {
    "info".to_string()
}
