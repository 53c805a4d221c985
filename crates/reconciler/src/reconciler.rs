//! GlobalObject reconciler.
//!
//! One pass for one key:
//!
//! 1. Read the GlobalObject from the state store; absent means done.
//! 2. Deleting: run the finalizer hook, then release the controller finalizer.
//! 3. Make sure the controller finalizer is present.
//! 4. Reject structurally invalid specs with a `ReconcileError` condition.
//! 5. Aggregate the health of every LocalObject that references it.
//! 6. Write the status only when it differs from the recorded one.
//!
//! A version conflict anywhere in the pass re-reads the GlobalObject from
//! the backend into the store, then asks for an immediate requeue; the next
//! pass starts from that fresh version even while the watch is down. An
//! object vanishing mid-pass ends the pass quietly.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use gobj_core::{
    CONDITION_READY, CONDITION_RECONCILE_ERROR, ConditionStatus, Error, GlobalObject,
    GlobalObjectStatus, ObjectKey, OptionExt, Phase, Resource, Result, ResultExt,
};
use gobj_store::{StateBackend, StateStore};
use tracing::{debug, info, warn};

use crate::config::{ControllerConfig, DEFAULT_FINALIZER};
use crate::context::Context;
use crate::finalizer::{FinalizerHook, LogOnlyFinalizer};
use crate::policy::{AggregationPolicy, AllHealthy};

/// What the worker should do with the key after a reconcile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Action {
    /// Re-add the key after this delay. `None` waits for the next change.
    pub requeue_after: Option<Duration>,
}

impl Action {
    /// Converged; wait for the next change.
    pub const fn await_change() -> Self {
        Self {
            requeue_after: None,
        }
    }

    /// Reconcile again after `delay`.
    pub const fn requeue(delay: Duration) -> Self {
        Self {
            requeue_after: Some(delay),
        }
    }

    /// Reconcile again right away, without a backoff penalty.
    pub const fn requeue_now() -> Self {
        Self::requeue(Duration::ZERO)
    }
}

/// Something that can reconcile a key.
#[async_trait]
pub trait Reconcile: Send + Sync {
    /// Bring the object behind `key` to its desired state.
    async fn reconcile(&self, key: &ObjectKey, ctx: &Context) -> Result<Action>;
}

/// Settings the reconciler needs from [`ControllerConfig`].
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub finalizer: String,
    pub pending_requeue: Duration,
    pub fatal_requeue: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            finalizer: DEFAULT_FINALIZER.to_string(),
            pending_requeue: Duration::from_secs(10),
            fatal_requeue: Duration::from_secs(300),
        }
    }
}

impl From<&ControllerConfig> for ReconcilerConfig {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            finalizer: config.finalizer.clone(),
            pending_requeue: config.pending_requeue,
            fatal_requeue: config.fatal_requeue,
        }
    }
}

/// Reconciler for GlobalObject status and finalizers.
pub struct Reconciler {
    store: Arc<StateStore>,
    backend: Arc<dyn StateBackend>,
    policy: Arc<dyn AggregationPolicy>,
    finalizer_hook: Arc<dyn FinalizerHook>,
    config: ReconcilerConfig,
}

impl Reconciler {
    /// Start building a reconciler.
    pub fn builder() -> ReconcilerBuilder {
        ReconcilerBuilder::new()
    }

    /// Get the configuration.
    pub const fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Name of the aggregation policy in use.
    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    async fn reconcile_global(&self, key: &ObjectKey, ctx: &Context) -> Result<Action> {
        let Some(global) = self
            .store
            .global(key)
            .await
            .tap_none(|| debug!(key = %key, "GlobalObject not found, nothing to do"))
        else {
            return Ok(Action::await_change());
        };

        if global.metadata.is_deleting() {
            return self.finalize(global, ctx).await;
        }

        let global = self.ensure_finalizer(global, ctx).await?;

        if let Err(e) = validate_spec(&global) {
            return self.record_fatal(global, &e, ctx).await;
        }

        let members = self.store.locals_owned_by(key).await;
        let aggregate = self.policy.aggregate(&global, &members);

        let mut desired = global.status.clone().unwrap_or_default();
        desired.phase = aggregate.phase;
        desired.ready_members = aggregate.ready;
        desired.observed_members = aggregate.observed;
        desired.expected_members = aggregate.expected;
        desired.observed_generation = global.metadata.generation;
        let ready = if aggregate.phase == Phase::Ready {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        };
        desired.set_condition(
            CONDITION_READY,
            ready,
            aggregate.reason,
            aggregate.message,
            Utc::now(),
        );
        desired.remove_condition(CONDITION_RECONCILE_ERROR);

        let previous = global.phase();
        self.write_status(global, desired, ctx).await?;
        if previous != aggregate.phase {
            info!(
                key = %key,
                from = %previous,
                to = %aggregate.phase,
                ready = aggregate.ready,
                observed = aggregate.observed,
                expected = aggregate.expected,
                "Phase changed"
            );
        }

        Ok(match aggregate.phase {
            Phase::Pending => Action::requeue(self.config.pending_requeue),
            Phase::Ready | Phase::Degraded => Action::await_change(),
        })
    }

    async fn finalize(&self, global: GlobalObject, ctx: &Context) -> Result<Action> {
        let key = global.metadata.key();
        if !global.metadata.has_finalizer(&self.config.finalizer) {
            debug!(key = %key, "Deleting without our finalizer, nothing to release");
            return Ok(Action::await_change());
        }

        let members = self.store.locals_owned_by(&key).await;
        self.finalizer_hook.cleanup(&global, &members, ctx).await?;

        let mut released = global;
        released.metadata.remove_finalizer(&self.config.finalizer);
        let written = ctx
            .call("update", self.backend.update(released.into_object()))
            .await
            .ignore_not_found()?;
        match written {
            Some(written) => {
                self.store.observe(&written).await;
                info!(key = %key, members = members.len(), "Finalizer removed");
            }
            None => debug!(key = %key, "GlobalObject already gone after cleanup"),
        }
        Ok(Action::await_change())
    }

    async fn ensure_finalizer(&self, global: GlobalObject, ctx: &Context) -> Result<GlobalObject> {
        if global.metadata.has_finalizer(&self.config.finalizer) {
            return Ok(global);
        }

        let key = global.metadata.key();
        let mut next = global;
        next.metadata.add_finalizer(&self.config.finalizer);
        let written = ctx
            .call("update", self.backend.update(next.into_object()))
            .await?;
        self.store.observe(&written).await;
        debug!(key = %key, finalizer = %self.config.finalizer, "Finalizer added");

        GlobalObject::from_object(written).ok_or_else_lazy(|| {
            Error::malformed(format!("backend answered {key} with another kind"))
        })
    }

    /// Record an unreconcilable spec. The object is not ready while it stays invalid.
    async fn record_fatal(
        &self,
        global: GlobalObject,
        error: &Error,
        ctx: &Context,
    ) -> Result<Action> {
        let key = global.metadata.key();
        warn!(key = %key, error = %error, "GlobalObject cannot be reconciled");

        let now = Utc::now();
        let mut desired = global.status.clone().unwrap_or_default();
        desired.observed_generation = global.metadata.generation;
        if desired.phase == Phase::Ready {
            desired.phase = Phase::Degraded;
        }
        desired.set_condition(
            CONDITION_READY,
            ConditionStatus::False,
            "InvalidSpec",
            "spec must be fixed before members are aggregated",
            now,
        );
        desired.set_condition(
            CONDITION_RECONCILE_ERROR,
            ConditionStatus::True,
            "InvalidSpec",
            error.to_string(),
            now,
        );
        self.write_status(global, desired, ctx).await?;

        Ok(Action::requeue(self.config.fatal_requeue))
    }

    /// Write `desired` unless it equals the recorded status.
    async fn write_status(
        &self,
        global: GlobalObject,
        desired: GlobalObjectStatus,
        ctx: &Context,
    ) -> Result<()> {
        if global.status.as_ref() == Some(&desired) {
            return Ok(());
        }

        let key = global.metadata.key();
        let version = global.metadata.resource_version;
        let mut next = global;
        next.status = Some(desired);
        let written = ctx
            .call("update_status", self.backend.update_status(next.into_object()))
            .await?;
        self.store.observe(&written).await;
        debug!(
            key = %key,
            from_version = version,
            to_version = written.meta().resource_version,
            "Status written"
        );
        Ok(())
    }
}

impl Reconciler {
    /// Pull the latest GlobalObject from the backend into the store. The
    /// cache trails the backend while a watch is being re-established.
    async fn reread(&self, key: &ObjectKey, ctx: &Context) -> Result<Action> {
        let fresh = ctx
            .call("get", self.backend.get(GlobalObject::KIND, key))
            .await?;
        match fresh {
            Some(fresh) => {
                self.store.observe(&fresh).await;
                Ok(Action::requeue_now())
            }
            None => {
                debug!(key = %key, "GlobalObject vanished while resolving a conflict");
                Ok(Action::await_change())
            }
        }
    }
}

#[async_trait]
impl Reconcile for Reconciler {
    async fn reconcile(&self, key: &ObjectKey, ctx: &Context) -> Result<Action> {
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }

        match self.reconcile_global(key, ctx).await {
            Err(e) if e.is_conflict() => {
                debug!(key = %key, error = %e, "Lost a write race, re-reading");
                self.reread(key, ctx).await
            }
            Err(e) if e.is_not_found() => {
                debug!(key = %key, "GlobalObject vanished mid-reconcile");
                Ok(Action::await_change())
            }
            outcome => outcome,
        }
    }
}

/// Member ids must be non-empty and unique.
fn validate_spec(global: &GlobalObject) -> Result<()> {
    let mut seen = HashSet::with_capacity(global.spec.members.len());
    for member in &global.spec.members {
        if member.trim().is_empty() {
            return Err(Error::fatal(
                GlobalObject::KIND,
                global.metadata.key(),
                "member ids must not be empty",
            ));
        }
        if !seen.insert(member.as_str()) {
            return Err(Error::fatal(
                GlobalObject::KIND,
                global.metadata.key(),
                format!("member id '{member}' is listed more than once"),
            ));
        }
    }
    Ok(())
}

/// Builder for Reconciler.
pub struct ReconcilerBuilder {
    store: Option<Arc<StateStore>>,
    policy: Option<Arc<dyn AggregationPolicy>>,
    finalizer_hook: Option<Arc<dyn FinalizerHook>>,
    config: ReconcilerConfig,
}

impl ReconcilerBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            store: None,
            policy: None,
            finalizer_hook: None,
            config: ReconcilerConfig::default(),
        }
    }

    /// Set the state store to read from.
    #[must_use]
    pub fn with_store(mut self, store: Arc<StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the aggregation policy.
    #[must_use]
    pub fn with_policy(mut self, policy: Arc<dyn AggregationPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Set the finalizer hook.
    #[must_use]
    pub fn with_finalizer_hook(mut self, hook: Arc<dyn FinalizerHook>) -> Self {
        self.finalizer_hook = Some(hook);
        self
    }

    /// Set the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the reconciler.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if no state store was given.
    pub fn build(self) -> Result<Reconciler> {
        let store = self
            .store
            .ok_or_else_lazy(|| Error::invalid_config("state store is required"))?;
        let backend = store.backend();

        Ok(Reconciler {
            store,
            backend,
            policy: self.policy.unwrap_or_else(|| Arc::new(AllHealthy)),
            finalizer_hook: self.finalizer_hook.unwrap_or_else(|| Arc::new(LogOnlyFinalizer)),
            config: self.config,
        })
    }
}

impl Default for ReconcilerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use gobj_core::GlobalObjectSpec;
    use gobj_store::InMemoryBackend;

    fn spec_with(members: &[&str]) -> GlobalObject {
        GlobalObject::new(
            "default",
            "obj-1",
            GlobalObjectSpec::new("o8000").with_members(members.iter().copied()),
        )
    }

    #[test]
    fn test_validate_spec_rejects_duplicates_and_blanks() {
        assert!(validate_spec(&spec_with(&["o1", "o2"])).is_ok());
        assert!(validate_spec(&spec_with(&[])).is_ok());
        assert!(matches!(validate_spec(&spec_with(&["o1", "o1"])), Err(Error::Fatal { .. })));
        assert!(matches!(validate_spec(&spec_with(&["o1", " "])), Err(Error::Fatal { .. })));
    }

    #[test]
    fn test_action_constructors() {
        assert_eq!(Action::await_change().requeue_after, None);
        assert_eq!(Action::requeue_now().requeue_after, Some(Duration::ZERO));
        assert_eq!(Action::default(), Action::await_change());
    }

    #[test]
    fn test_builder_requires_store() {
        let result = ReconcilerBuilder::new().build();
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[tokio::test]
    async fn test_builder_defaults() {
        let store = StateStore::connect(InMemoryBackend::new_arc()).await.unwrap();
        let reconciler = Reconciler::builder().with_store(Arc::clone(&store)).build().unwrap();
        assert_eq!(reconciler.policy_name(), "all-healthy");
        assert_eq!(reconciler.config().finalizer, DEFAULT_FINALIZER);
        store.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_key_is_success_without_requeue() {
        let store = StateStore::connect(InMemoryBackend::new_arc()).await.unwrap();
        let reconciler = Reconciler::builder().with_store(Arc::clone(&store)).build().unwrap();

        let action = reconciler
            .reconcile(&ObjectKey::new("default", "ghost"), &Context::detached())
            .await
            .unwrap();
        assert_eq!(action, Action::await_change());
        store.shutdown().await;
    }
}
