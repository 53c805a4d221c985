//! Cleanup run before a GlobalObject's finalizer is released.

use async_trait::async_trait;
use gobj_core::{GlobalObject, LocalObject, Result};
use tracing::info;

use crate::context::Context;

/// Work to do while a deleting GlobalObject still exists.
///
/// The controller removes its finalizer only after `cleanup` succeeds; an
/// error keeps the object around and the key is retried with backoff.
#[async_trait]
pub trait FinalizerHook: Send + Sync {
    /// Release whatever the GlobalObject holds.
    async fn cleanup(
        &self,
        global: &GlobalObject,
        members: &[LocalObject],
        ctx: &Context,
    ) -> Result<()>;
}

/// Hook that only records the release.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOnlyFinalizer;

#[async_trait]
impl FinalizerHook for LogOnlyFinalizer {
    async fn cleanup(
        &self,
        global: &GlobalObject,
        members: &[LocalObject],
        _ctx: &Context,
    ) -> Result<()> {
        info!(
            key = %global.metadata.key(),
            id = %global.spec.id,
            members = members.len(),
            "Releasing GlobalObject"
        );
        Ok(())
    }
}
