//! Scoped context acquisition.

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use crate::error::Result;
use crate::script::ExecutionContext;

use super::ContextManager;

/// A context borrowed from a manager for the length of one scope.
///
/// Dropping the lease returns the context, including during unwinding,
/// so a callback can never leak a checked-out context.
///
/// # Example
///
/// ```
/// use hookfs_core::{
///     ContextLease, ContextManager, LuaContextFactory, PoolConfig, PooledContextManager, ScriptSource,
/// };
///
/// let factory = LuaContextFactory::new(ScriptSource::new("return {}", "doc.lua"));
/// let pool = PooledContextManager::new(PoolConfig::new(1, 2, 1), factory).unwrap();
///
/// {
///     let lease = ContextLease::acquire(&pool).unwrap();
///     lease.lua().globals().set("seen", true).unwrap();
/// }
///
/// assert_eq!(pool.stats().active, 0);
/// ```
pub struct ContextLease<'a> {
    manager: &'a dyn ContextManager,
    context: Option<ExecutionContext>,
}

impl<'a> ContextLease<'a> {
    /// Open a context, blocking until one is available.
    pub fn acquire(manager: &'a dyn ContextManager) -> Result<Self> {
        let context = manager.open()?;
        Ok(Self {
            manager,
            context: Some(context),
        })
    }

    /// Open a context, giving up after `timeout`.
    pub fn acquire_timeout(manager: &'a dyn ContextManager, timeout: Duration) -> Result<Self> {
        let context = manager.open_timeout(timeout)?;
        Ok(Self {
            manager,
            context: Some(context),
        })
    }

    /// Return the context now and report any error from the manager.
    pub fn release(mut self) -> Result<()> {
        match self.context.take() {
            Some(context) => self.manager.close(context),
            None => Ok(()),
        }
    }
}

impl Deref for ContextLease<'_> {
    type Target = ExecutionContext;

    fn deref(&self) -> &ExecutionContext {
        // Only `release` and `drop` take the context, and both consume the lease.
        self.context.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for ContextLease<'_> {
    fn deref_mut(&mut self) -> &mut ExecutionContext {
        self.context.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for ContextLease<'_> {
    fn drop(&mut self) {
        if let Some(context) = self.context.take() {
            if let Err(e) = self.manager.close(context) {
                tracing::error!("Failed to return leased context: {}", e);
            }
        }
    }
}
