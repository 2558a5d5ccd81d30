//! Bounded pool of interchangeable execution contexts.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::script::{ContextFactory, ExecutionContext};

use super::{ContextManager, ManagerId, ManagerStats, check_owner, lock_error};

/// State guarded by the pool lock.
struct PoolState {
    /// Contexts checked out right now.
    active: usize,
    /// Returned contexts, reused front first.
    idle: VecDeque<ExecutionContext>,
    closed: bool,
}

/// Pool of Lua contexts with bounded concurrency and bounded retention.
///
/// - at most `max_active` contexts are checked out at once; further
///   `open()` calls block until one is returned
/// - returned contexts are kept for reuse while fewer than `max_idle` are
///   idle, otherwise destroyed
/// - new contexts are built outside the lock, after a slot has been reserved
///
/// `start_count` contexts are built eagerly and may exceed `max_idle`;
/// the idle list shrinks back as contexts cycle through `close()`.
pub struct PooledContextManager {
    id: ManagerId,
    config: PoolConfig,
    factory: Box<dyn ContextFactory>,
    state: Mutex<PoolState>,
    /// Signaled whenever a context or an active slot is released.
    available: Condvar,
    created: AtomicU64,
    destroyed: AtomicU64,
}

impl PooledContextManager {
    /// Validate `config` and build `start_count` contexts.
    ///
    /// Any construction failure aborts creation of the whole pool.
    pub fn new(config: PoolConfig, factory: impl ContextFactory + 'static) -> Result<Self> {
        config.validate()?;

        let id = ManagerId::next();
        let mut idle = VecDeque::with_capacity(config.start_count.max(config.max_idle));
        for _ in 0..config.start_count {
            let mut context = factory.create()?;
            context.bind(id);
            idle.push_back(context);
        }

        tracing::info!(
            "{} warmed up {} context(s) for '{}' (max_active={}, max_idle={})",
            id,
            idle.len(),
            factory.name(),
            config.max_active,
            config.max_idle
        );

        Ok(Self {
            id,
            config,
            factory: Box::new(factory),
            state: Mutex::new(PoolState {
                active: 0,
                idle,
                closed: false,
            }),
            available: Condvar::new(),
            created: AtomicU64::new(config.start_count as u64),
            destroyed: AtomicU64::new(0),
        })
    }

    /// Get the pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn id(&self) -> ManagerId {
        self.id
    }

    fn lock(&self) -> Result<MutexGuard<'_, PoolState>> {
        self.state.lock().map_err(lock_error)
    }

    /// Wait for capacity, reserve a slot, then hand out an idle context or
    /// build a new one.
    fn acquire(&self, deadline: Option<(Instant, Duration)>) -> Result<ExecutionContext> {
        let mut state = self.lock()?;
        loop {
            if state.closed {
                return Err(Error::ManagerClosed);
            }
            if !state.idle.is_empty() || state.active < self.config.max_active {
                break;
            }
            state = match deadline {
                None => self.available.wait(state).map_err(lock_error)?,
                Some((deadline, timeout)) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::Timeout(timeout));
                    }
                    self.available
                        .wait_timeout(state, deadline - now)
                        .map_err(lock_error)?
                        .0
                }
            };
        }

        state.active += 1;
        if let Some(context) = state.idle.pop_front() {
            tracing::trace!("{} lent idle {} (active={})", self.id, context.id(), state.active);
            return Ok(context);
        }
        drop(state);

        // Slot already reserved; build without holding the lock.
        match self.factory.create() {
            Ok(mut context) => {
                context.bind(self.id);
                self.created.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("{} grew by {}", self.id, context.id());
                Ok(context)
            }
            Err(e) => {
                tracing::warn!("{} failed to build a context: {}", self.id, e);
                self.release_slot();
                Err(e)
            }
        }
    }

    /// Give back a slot reserved by a failed construction.
    fn release_slot(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.active = state.active.saturating_sub(1);
        self.available.notify_one();
    }

    fn destroy(&self, context: ExecutionContext) {
        self.destroyed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("{} evicted {}", self.id, context.id());
        drop(context);
    }
}

impl ContextManager for PooledContextManager {
    fn open(&self) -> Result<ExecutionContext> {
        self.acquire(None)
    }

    fn open_timeout(&self, timeout: Duration) -> Result<ExecutionContext> {
        // A deadline past what `Instant` can represent means no deadline.
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.acquire(Some((deadline, timeout))),
            None => self.acquire(None),
        }
    }

    fn close(&self, context: ExecutionContext) -> Result<()> {
        let context = check_owner(self.id, context)?;

        let evicted = {
            let mut state = self.lock()?;
            state.active = state.active.saturating_sub(1);
            let evicted = if !state.closed && state.idle.len() < self.config.max_idle {
                tracing::trace!("{} recycled {} (active={})", self.id, context.id(), state.active);
                state.idle.push_back(context);
                None
            } else {
                Some(context)
            };
            self.available.notify_one();
            evicted
        };

        if let Some(context) = evicted {
            self.destroy(context);
        }
        Ok(())
    }

    fn stats(&self) -> ManagerStats {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        ManagerStats {
            active: state.active,
            idle: state.idle.len(),
            created: self.created.load(Ordering::Relaxed),
            destroyed: self.destroyed.load(Ordering::Relaxed),
            max_active: self.config.max_active,
            max_idle: self.config.max_idle,
        }
    }

    fn shutdown(&self) -> Result<()> {
        let (drained, active) = {
            let mut state = self.lock()?;
            state.closed = true;
            self.available.notify_all();
            (state.idle.drain(..).collect::<Vec<_>>(), state.active)
        };

        for context in drained {
            self.destroy(context);
        }

        if active > 0 {
            tracing::error!("{} shut down with {} context(s) checked out", self.id, active);
            return Err(Error::ContextsOutstanding { active });
        }
        tracing::info!("{} shut down cleanly", self.id);
        Ok(())
    }
}

impl Drop for PooledContextManager {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return;
        }
        state.closed = true;
        let active = state.active;
        let drained = state.idle.len() as u64;
        state.idle.clear();
        self.destroyed.fetch_add(drained, Ordering::Relaxed);

        if active > 0 {
            tracing::error!(
                "{} dropped with {} context(s) still checked out",
                self.id,
                active
            );
        }
    }
}
