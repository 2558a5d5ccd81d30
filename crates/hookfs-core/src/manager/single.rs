//! Manager holding exactly one context, handed from caller to caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::script::{ContextFactory, ExecutionContext};

use super::{ContextManager, ManagerId, ManagerStats, check_owner, lock_error};

struct SingleState {
    /// `Some` while available, `None` while checked out.
    slot: Option<ExecutionContext>,
    checked_out: bool,
    closed: bool,
}

/// One persistent context shared serially across all callers.
///
/// `open()` blocks while another caller holds the context; `close()` wakes
/// one of the waiters. Useful when the script keeps state between calls
/// that every call must see.
pub struct SingleContextManager {
    id: ManagerId,
    state: Mutex<SingleState>,
    returned: Condvar,
    destroyed: AtomicU64,
}

impl SingleContextManager {
    /// Build the one context this manager will hand out.
    pub fn new(factory: impl ContextFactory) -> Result<Self> {
        let id = ManagerId::next();
        let mut context = factory.create()?;
        context.bind(id);
        tracing::info!("{} holds {} for '{}'", id, context.id(), factory.name());

        Ok(Self {
            id,
            state: Mutex::new(SingleState {
                slot: Some(context),
                checked_out: false,
                closed: false,
            }),
            returned: Condvar::new(),
            destroyed: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> ManagerId {
        self.id
    }

    fn lock(&self) -> Result<MutexGuard<'_, SingleState>> {
        self.state.lock().map_err(lock_error)
    }

    fn acquire(&self, deadline: Option<(Instant, Duration)>) -> Result<ExecutionContext> {
        let mut state = self.lock()?;
        loop {
            if state.closed {
                return Err(Error::ManagerClosed);
            }
            if let Some(context) = state.slot.take() {
                state.checked_out = true;
                tracing::trace!("{} lent {}", self.id, context.id());
                return Ok(context);
            }
            state = match deadline {
                None => self.returned.wait(state).map_err(lock_error)?,
                Some((deadline, timeout)) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::Timeout(timeout));
                    }
                    self.returned
                        .wait_timeout(state, deadline - now)
                        .map_err(lock_error)?
                        .0
                }
            };
        }
    }
}

impl ContextManager for SingleContextManager {
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

        let discarded = {
            let mut state = self.lock()?;
            state.checked_out = false;
            if state.closed {
                Some(context)
            } else {
                tracing::trace!("{} got back {}", self.id, context.id());
                state.slot = Some(context);
                self.returned.notify_one();
                None
            }
        };

        if discarded.is_some() {
            self.destroyed.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn stats(&self) -> ManagerStats {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        ManagerStats {
            active: usize::from(state.checked_out),
            idle: usize::from(state.slot.is_some()),
            created: 1,
            destroyed: self.destroyed.load(Ordering::Relaxed),
            max_active: 1,
            max_idle: 1,
        }
    }

    fn shutdown(&self) -> Result<()> {
        let (slot, checked_out, first) = {
            let mut state = self.lock()?;
            let first = !state.closed;
            state.closed = true;
            self.returned.notify_all();
            (state.slot.take(), state.checked_out, first)
        };

        if let Some(context) = slot {
            self.destroyed.fetch_add(1, Ordering::Relaxed);
            drop(context);
        }

        if checked_out {
            tracing::error!("{} shut down while its context is checked out", self.id);
            return Err(Error::ContextsOutstanding { active: 1 });
        }
        if first {
            tracing::info!("{} shut down cleanly", self.id);
        }
        Ok(())
    }
}

impl Drop for SingleContextManager {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if !state.closed && state.checked_out {
            tracing::error!("{} dropped while its context is checked out", self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::capture_logs;
    use crate::script::{LuaContextFactory, ScriptSource};
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::thread;

    fn manager() -> SingleContextManager {
        SingleContextManager::new(LuaContextFactory::new(ScriptSource::new(
            "return {}",
            "single-test.lua",
        )))
        .unwrap()
    }

    #[test]
    fn test_same_context_every_time() {
        let manager = manager();
        let ctx = manager.open().unwrap();
        let id = ctx.id();
        ctx.lua().globals().set("count", 1).unwrap();
        manager.close(ctx).unwrap();

        let ctx = manager.open().unwrap();
        assert_eq!(ctx.id(), id);
        let count: i64 = ctx.lua().globals().get("count").unwrap();
        assert_eq!(count, 1);
        manager.close(ctx).unwrap();
    }

    #[test]
    fn test_stats_follow_hand_off() {
        let manager = manager();
        assert_eq!(manager.stats().idle, 1);
        let ctx = manager.open().unwrap();
        assert_eq!(manager.stats().active, 1);
        assert_eq!(manager.stats().idle, 0);
        manager.close(ctx).unwrap();
        assert_eq!(manager.stats().active, 0);
    }

    #[test]
    fn test_construction_failure() {
        let result = SingleContextManager::new(LuaContextFactory::new(ScriptSource::new(
            "return {",
            "broken.lua",
        )));
        assert!(matches!(result, Err(Error::Script { .. })));
    }

    #[test]
    fn test_second_opener_blocks_until_close() {
        let manager = Arc::new(manager());
        let held = manager.open().unwrap();
        let held_id = held.id();

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let manager = manager.clone();
            thread::spawn(move || {
                let ctx = manager.open().unwrap();
                tx.send(ctx.id()).unwrap();
                manager.close(ctx).unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        manager.close(held).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), held_id);
        waiter.join().unwrap();
    }

    #[test]
    fn test_open_timeout() {
        let manager = manager();
        let held = manager.open().unwrap();
        assert!(matches!(
            manager.open_timeout(Duration::from_millis(20)),
            Err(Error::Timeout(_))
        ));
        manager.close(held).unwrap();
    }

    #[test]
    fn test_shutdown_while_checked_out() {
        let manager = manager();
        let held = manager.open().unwrap();
        assert!(matches!(
            manager.shutdown(),
            Err(Error::ContextsOutstanding { active: 1 })
        ));
        manager.close(held).unwrap();
        assert_eq!(manager.stats().destroyed, 1);
    }

    #[test]
    fn test_repeated_shutdown_keeps_reporting_checked_out_context() {
        let manager = manager();
        let held = manager.open().unwrap();
        for _ in 0..2 {
            assert!(matches!(
                manager.shutdown(),
                Err(Error::ContextsOutstanding { active: 1 })
            ));
        }
        manager.close(held).unwrap();
        manager.shutdown().unwrap();
    }

    #[test]
    fn test_open_timeout_beyond_instant_range() {
        let manager = manager();
        let ctx = manager.open_timeout(Duration::MAX).unwrap();
        manager.close(ctx).unwrap();
    }

    #[test]
    fn test_foreign_context_returned_in_error() {
        let first = manager();
        let second = manager();
        let ctx = first.open().unwrap();
        let err = second.close(ctx).unwrap_err();
        assert_eq!(second.stats().idle, 1);
        first.close(err.into_context().unwrap()).unwrap();
        first.shutdown().unwrap();
    }

    #[test]
    fn test_shutdown_wakes_waiters() {
        let manager = Arc::new(manager());
        let held = manager.open().unwrap();

        let waiter = {
            let manager = manager.clone();
            thread::spawn(move || manager.open().map(|_| ()))
        };
        thread::sleep(Duration::from_millis(50));

        assert!(manager.shutdown().is_err());
        assert!(matches!(waiter.join().unwrap(), Err(Error::ManagerClosed)));
        manager.close(held).unwrap();
    }

    #[test]
    fn test_clean_shutdown() {
        let manager = manager();
        manager.shutdown().unwrap();
        assert!(matches!(manager.open(), Err(Error::ManagerClosed)));
        assert_eq!(manager.stats().destroyed, 1);
    }

    #[test]
    fn test_drop_while_checked_out_logs_error() {
        let manager = manager();
        let held = manager.open().unwrap();

        let logs = capture_logs(move || drop(manager));
        assert!(logs.contains("ERROR"), "logs: {}", logs);
        assert!(logs.contains("dropped while its context is checked out"));
        drop(held);
    }

    #[test]
    fn test_drop_with_context_home_is_quiet() {
        let manager = manager();
        let ctx = manager.open().unwrap();
        manager.close(ctx).unwrap();

        let logs = capture_logs(move || drop(manager));
        assert!(!logs.contains("ERROR"), "logs: {}", logs);
    }
}
