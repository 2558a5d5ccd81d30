//! Execution-context managers.
//!
//! A manager lends exclusive ownership of an [`ExecutionContext`] to the
//! thread servicing one filesystem callback and takes it back afterwards.
//! It is the only synchronization point between dispatcher threads.
//!
//! # Managers
//!
//! - **`SingleContextManager`** - one context handed from caller to caller.
//!   For scripts that keep state across calls and must see every call.
//! - **`PooledContextManager`** - a bounded set of interchangeable contexts,
//!   grown on demand up to `max_active` and trimmed to `max_idle` on return.
//!
//! ```text
//! Dispatcher thread            ContextManager
//!     │ open() ───────────────▶ lock, wait for capacity, reserve slot
//!     │ ◀──────────────────── ExecutionContext (idle or freshly built)
//!     │ run hook
//!     │ close(ctx) ────────────▶ lock, recycle or evict, wake one waiter
//! ```
//!
//! Which blocked opener is woken first is up to the OS scheduler; no
//! ordering among waiters is promised.
//!
//! # Module Structure
//!
//! - `lease` - `ContextLease`, scoped open/close
//! - `pool` - `PooledContextManager`
//! - `single` - `SingleContextManager`

mod lease;
mod pool;
mod single;

use std::fmt;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::script::ExecutionContext;

pub use lease::ContextLease;
pub use pool::PooledContextManager;
pub use single::SingleContextManager;

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a manager, stamped on every context it lends out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ManagerId(u64);

impl ManagerId {
    pub(crate) fn next() -> Self {
        Self(NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ManagerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "manager#{}", self.0)
    }
}

/// Point-in-time view of a manager's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ManagerStats {
    /// Contexts currently checked out.
    pub active: usize,
    /// Contexts held by the manager, ready for reuse.
    pub idle: usize,
    /// Contexts built over the manager's lifetime.
    pub created: u64,
    /// Contexts destroyed by eviction or teardown.
    pub destroyed: u64,
    pub max_active: usize,
    pub max_idle: usize,
}

/// Lends execution contexts to dispatcher threads.
pub trait ContextManager: Send + Sync {
    /// Block until a context is available and take exclusive ownership of it.
    ///
    /// Waits indefinitely. Construction failures are returned as-is and the
    /// manager does not retry.
    fn open(&self) -> Result<ExecutionContext>;

    /// Like [`open`](Self::open), but give up with [`Error::Timeout`] once
    /// `timeout` has elapsed.
    ///
    /// This is an extension; nothing in the crate calls it implicitly.
    fn open_timeout(&self, timeout: Duration) -> Result<ExecutionContext>;

    /// Hand a context back. Never blocks waiting for capacity.
    ///
    /// A context lent by another manager is rejected with
    /// [`Error::ForeignContext`], which carries the context back to the
    /// caller untouched.
    fn close(&self, context: ExecutionContext) -> Result<()>;

    /// Snapshot of the current counters.
    fn stats(&self) -> ManagerStats;

    /// Destroy every idle context and refuse further `open()` calls.
    ///
    /// Returns [`Error::ContextsOutstanding`] if callers still hold
    /// contexts. Every call repeats that check; idle contexts are only
    /// destroyed once.
    fn shutdown(&self) -> Result<()>;
}

/// Convert a poisoned lock into our error type.
fn lock_error<T>(e: PoisonError<T>) -> Error {
    Error::LockPoisoned(format!("thread panicked while holding the manager lock: {}", e))
}

/// Pass `context` through if it was lent by `manager`, otherwise hand it
/// back inside the error.
fn check_owner(manager: ManagerId, context: ExecutionContext) -> Result<ExecutionContext> {
    match context.owner() {
        Some(owner) if owner == manager => Ok(context),
        _ => {
            tracing::error!("{} returned to {} which did not lend it", context.id(), manager);
            Err(Error::ForeignContext {
                context: Box::new(context),
            })
        }
    }
}

/// Run `f` with a subscriber that records every event, and return the
/// formatted output.
#[cfg(test)]
fn capture_logs(f: impl FnOnce()) -> String {
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    let capture = Capture::default();
    let writer = capture.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_max_level(tracing::Level::TRACE)
        .with_writer(move || writer.clone())
        .finish();
    tracing::subscriber::with_default(subscriber, f);

    let bytes = capture.0.lock().unwrap().clone();
    String::from_utf8_lossy(&bytes).into_owned()
}
