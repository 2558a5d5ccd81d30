//! Error types for hookfs-core.

use std::time::Duration;

use thiserror::Error;

use crate::script::ExecutionContext;

/// Result type for hookfs-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in hookfs-core.
#[derive(Debug, Error)]
pub enum Error {
    /// Script failed to compile or its top-level chunk raised an error.
    #[error("failed to load script '{name}': {message}")]
    Script { name: String, message: String },

    /// A hook raised an error or returned a value that cannot be converted.
    #[error("hook '{hook}' failed: {message}")]
    Hook { hook: String, message: String },

    /// Pool parameters are inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be parsed.
    #[error("configuration parse error: {0}")]
    Config(#[from] serde_json::Error),

    /// Manager torn down while callers still held contexts.
    #[error("{active} execution context(s) still checked out at teardown")]
    ContextsOutstanding { active: usize },

    /// A context was returned to a manager that did not lend it.
    ///
    /// The context rides along so the caller can hand it to the right
    /// manager; see [`Error::into_context`].
    #[error("context {} was not lent out by this manager", .context.id())]
    ForeignContext { context: Box<ExecutionContext> },

    /// The manager has been shut down.
    #[error("context manager is shut down")]
    ManagerClosed,

    /// `open_timeout` gave up waiting for a context.
    #[error("timed out after {0:?} waiting for an execution context")]
    Timeout(Duration),

    /// A thread panicked while holding the manager lock.
    #[error("manager lock poisoned: {0}")]
    LockPoisoned(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Take back the context rejected by [`Error::ForeignContext`].
    pub fn into_context(self) -> Option<ExecutionContext> {
        match self {
            Error::ForeignContext { context } => Some(*context),
            _ => None,
        }
    }

    /// Render the error together with a short recovery hint, if one applies.
    pub fn with_hint(&self) -> String {
        let hint = match self {
            Error::Script { .. } => {
                Some("the script must be a Lua chunk that returns a table of hooks")
            }
            Error::InvalidConfig(_) => {
                Some("check start_count <= max_active and max_active >= 1")
            }
            Error::ContextsOutstanding { .. } => {
                Some("every open() must be paired with close(); prefer ContextLease")
            }
            Error::Timeout(_) => Some("raise max_active or shorten hook run time"),
            _ => None,
        };

        match hint {
            Some(hint) => format!("{}\n  hint: {}", self, hint),
            None => self.to_string(),
        }
    }
}
