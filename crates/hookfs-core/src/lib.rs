//! Core engine for hookfs, a Lua-scripted filesystem bridge.
//!
//! This crate provides:
//! - Isolated Lua execution contexts built from a script payload
//! - Context managers that lend those contexts to callback threads
//!   (a single hand-off manager and a bounded pool)
//! - A dispatcher that forwards filesystem callbacks to Lua hooks
//! - Pool configuration from files and the environment

pub mod config;
pub mod dispatch;
pub mod error;
pub mod manager;
pub mod script;

pub use config::PoolConfig;
pub use dispatch::{Dispatcher, HookArg, HookReply, KNOWN_HOOKS};
pub use error::{Error, Result};
pub use manager::{
    ContextLease, ContextManager, ManagerId, ManagerStats, PooledContextManager,
    SingleContextManager,
};
pub use script::{ContextFactory, ContextId, ExecutionContext, LuaContextFactory, ScriptSource};
