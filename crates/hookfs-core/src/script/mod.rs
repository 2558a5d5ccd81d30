//! Lua execution contexts and how they are built.
//!
//! - `context` - `ExecutionContext`, one isolated Lua state per instance
//! - `factory` - `ScriptSource` and the `ContextFactory` trait

mod context;
mod factory;

pub use context::{ContextId, ExecutionContext};
pub use factory::{ContextFactory, LuaContextFactory, ScriptSource};
