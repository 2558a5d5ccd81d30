//! Isolated Lua execution contexts.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use mlua::{Function, Lua, RegistryKey, Table, Value};

use crate::error::{Error, Result};
use crate::manager::ManagerId;

use super::ScriptSource;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identity of an execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    fn next() -> Self {
        Self(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw id value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// One isolated Lua state plus the hook table its script returned.
///
/// A context has no internal synchronization. It is moved into the caller
/// by `ContextManager::open` and moved back by `close`, so at most one
/// thread can reach it at a time.
pub struct ExecutionContext {
    id: ContextId,
    /// Manager that lent this context out; stamped on first hand-out.
    owner: Option<ManagerId>,
    name: String,
    hooks: RegistryKey,
    lua: Lua,
}

impl ExecutionContext {
    /// Build a fresh Lua state and run the script's top-level chunk.
    ///
    /// The chunk must return a table of hooks (or nothing, which yields an
    /// empty table). Compile errors and errors raised while running the
    /// chunk are reported as [`Error::Script`].
    pub fn load(source: &ScriptSource) -> Result<Self> {
        let lua = Lua::new();
        let script_error = |e: mlua::Error| Error::Script {
            name: source.name().to_string(),
            message: e.to_string(),
        };

        let returned: Value = lua
            .load(source.payload())
            .set_name(source.name())
            .call(())
            .map_err(script_error)?;

        let table = match returned {
            Value::Table(table) => table,
            Value::Nil => lua.create_table().map_err(script_error)?,
            other => {
                return Err(Error::Script {
                    name: source.name().to_string(),
                    message: format!("chunk returned a {}, expected a table", other.type_name()),
                });
            }
        };
        let hooks = lua.create_registry_value(table).map_err(script_error)?;

        let context = Self {
            id: ContextId::next(),
            owner: None,
            name: source.name().to_string(),
            hooks,
            lua,
        };
        tracing::debug!("Constructed {} from '{}'", context.id, context.name);
        Ok(context)
    }

    /// Get the context id.
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Diagnostic name of the script this context was built from.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Direct access to the Lua state.
    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    /// The table returned by the script's top-level chunk.
    pub fn hooks(&self) -> Result<Table> {
        self.lua
            .registry_value(&self.hooks)
            .map_err(|e| Error::Hook {
                hook: "<table>".to_string(),
                message: e.to_string(),
            })
    }

    /// Look up a hook by name. Returns `None` when the script does not define it.
    pub fn hook(&self, name: &str) -> Result<Option<Function>> {
        let value: Value = self.hooks()?.get(name).map_err(|e| Error::Hook {
            hook: name.to_string(),
            message: e.to_string(),
        })?;

        match value {
            Value::Nil => Ok(None),
            Value::Function(f) => Ok(Some(f)),
            other => Err(Error::Hook {
                hook: name.to_string(),
                message: format!("expected a function, found a {}", other.type_name()),
            }),
        }
    }

    pub(crate) fn owner(&self) -> Option<ManagerId> {
        self.owner
    }

    pub(crate) fn bind(&mut self, manager: ManagerId) {
        self.owner = Some(manager);
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        tracing::trace!("Destroying {} ('{}')", self.id, self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(code: &str) -> ScriptSource {
        ScriptSource::new(code, "test.lua")
    }

    #[test]
    fn test_load_returns_hook_table() {
        let ctx = ExecutionContext::load(&source("return { read = function() return 1 end }"))
            .unwrap();
        assert!(ctx.hook("read").unwrap().is_some());
        assert!(ctx.hook("write").unwrap().is_none());
        assert_eq!(ctx.name(), "test.lua");
    }

    #[test]
    fn test_nil_chunk_yields_empty_table() {
        let ctx = ExecutionContext::load(&source("local x = 1")).unwrap();
        assert!(ctx.hook("getattr").unwrap().is_none());
    }

    #[test]
    fn test_syntax_error_is_script_error() {
        let err = ExecutionContext::load(&source("return {")).unwrap_err();
        match err {
            Error::Script { name, .. } => assert_eq!(name, "test.lua"),
            other => panic!("Expected Script error, got {:?}", other),
        }
    }

    #[test]
    fn test_runtime_error_in_chunk_is_script_error() {
        let err = ExecutionContext::load(&source("error('boom')")).unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_non_table_return_rejected() {
        let err = ExecutionContext::load(&source("return 42")).unwrap_err();
        assert!(err.to_string().contains("expected a table"));
    }

    #[test]
    fn test_non_function_hook_rejected() {
        let ctx = ExecutionContext::load(&source("return { read = 5 }")).unwrap();
        assert!(matches!(ctx.hook("read"), Err(Error::Hook { .. })));
    }

    #[test]
    fn test_ids_are_unique() {
        let a = ExecutionContext::load(&source("return {}")).unwrap();
        let b = ExecutionContext::load(&source("return {}")).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_contexts_are_isolated() {
        let a = ExecutionContext::load(&source("return {}")).unwrap();
        let b = ExecutionContext::load(&source("return {}")).unwrap();
        a.lua().globals().set("marker", 7).unwrap();
        let seen: Option<i64> = b.lua().globals().get("marker").unwrap();
        assert_eq!(seen, None);
    }
}
