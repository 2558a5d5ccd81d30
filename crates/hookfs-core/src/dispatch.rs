//! Forwarding filesystem callbacks to Lua hooks.
//!
//! The [`Dispatcher`] is built once at mount time and shared by reference
//! with every worker thread. Each call borrows a context from the manager
//! for exactly as long as the hook runs.

use std::sync::Arc;

use mlua::{MultiValue, Value};

use crate::error::{Error, Result};
use crate::manager::{ContextLease, ContextManager, ManagerStats};
use crate::script::ExecutionContext;

/// Filesystem hook names a script may define.
pub const KNOWN_HOOKS: &[&str] = &[
    "getattr", "readlink", "mknod", "mkdir", "unlink", "rmdir", "symlink", "rename", "link",
    "chmod", "chown", "truncate", "open", "read", "write", "statfs", "flush", "release", "fsync",
    "setxattr", "getxattr", "listxattr", "removexattr", "opendir", "readdir", "releasedir",
    "fsyncdir", "init", "destroy", "access", "create", "ftruncate", "fgetattr", "utimens",
];

/// Argument passed to a hook.
#[derive(Debug, Clone, PartialEq)]
pub enum HookArg {
    Str(String),
    Int(i64),
    Bytes(Vec<u8>),
}

impl From<&str> for HookArg {
    fn from(s: &str) -> Self {
        HookArg::Str(s.to_string())
    }
}

impl From<i64> for HookArg {
    fn from(n: i64) -> Self {
        HookArg::Int(n)
    }
}

impl From<Vec<u8>> for HookArg {
    fn from(bytes: Vec<u8>) -> Self {
        HookArg::Bytes(bytes)
    }
}

/// What a hook returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookReply {
    /// Integer reply; negative values are `-errno`.
    Status(i64),
    /// String reply, e.g. the bytes produced by `read`.
    Data(Vec<u8>),
}

impl HookReply {
    /// The reply for a hook the script does not define.
    pub fn not_implemented() -> Self {
        HookReply::Status(-i64::from(libc::ENOSYS))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, HookReply::Status(n) if *n < 0)
    }
}

/// Routes callbacks through a [`ContextManager`] into Lua hooks.
pub struct Dispatcher {
    manager: Arc<dyn ContextManager>,
}

impl Dispatcher {
    pub fn new(manager: Arc<dyn ContextManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &dyn ContextManager {
        self.manager.as_ref()
    }

    pub fn stats(&self) -> ManagerStats {
        self.manager.stats()
    }

    /// Run `hook` with `args` in a borrowed context.
    ///
    /// A hook the script does not define yields `-ENOSYS` without running
    /// anything. The context is returned to the manager on every path.
    pub fn call(&self, hook: &str, args: &[HookArg]) -> Result<HookReply> {
        let lease = ContextLease::acquire(self.manager.as_ref())?;
        let reply = invoke(&lease, hook, args);
        lease.release()?;
        reply
    }

    /// Tear down the manager once the event loop has stopped.
    pub fn shutdown(&self) -> Result<()> {
        self.manager.shutdown()
    }
}

/// Call `hook` as a method on the script's hook table.
fn invoke(context: &ExecutionContext, hook: &str, args: &[HookArg]) -> Result<HookReply> {
    let Some(function) = context.hook(hook)? else {
        tracing::trace!("Hook '{}' not defined in '{}'", hook, context.name());
        return Ok(HookReply::not_implemented());
    };

    let hook_error = |message: String| Error::Hook {
        hook: hook.to_string(),
        message,
    };

    let lua = context.lua();
    let mut values = Vec::with_capacity(args.len() + 1);
    values.push(Value::Table(context.hooks()?));
    for arg in args {
        let value = match arg {
            HookArg::Str(s) => lua.create_string(s).map(Value::String),
            HookArg::Int(n) => Ok(Value::Integer(*n)),
            HookArg::Bytes(b) => lua.create_string(b).map(Value::String),
        }
        .map_err(|e| hook_error(e.to_string()))?;
        values.push(value);
    }

    let returned: Value = function
        .call(values.into_iter().collect::<MultiValue>())
        .map_err(|e| hook_error(e.to_string()))?;

    match returned {
        Value::Integer(n) => Ok(HookReply::Status(n)),
        Value::Number(n) if n.fract() == 0.0 && n.is_finite() => Ok(HookReply::Status(n as i64)),
        Value::String(s) => Ok(HookReply::Data(s.as_bytes().to_vec())),
        other => Err(hook_error(format!(
            "must return an integer or a string, got a {}",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::manager::{PooledContextManager, SingleContextManager};
    use crate::script::{LuaContextFactory, ScriptSource};

    const SCRIPT: &str = r#"
        local hooks = {}
        function hooks:getattr(path)
            if path == "/" then return 0 end
            return -2
        end
        function hooks:read(path, size, offset)
            return string.sub("hello world", offset + 1, offset + size)
        end
        function hooks:write(path, data)
            return #data
        end
        function hooks:fail()
            error("hook exploded")
        end
        function hooks:odd()
            return {}
        end
        return hooks
    "#;

    fn dispatcher() -> Dispatcher {
        let factory = LuaContextFactory::new(ScriptSource::new(SCRIPT, "dispatch.lua"));
        let pool = PooledContextManager::new(PoolConfig::new(1, 2, 2), factory).unwrap();
        Dispatcher::new(Arc::new(pool))
    }

    #[test]
    fn test_status_reply() {
        let d = dispatcher();
        assert_eq!(d.call("getattr", &["/".into()]).unwrap(), HookReply::Status(0));
        let missing = d.call("getattr", &["/nope".into()]).unwrap();
        assert_eq!(missing, HookReply::Status(-2));
        assert!(missing.is_error());
    }

    #[test]
    fn test_data_reply() {
        let d = dispatcher();
        let reply = d.call("read", &["/f".into(), HookArg::Int(5), HookArg::Int(6)]).unwrap();
        assert_eq!(reply, HookReply::Data(b"world".to_vec()));
    }

    #[test]
    fn test_bytes_argument() {
        let d = dispatcher();
        let reply = d.call("write", &["/f".into(), vec![0u8, 1, 2].into()]).unwrap();
        assert_eq!(reply, HookReply::Status(3));
    }

    #[test]
    fn test_undefined_hook_is_enosys() {
        let d = dispatcher();
        assert_eq!(d.call("mkdir", &[]).unwrap(), HookReply::not_implemented());
    }

    #[test]
    fn test_hook_error_releases_context() {
        let d = dispatcher();
        let err = d.call("fail", &[]).unwrap_err();
        assert!(err.to_string().contains("hook exploded"));
        assert_eq!(d.stats().active, 0);
    }

    #[test]
    fn test_bad_reply_type() {
        let d = dispatcher();
        let err = d.call("odd", &[]).unwrap_err();
        assert!(err.to_string().contains("got a table"));
    }

    #[test]
    fn test_single_manager_keeps_state_between_calls() {
        let script = r#"
            local hooks = { n = 0 }
            function hooks:write() self.n = self.n + 1; return self.n end
            return hooks
        "#;
        let factory = LuaContextFactory::new(ScriptSource::new(script, "counter.lua"));
        let d = Dispatcher::new(Arc::new(SingleContextManager::new(factory).unwrap()));
        d.call("write", &[]).unwrap();
        assert_eq!(d.call("write", &[]).unwrap(), HookReply::Status(2));
        d.shutdown().unwrap();
    }
}
