//! Script payloads and the factories that turn them into contexts.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::error::Result;

use super::ExecutionContext;

/// A Lua chunk plus the name it is reported under in error messages.
#[derive(Debug, Clone)]
pub struct ScriptSource {
    payload: Arc<[u8]>,
    name: String,
}

impl ScriptSource {
    /// Create a script source from an in-memory payload.
    pub fn new(payload: impl AsRef<[u8]>, name: impl Into<String>) -> Self {
        Self {
            payload: Arc::from(payload.as_ref()),
            name: name.into(),
        }
    }

    /// Read a script from disk. The chunk is named `@<path>` so Lua
    /// tracebacks point at the file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let payload = fs::read(path)?;
        Ok(Self {
            payload: Arc::from(payload),
            name: format!("@{}", path.display()),
        })
    }

    /// Replace the diagnostic name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Builds new execution contexts for a manager.
///
/// Called for eager warm-up and whenever a manager has to grow. Calls may
/// happen concurrently from several threads and never under a manager lock.
pub trait ContextFactory: Send + Sync {
    /// Construct one context. Failures are returned to the caller unchanged.
    fn create(&self) -> Result<ExecutionContext>;

    /// Diagnostic name used in logs.
    fn name(&self) -> &str;
}

/// Factory that loads one [`ScriptSource`] into a fresh Lua state per call.
#[derive(Debug, Clone)]
pub struct LuaContextFactory {
    source: ScriptSource,
}

impl LuaContextFactory {
    pub fn new(source: ScriptSource) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &ScriptSource {
        &self.source
    }
}

impl ContextFactory for LuaContextFactory {
    fn create(&self) -> Result<ExecutionContext> {
        ExecutionContext::load(&self.source)
    }

    fn name(&self) -> &str {
        self.source.name()
    }
}

impl<F: ContextFactory + ?Sized> ContextFactory for Arc<F> {
    fn create(&self) -> Result<ExecutionContext> {
        (**self).create()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_from_file_names_chunk_after_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "return {{}}").unwrap();

        let source = ScriptSource::from_file(file.path()).unwrap();
        assert!(source.name().starts_with('@'));
        assert_eq!(source.payload(), b"return {}");
    }

    #[test]
    fn test_from_missing_file_is_io_error() {
        let err = ScriptSource::from_file("/nonexistent/hooks.lua").unwrap_err();
        assert!(matches!(err, crate::Error::Io(_)));
    }

    #[test]
    fn test_factory_builds_independent_contexts() {
        let factory = LuaContextFactory::new(ScriptSource::new("return {}", "f.lua"));
        let a = factory.create().unwrap();
        let b = factory.create().unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(factory.name(), "f.lua");
    }

    #[test]
    fn test_with_name_overrides() {
        let source = ScriptSource::new("return {}", "a").with_name("b");
        assert_eq!(source.name(), "b");
    }
}
