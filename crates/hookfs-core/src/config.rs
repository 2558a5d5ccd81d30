//! Pool sizing configuration.
//!
//! Values are layered: built-in defaults, then an optional JSON file, then
//! `HOOKFS_*` environment variables. The CLI applies its own flags on top.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable overriding [`PoolConfig::start_count`].
pub const ENV_START_COUNT: &str = "HOOKFS_START_COUNT";
/// Environment variable overriding [`PoolConfig::max_active`].
pub const ENV_MAX_ACTIVE: &str = "HOOKFS_MAX_ACTIVE";
/// Environment variable overriding [`PoolConfig::max_idle`].
pub const ENV_MAX_IDLE: &str = "HOOKFS_MAX_IDLE";

/// Sizing parameters for a `PooledContextManager`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Contexts built eagerly when the pool is created.
    pub start_count: usize,
    /// Hard ceiling on contexts checked out at the same time.
    pub max_active: usize,
    /// Ceiling on idle contexts kept for reuse when they are returned.
    pub max_idle: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            start_count: 1,
            max_active: 8,
            max_idle: 4,
        }
    }
}

impl PoolConfig {
    pub fn new(start_count: usize, max_active: usize, max_idle: usize) -> Self {
        Self {
            start_count,
            max_active,
            max_idle,
        }
    }

    /// Load a JSON config file. Missing fields fall back to defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Apply `HOOKFS_*` environment overrides.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let parse = |key: &str| -> Result<Option<usize>> {
            match lookup(key) {
                Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
                    Error::InvalidConfig(format!("{} must be a non-negative integer, got '{}'", key, raw))
                }),
                None => Ok(None),
            }
        };

        if let Some(v) = parse(ENV_START_COUNT)? {
            self.start_count = v;
        }
        if let Some(v) = parse(ENV_MAX_ACTIVE)? {
            self.max_active = v;
        }
        if let Some(v) = parse(ENV_MAX_IDLE)? {
            self.max_idle = v;
        }
        Ok(self)
    }

    /// Reject configurations a pool cannot honor.
    ///
    /// `max_active == 0` would block every `open()` forever, and a
    /// `start_count` above `max_active` could never all be checked out.
    pub fn validate(&self) -> Result<()> {
        if self.max_active == 0 {
            return Err(Error::InvalidConfig("max_active must be at least 1".to_string()));
        }
        if self.start_count > self.max_active {
            return Err(Error::InvalidConfig(format!(
                "start_count {} exceeds max_active {}",
                self.start_count, self.max_active
            )));
        }
        Ok(())
    }
}
