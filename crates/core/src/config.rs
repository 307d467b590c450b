//! Toolkit configuration via `testkit.toml`
//!
//! Every field is optional in the file; missing fields fall back to the
//! defaults the harness components use when no config is supplied.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Config file name looked up by test suites that opt into file configuration.
pub const CONFIG_FILE_NAME: &str = "testkit.toml";

/// Default number of concurrently running tasks in a concurrent test.
pub const DEFAULT_CONCURRENCY_LEVEL: usize = 10;

/// Default worker-thread name prefix of a concurrent test.
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "ConcurrentTest";

/// Default shutdown timeout of the concurrent-task runner.
pub const DEFAULT_RUNNER_TIMEOUT_MS: u64 = 30_000;

/// Default shutdown timeout of a per-test executor scope.
pub const DEFAULT_SCOPE_TIMEOUT_MS: u64 = 10_000;

/// Default grace period granted to a leak candidate before it is reported.
pub const DEFAULT_LEAK_GRACE_PERIOD_MS: u64 = 500;

/// Toolkit configuration loaded from `testkit.toml`.
///
/// # Example
///
/// ```toml
/// concurrency_level = 10
/// thread_name_prefix = "ConcurrentTest"
/// runner_timeout_ms = 30000
/// scope_timeout_ms = 10000
/// leak_grace_period_ms = 500
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestkitConfig {
    /// Number of tasks (and worker threads) of a concurrent test run.
    #[serde(default = "default_concurrency_level")]
    pub concurrency_level: usize,
    /// Worker-thread name prefix of a concurrent test run.
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,
    /// Shutdown timeout of the concurrent-task runner, in milliseconds.
    #[serde(default = "default_runner_timeout_ms")]
    pub runner_timeout_ms: u64,
    /// Shutdown timeout of an executor scope, in milliseconds.
    #[serde(default = "default_scope_timeout_ms")]
    pub scope_timeout_ms: u64,
    /// Grace period before a new thread is declared leaked, in milliseconds.
    #[serde(default = "default_leak_grace_period_ms")]
    pub leak_grace_period_ms: u64,
}

fn default_concurrency_level() -> usize {
    DEFAULT_CONCURRENCY_LEVEL
}

fn default_thread_name_prefix() -> String {
    DEFAULT_THREAD_NAME_PREFIX.to_string()
}

fn default_runner_timeout_ms() -> u64 {
    DEFAULT_RUNNER_TIMEOUT_MS
}

fn default_scope_timeout_ms() -> u64 {
    DEFAULT_SCOPE_TIMEOUT_MS
}

fn default_leak_grace_period_ms() -> u64 {
    DEFAULT_LEAK_GRACE_PERIOD_MS
}

impl Default for TestkitConfig {
    fn default() -> Self {
        Self {
            concurrency_level: default_concurrency_level(),
            thread_name_prefix: default_thread_name_prefix(),
            runner_timeout_ms: default_runner_timeout_ms(),
            scope_timeout_ms: default_scope_timeout_ms(),
            leak_grace_period_ms: default_leak_grace_period_ms(),
        }
    }
}

impl TestkitConfig {
    /// Runner shutdown timeout as a `Duration`.
    pub fn runner_timeout(&self) -> Duration {
        Duration::from_millis(self.runner_timeout_ms)
    }

    /// Scope shutdown timeout as a `Duration`.
    pub fn scope_timeout(&self) -> Duration {
        Duration::from_millis(self.scope_timeout_ms)
    }

    /// Leak grace period as a `Duration`.
    pub fn leak_grace_period(&self) -> Duration {
        Duration::from_millis(self.leak_grace_period_ms)
    }

    /// Checks the values that cannot be expressed in the type.
    ///
    /// # Errors
    ///
    /// Returns an error if the concurrency level is zero.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency_level == 0 {
            return Err(Error::Config(
                "Invalid concurrency_level 0 in testkit.toml. Expected a positive integer."
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Parse and validate config from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TestkitConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# testkit configuration

# Number of concurrently running tasks (and worker threads) per concurrent test.
concurrency_level = 10

# Name prefix of concurrent-test worker threads; a counter starting at 1 is appended.
thread_name_prefix = "ConcurrentTest"

# Timeout for each shutdown phase (graceful, then forced) of a concurrent test's pool.
runner_timeout_ms = 30000

# Timeout for each shutdown phase of a per-test executor scope.
scope_timeout_ms = 10000

# Time a newly started thread gets to terminate before it is reported as leaked.
leak_grace_period_ms = 500
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content).map_err(|e| {
            Error::Config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml())?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
