//! Sandbox configuration types
//!
//! Resource guards and capture settings applied to every sandboxed run.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::script::Limits;

/// Sandbox configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Wall-clock budget for one run
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Step budget for each invocation (the snippet, and each test)
    #[serde(default = "default_fuel_limit")]
    pub fuel_limit: u64,
    /// Maximum script call depth
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: usize,
    /// Maximum number of captured console lines per run
    #[serde(default = "default_max_console_lines")]
    pub max_console_lines: usize,
    /// Maximum total size of the captured console lines per run
    #[serde(default = "default_max_console_bytes")]
    pub max_console_bytes: usize,
    /// Maximum length of any script string or array
    #[serde(default = "default_max_collection_length")]
    pub max_collection_length: usize,
    /// Runs allowed at once; 0 means unlimited
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
    /// Stack size of the executor thread
    #[serde(default = "default_stack_size")]
    pub stack_size_bytes: usize,
    /// Forward captured console calls to the host log
    #[serde(default = "default_true")]
    pub forward_console: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        SandboxConfig {
            timeout: default_timeout(),
            fuel_limit: default_fuel_limit(),
            max_call_depth: default_max_call_depth(),
            max_console_lines: default_max_console_lines(),
            max_console_bytes: default_max_console_bytes(),
            max_collection_length: default_max_collection_length(),
            max_concurrent_runs: default_max_concurrent_runs(),
            stack_size_bytes: default_stack_size(),
            forward_console: true,
        }
    }
}

impl SandboxConfig {
    /// Set the wall-clock budget
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the per-invocation step budget
    pub fn with_fuel_limit(mut self, fuel_limit: u64) -> Self {
        self.fuel_limit = fuel_limit;
        self
    }

    /// Set the console capture bounds
    pub fn with_console_limits(mut self, max_lines: usize, max_bytes: usize) -> Self {
        self.max_console_lines = max_lines;
        self.max_console_bytes = max_bytes;
        self
    }

    /// Set the concurrent run limit
    pub fn with_max_concurrent_runs(mut self, runs: usize) -> Self {
        self.max_concurrent_runs = runs;
        self
    }
}

impl From<&SandboxConfig> for Limits {
    fn from(config: &SandboxConfig) -> Self {
        Limits {
            fuel: config.fuel_limit,
            max_call_depth: config.max_call_depth,
            max_collection_length: config.max_collection_length,
        }
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_fuel_limit() -> u64 {
    10_000_000
}

fn default_max_call_depth() -> usize {
    200
}

fn default_max_console_lines() -> usize {
    1000
}

fn default_max_console_bytes() -> usize {
    1024 * 1024 // 1MB
}

fn default_max_collection_length() -> usize {
    1_000_000
}

fn default_max_concurrent_runs() -> usize {
    1
}

fn default_stack_size() -> usize {
    64 * 1024 * 1024 // 64MB
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_config_default() {
        let config = SandboxConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.fuel_limit, 10_000_000);
        assert_eq!(config.max_concurrent_runs, 1);
        assert_eq!(config.max_console_bytes, 1024 * 1024);
        assert!(config.forward_console);
    }

    #[test]
    fn test_limits_from_config() {
        let config = SandboxConfig::default().with_fuel_limit(42);
        let limits = Limits::from(&config);
        assert_eq!(limits.fuel, 42);
        assert_eq!(limits.max_call_depth, 200);
        assert_eq!(limits.max_collection_length, 1_000_000);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SandboxConfig = json5::from_str("{ timeout: '250ms', fuel_limit: 100 }").unwrap();
        assert_eq!(config.timeout, Duration::from_millis(250));
        assert_eq!(config.fuel_limit, 100);
        assert_eq!(config.max_call_depth, 200);
    }
}
