//! Configuration I/O - Loading and saving configuration
//!
//! Handles reading configuration from files and environment variables.

use std::path::{Path, PathBuf};

use humantime_serde::re::humantime;
use tracing::{debug, warn};

use super::types::Config;
use crate::error::{Error, Result};

/// A snapshot of the configuration file
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    /// Path to the config file
    pub path: PathBuf,
    /// Whether the file exists
    pub exists: bool,
    /// Parsed configuration
    pub config: Option<Config>,
    /// Problems reading or parsing the file
    pub issues: Vec<String>,
}

/// Load configuration with layered precedence:
/// 1. Config file if it exists, otherwise defaults
/// 2. Environment variable overrides (includes .env)
pub fn load_config() -> Result<Config> {
    let config_path = super::paths::config_path();

    let mut config = if config_path.exists() {
        debug!("Loading config from {}", config_path.display());
        load_config_from_path(&config_path)?
    } else {
        Config::default()
    };

    // Apply environment variable overrides (highest precedence)
    apply_env_overrides(&mut config);

    Ok(config)
}

/// Load configuration from a specific path
pub fn load_config_from_path(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    // Detect format by extension
    let config: Config = if path.extension().is_some_and(|ext| ext == "json") {
        // Parse as JSON5 (more lenient than strict JSON)
        json5::from_str(&content).map_err(|e| Error::Config(format!("Invalid JSON config: {}", e)))?
    } else if path.extension().is_some_and(|ext| ext == "toml") {
        toml::from_str(&content).map_err(|e| Error::Config(format!("Invalid TOML config: {}", e)))?
    } else {
        // Try JSON5 first, then TOML
        json5::from_str(&content)
            .or_else(|_| toml::from_str(&content).map_err(|e| Error::Config(e.to_string())))
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?
    };

    Ok(config)
}

/// Apply environment variable overrides to an existing config.
///
/// Loads `.env` if present, then overlays any set variables. Env vars have
/// the highest precedence: defaults < file < env.
pub fn apply_env_overrides(config: &mut Config) {
    dotenvy::dotenv().ok();
    apply_overrides(config, |key| std::env::var(key).ok());
}

/// Apply overrides from an arbitrary variable source.
///
/// Unparseable values are logged and ignored.
pub fn apply_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    // Sandbox overrides
    if let Some(timeout) = var("PRAXIS_TIMEOUT") {
        match humantime::parse_duration(&timeout) {
            Ok(v) => config.sandbox.timeout = v,
            Err(e) => warn!("Ignoring PRAXIS_TIMEOUT={}: {}", timeout, e),
        }
    }
    if let Some(v) = parsed(&var, "PRAXIS_FUEL_LIMIT") {
        config.sandbox.fuel_limit = v;
    }
    if let Some(v) = parsed(&var, "PRAXIS_MAX_CALL_DEPTH") {
        config.sandbox.max_call_depth = v;
    }
    if let Some(v) = parsed(&var, "PRAXIS_MAX_CONSOLE_LINES") {
        config.sandbox.max_console_lines = v;
    }
    if let Some(v) = parsed(&var, "PRAXIS_MAX_CONSOLE_BYTES") {
        config.sandbox.max_console_bytes = v;
    }
    if let Some(v) = parsed(&var, "PRAXIS_MAX_CONCURRENT_RUNS") {
        config.sandbox.max_concurrent_runs = v;
    }

    // Logging overrides
    if let Some(filter) = var("RUST_LOG") {
        config.log.filter = filter;
    }
    if let Some(v) = parsed(&var, "LOG_FORMAT") {
        config.log.format = v;
    }
}

fn parsed<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = var(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("Ignoring {}={}: {}", key, raw, e);
            None
        }
    }
}

/// Save configuration to a file
pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    let content = if path.extension().is_some_and(|ext| ext == "toml") {
        toml::to_string_pretty(config).map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
    } else {
        serde_json::to_string_pretty(config).map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, content)?;
    Ok(())
}

/// Read a configuration file into a snapshot
pub fn read_config_snapshot(path: &Path) -> ConfigSnapshot {
    if !path.exists() {
        return ConfigSnapshot {
            path: path.to_path_buf(),
            exists: false,
            config: None,
            issues: vec!["Configuration file does not exist".to_string()],
        };
    }

    match load_config_from_path(path) {
        Ok(config) => ConfigSnapshot {
            path: path.to_path_buf(),
            exists: true,
            config: Some(config),
            issues: Vec::new(),
        },
        Err(e) => ConfigSnapshot {
            path: path.to_path_buf(),
            exists: true,
            config: None,
            issues: vec![e.to_string()],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogFormat;
    use std::collections::HashMap;
    use std::time::Duration;
    use tempfile::tempdir;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_save_and_load_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.sandbox.fuel_limit = 1234;
        save_config(&config, &path).unwrap();

        let loaded = load_config_from_path(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_json5_with_comments() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            "{\n  // tighter budget\n  sandbox: { timeout: '2s', max_call_depth: 50, },\n}",
        )
        .unwrap();

        let config = load_config_from_path(&path).unwrap();
        assert_eq!(config.sandbox.timeout, Duration::from_secs(2));
        assert_eq!(config.sandbox.max_call_depth, 50);
        assert_eq!(config.sandbox.fuel_limit, 10_000_000);
    }

    #[test]
    fn test_load_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[sandbox]\ntimeout = \"1m\"\n\n[log]\nformat = \"json\"\n").unwrap();

        let config = load_config_from_path(&path).unwrap();
        assert_eq!(config.sandbox.timeout, Duration::from_secs(60));
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ sandbox: ").unwrap();

        let err = load_config_from_path(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        apply_overrides(
            &mut config,
            vars(&[
                ("PRAXIS_TIMEOUT", "750ms"),
                ("PRAXIS_FUEL_LIMIT", "5000"),
                ("PRAXIS_MAX_CONCURRENT_RUNS", "0"),
                ("PRAXIS_MAX_CONSOLE_BYTES", "4096"),
                ("RUST_LOG", "praxis=debug"),
                ("LOG_FORMAT", "json"),
            ]),
        );
        assert_eq!(config.sandbox.timeout, Duration::from_millis(750));
        assert_eq!(config.sandbox.fuel_limit, 5000);
        assert_eq!(config.sandbox.max_concurrent_runs, 0);
        assert_eq!(config.sandbox.max_console_bytes, 4096);
        assert_eq!(config.log.filter, "praxis=debug");
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_overrides_are_ignored() {
        let mut config = Config::default();
        apply_overrides(
            &mut config,
            vars(&[("PRAXIS_TIMEOUT", "soon"), ("PRAXIS_MAX_CALL_DEPTH", "-3")]),
        );
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_snapshot() {
        let dir = tempdir().unwrap();
        let missing = read_config_snapshot(&dir.path().join("absent.json"));
        assert!(!missing.exists);
        assert!(missing.config.is_none());

        let path = dir.path().join("config.toml");
        save_config(&Config::default(), &path).unwrap();
        let snapshot = read_config_snapshot(&path);
        assert!(snapshot.exists);
        assert!(snapshot.issues.is_empty());
        assert_eq!(snapshot.config, Some(Config::default()));
    }
}
