//! Configuration paths
//!
//! Utilities for resolving configuration file paths.

use std::path::PathBuf;

/// Get the configuration directory
pub fn config_dir() -> PathBuf {
    // Check for explicit override
    if let Ok(dir) = std::env::var("PRAXIS_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    dirs::config_dir()
        .map(|d| d.join("praxis"))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .map(|h| h.join(".config").join("praxis"))
                .unwrap_or_else(|| PathBuf::from(".praxis"))
        })
}

/// Get the main configuration file path
pub fn config_path() -> PathBuf {
    // Check for explicit override
    if let Ok(path) = std::env::var("PRAXIS_CONFIG") {
        return PathBuf::from(path);
    }

    config_dir().join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_paths() {
        if std::env::var("PRAXIS_CONFIG").is_err() {
            assert!(config_path().ends_with("config.json"));
        }
        let _ = config_dir();
    }
}
