//! Configuration validation
//!
//! Validates configuration and reports issues.

use std::time::Duration;

use humantime_serde::re::humantime;

use super::types::Config;

/// Result of configuration validation
#[derive(Debug, Clone)]
pub struct ConfigValidationResult {
    /// Whether the config is valid
    pub valid: bool,
    /// Validation errors (critical)
    pub errors: Vec<ValidationIssue>,
    /// Validation warnings (non-critical)
    pub warnings: Vec<ValidationIssue>,
}

impl ConfigValidationResult {
    /// Create a valid result
    pub fn valid() -> Self {
        ConfigValidationResult {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Add an error
    pub fn with_error(mut self, issue: ValidationIssue) -> Self {
        self.valid = false;
        self.errors.push(issue);
        self
    }

    /// Add a warning
    pub fn with_warning(mut self, issue: ValidationIssue) -> Self {
        self.warnings.push(issue);
        self
    }
}

/// A validation issue
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the config field
    pub path: String,
    /// Issue message
    pub message: String,
    /// Suggested fix
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    /// Create a new issue
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationIssue {
            path: path.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    /// Add a suggestion
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// Validate the configuration
pub fn validate_config(config: &Config) -> ConfigValidationResult {
    let mut result = ConfigValidationResult::valid();

    // Validate sandbox resource guards
    result = validate_sandbox_config(config, result);

    // Validate logging configuration
    result = validate_log_config(config, result);

    result
}

const MIN_STACK_SIZE: usize = 1024 * 1024;
const LONG_TIMEOUT: Duration = Duration::from_secs(60);

fn validate_sandbox_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    let sandbox = &config.sandbox;

    if sandbox.timeout.is_zero() {
        result = result.with_error(
            ValidationIssue::new("sandbox.timeout", "Timeout must be greater than zero")
                .with_suggestion("Set sandbox.timeout to a duration such as \"5s\""),
        );
    } else if sandbox.timeout > LONG_TIMEOUT {
        result = result.with_warning(
            ValidationIssue::new(
                "sandbox.timeout",
                format!(
                    "Timeout of {} lets a runaway snippet hold an executor thread for a long time",
                    humantime::format_duration(sandbox.timeout)
                ),
            )
            .with_suggestion("Keep sandbox.timeout at or below 60s"),
        );
    }

    if sandbox.fuel_limit == 0 {
        result = result.with_error(
            ValidationIssue::new("sandbox.fuel_limit", "Step budget of 0 fails every invocation")
                .with_suggestion("Set sandbox.fuel_limit to a positive number of steps"),
        );
    }

    if sandbox.max_call_depth == 0 {
        result = result.with_error(
            ValidationIssue::new("sandbox.max_call_depth", "Call depth limit of 0 rejects every function call")
                .with_suggestion("Set sandbox.max_call_depth to at least 1"),
        );
    }

    if sandbox.stack_size_bytes < MIN_STACK_SIZE {
        result = result.with_error(
            ValidationIssue::new(
                "sandbox.stack_size_bytes",
                format!(
                    "Executor stack of {} bytes is too small to run the interpreter",
                    sandbox.stack_size_bytes
                ),
            )
            .with_suggestion(format!("Use at least {} bytes", MIN_STACK_SIZE)),
        );
    }

    if sandbox.max_console_lines == 0 || sandbox.max_console_bytes == 0 {
        result = result.with_warning(
            ValidationIssue::new("sandbox.max_console_lines", "Console capture is disabled; consoleLogs will be empty")
                .with_suggestion("Set sandbox.max_console_lines and sandbox.max_console_bytes above 0 to capture output"),
        );
    }

    result
}

fn validate_log_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    if let Err(e) = tracing_subscriber::EnvFilter::try_new(&config.log.filter) {
        result = result.with_error(
            ValidationIssue::new("log.filter", format!("Invalid filter directive: {}", e))
                .with_suggestion("Use a directive such as \"praxis=info\""),
        );
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        let config = Config::default();
        let result = validate_config(&config);

        assert!(result.valid);
        assert!(result.errors.is_empty());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_zero_limits_are_errors() {
        let mut config = Config::default();
        config.sandbox.timeout = Duration::ZERO;
        config.sandbox.fuel_limit = 0;
        config.sandbox.max_call_depth = 0;
        config.sandbox.stack_size_bytes = 4096;

        let result = validate_config(&config);
        assert!(!result.valid);
        let paths: Vec<_> = result.errors.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "sandbox.timeout",
                "sandbox.fuel_limit",
                "sandbox.max_call_depth",
                "sandbox.stack_size_bytes"
            ]
        );
    }

    #[test]
    fn test_warnings_keep_config_valid() {
        let mut config = Config::default();
        config.sandbox.timeout = Duration::from_secs(120);
        config.sandbox.max_console_lines = 0;

        let result = validate_config(&config);
        assert!(result.valid);
        assert_eq!(result.warnings.len(), 2);
        assert!(result.warnings[0].message.contains("2m"));
    }

    #[test]
    fn test_bad_log_filter() {
        let mut config = Config::default();
        config.log.filter = "praxis=loud".to_string();

        let result = validate_config(&config);
        assert!(!result.valid);
        assert_eq!(result.errors[0].path, "log.filter");
    }
}
