//! Script error types
//!
//! `ScriptError` is what escapes a single invocation of sandboxed code. It is
//! deliberately `Send` and free of interpreter values so the executor can turn
//! it into a verdict string without holding on to script state.

use std::fmt;
use thiserror::Error;

/// Why an invocation was stopped from the outside rather than by the script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The per-invocation step budget ran out
    FuelExhausted(u64),
    /// The host cancelled the run
    Cancelled,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::FuelExhausted(budget) => {
                write!(f, "Execution exceeded the step budget of {}", budget)
            }
            AbortReason::Cancelled => write!(f, "Execution was cancelled"),
        }
    }
}

/// Failure of one snippet or expression invocation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScriptError {
    /// The source could not be parsed
    #[error("SyntaxError: {message} (line {line}, column {column})")]
    Syntax {
        message: String,
        line: usize,
        column: usize,
    },

    /// An uncaught value was thrown by the script
    #[error("Uncaught {message}")]
    Thrown { message: String },

    /// Execution was stopped by a resource guard
    #[error("{0}")]
    Aborted(AbortReason),
}

impl ScriptError {
    pub(crate) fn syntax(message: impl Into<String>, line: usize, column: usize) -> Self {
        ScriptError::Syntax {
            message: message.into(),
            line,
            column,
        }
    }

    /// The bare message reported in test verdicts, without position or prefix.
    pub fn message(&self) -> String {
        match self {
            ScriptError::Syntax { message, .. } => message.clone(),
            ScriptError::Thrown { message } => message.clone(),
            ScriptError::Aborted(reason) => reason.to_string(),
        }
    }

    /// Check if the error came from a resource guard
    pub fn is_aborted(&self) -> bool {
        matches!(self, ScriptError::Aborted(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_strips_position() {
        let err = ScriptError::syntax("Unexpected token '}'", 3, 7);
        assert_eq!(err.message(), "Unexpected token '}'");
        assert!(err.to_string().contains("line 3, column 7"));
    }

    #[test]
    fn test_abort_messages() {
        let err = ScriptError::Aborted(AbortReason::FuelExhausted(1000));
        assert_eq!(err.message(), "Execution exceeded the step budget of 1000");
        assert!(err.is_aborted());
        assert_eq!(
            ScriptError::Aborted(AbortReason::Cancelled).message(),
            "Execution was cancelled"
        );
    }
}
