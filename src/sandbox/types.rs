//! Request and response shapes exchanged between host and executor

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One assertion-style test: an expression expected to evaluate to `true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Test {
    /// Human-readable label, echoed back in the result
    pub description: String,
    /// A single expression
    pub code: String,
}

impl Test {
    pub fn new(description: impl Into<String>, code: impl Into<String>) -> Self {
        Test {
            description: description.into(),
            code: code.into(),
        }
    }
}

/// Request to run a snippet against a list of tests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    /// The learner's source snippet
    pub user_code: String,
    /// Tests, evaluated in order
    #[serde(default)]
    pub tests: Vec<Test>,
}

impl ExecutionRequest {
    /// Create a new execution request
    pub fn new(user_code: impl Into<String>, tests: Vec<Test>) -> Self {
        ExecutionRequest {
            user_code: user_code.into(),
            tests,
        }
    }

    /// Append a test
    pub fn with_test(mut self, description: impl Into<String>, code: impl Into<String>) -> Self {
        self.tests.push(Test::new(description, code));
        self
    }

    /// Decode a request from its JSON wire form
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::InvalidInput(format!("malformed execution request: {}", e)))
    }
}

/// Verdict for one test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub description: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TestResult {
    /// Create a passing result
    pub fn pass(description: impl Into<String>) -> Self {
        TestResult {
            description: description.into(),
            passed: true,
            error: None,
        }
    }

    /// Create a failing result
    pub fn fail(description: impl Into<String>, error: impl Into<String>) -> Self {
        TestResult {
            description: description.into(),
            passed: false,
            error: Some(error.into()),
        }
    }
}

/// Everything a run produces
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResponse {
    /// One result per input test, in input order
    pub results: Vec<TestResult>,
    /// Captured console lines, in call order
    #[serde(default)]
    pub console_logs: Vec<String>,
}

impl ExecutionResponse {
    /// Fail every test with the same message and no captured output
    pub fn all_failed(tests: &[Test], error: &str) -> Self {
        ExecutionResponse {
            results: tests
                .iter()
                .map(|test| TestResult::fail(test.description.clone(), error))
                .collect(),
            console_logs: Vec::new(),
        }
    }

    /// Whether every test passed. Vacuously true with no tests.
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    /// Failing results, in order
    pub fn failures(&self) -> impl Iterator<Item = &TestResult> {
        self.results.iter().filter(|r| !r.passed)
    }
}
