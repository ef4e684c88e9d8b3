//! Common executor trait

use async_trait::async_trait;

use super::types::{ExecutionResponse, Test};
use crate::error::Result;

/// Trait for test execution backends
///
/// Implementations must turn every failure of the code under test into
/// [`TestResult`](super::TestResult)s; `Err` is reserved for a run that could
/// not be started.
#[async_trait]
pub trait TestExecutor: Send + Sync {
    /// Get the executor name
    fn name(&self) -> &str;

    /// Run `user_code`, then each test against the bindings it produced
    async fn run_tests(&self, user_code: String, tests: Vec<Test>) -> Result<ExecutionResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::TestResult;

    /// Passes every test whose code is literally `true`.
    struct Literal;

    #[async_trait]
    impl TestExecutor for Literal {
        fn name(&self) -> &str {
            "literal"
        }

        async fn run_tests(&self, _user_code: String, tests: Vec<Test>) -> Result<ExecutionResponse> {
            let results = tests
                .into_iter()
                .map(|t| {
                    if t.code == "true" {
                        TestResult::pass(t.description)
                    } else {
                        TestResult::fail(t.description, "nope")
                    }
                })
                .collect();
            Ok(ExecutionResponse {
                results,
                console_logs: Vec::new(),
            })
        }
    }

    #[tokio::test]
    async fn test_trait_object() {
        let executor: Box<dyn TestExecutor> = Box::new(Literal);
        assert_eq!(executor.name(), "literal");

        let response = executor
            .run_tests(String::new(), vec![Test::new("a", "true"), Test::new("b", "false")])
            .await
            .unwrap();
        assert_eq!(response.failures().count(), 1);
    }
}
