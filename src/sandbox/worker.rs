//! The isolated executor: runs one request on the current thread
//!
//! Everything here is single-threaded script state. The host moves a request
//! onto a dedicated thread and calls [`execute`] there; nothing but the
//! returned [`ExecutionResponse`] leaves.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, info};

use super::assembler::Assembler;
use super::capture::OutputCapture;
use super::types::{ExecutionRequest, ExecutionResponse, Test, TestResult};
use crate::config::SandboxConfig;
use crate::script::{
    render_line, BindingScope, CancelToken, Console, Interpreter, Limits, ScriptError, Value,
};

pub const GLOBAL_ERROR_PREFIX: &str = "Global execution error: ";

/// Run the snippet then every test, turning every failure into data.
///
/// A panic inside the interpreter becomes a global failure instead of
/// unwinding into the caller.
pub fn execute(request: &ExecutionRequest, config: &SandboxConfig, cancel: CancelToken) -> ExecutionResponse {
    match panic::catch_unwind(AssertUnwindSafe(|| run(request, config, cancel))) {
        Ok(response) => response,
        Err(payload) => {
            let message = format!("internal interpreter failure: {}", panic_text(payload.as_ref()));
            tracing::error!("{}", message);
            let mut response =
                ExecutionResponse::all_failed(&request.tests, &format!("{}{}", GLOBAL_ERROR_PREFIX, message));
            response.console_logs = vec![render_line(&[
                Value::from("Execution Error:"),
                Value::from(message.as_str()),
            ])];
            response
        }
    }
}

fn run(request: &ExecutionRequest, config: &SandboxConfig, cancel: CancelToken) -> ExecutionResponse {
    let mut interp = Interpreter::new(Limits::from(config), cancel, Console::default());
    let capture = OutputCapture::begin(
        interp.console(),
        config.max_console_lines,
        config.max_console_bytes,
        config.forward_console,
    );
    let scope = interp.new_scope();

    let results = match Assembler::snippet(request.user_code.as_str()).invoke(&mut interp, &scope) {
        Err(err) => {
            let message = err.message();
            debug!(error = %err, "Snippet failed");
            capture.record_failure(&message);
            let error = format!("{}{}", GLOBAL_ERROR_PREFIX, message);
            request
                .tests
                .iter()
                .map(|test| TestResult::fail(test.description.clone(), error.as_str()))
                .collect()
        }
        Ok(_) => request
            .tests
            .iter()
            .map(|test| run_test(&mut interp, &scope, test))
            .collect::<Vec<_>>(),
    };

    let console_logs = capture.finish();
    drop(scope);

    let passed = results.iter().filter(|r: &&TestResult| r.passed).count();
    info!(passed, failed = results.len() - passed, lines = console_logs.len(), "Executor finished");

    ExecutionResponse {
        results,
        console_logs,
    }
}

fn run_test(interp: &mut Interpreter, scope: &BindingScope, test: &Test) -> TestResult {
    let outcome = Assembler::expression(test.code.as_str()).invoke(interp, scope);
    let result = verdict(&test.description, outcome);
    debug!(description = %test.description, passed = result.passed, "Test evaluated");
    result
}

/// Only exactly `true` passes.
fn verdict(description: &str, outcome: Result<Value, ScriptError>) -> TestResult {
    match outcome {
        Ok(Value::Bool(true)) => TestResult::pass(description),
        Ok(value) => TestResult::fail(description, format!("Test returned {}", value.to_js_string())),
        Err(err) => TestResult::fail(description, err.message()),
    }
}

fn panic_text(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn execute_default(user_code: &str, tests: &[(&str, &str)]) -> ExecutionResponse {
        let mut request = ExecutionRequest::new(user_code, Vec::new());
        for (description, code) in tests {
            request = request.with_test(*description, *code);
        }
        execute(&request, &SandboxConfig::default(), CancelToken::new())
    }

    fn errors(response: &ExecutionResponse) -> Vec<Option<&str>> {
        response.results.iter().map(|r| r.error.as_deref()).collect()
    }

    #[test]
    fn test_function_defined_by_snippet() {
        let response = execute_default(
            "function add(a, b) { return a + b; }",
            &[("adds", "add(2, 3) === 5")],
        );
        assert_eq!(response.results, vec![TestResult::pass("adds")]);
        assert!(response.console_logs.is_empty());
    }

    #[test]
    fn test_missing_binding_fails_only_that_test() {
        let response = execute_default("", &[("x is one", "x === 1"), ("sanity", "1 + 1 === 2")]);
        assert_eq!(
            response.results,
            vec![
                TestResult::fail("x is one", "x is not defined"),
                TestResult::pass("sanity"),
            ]
        );
    }

    #[test]
    fn test_non_true_results() {
        let response = execute_default(
            "var x = 2;",
            &[
                ("x is two", "x === 2"),
                ("false", "1 === 2"),
                ("truthy", "x"),
                ("undefined", "undefined"),
                ("array", "[1, 'a']"),
                ("object", "({ a: 1 })"),
            ],
        );
        assert!(response.results[0].passed);
        assert_eq!(
            errors(&response)[1..],
            [
                Some("Test returned false"),
                Some("Test returned 2"),
                Some("Test returned undefined"),
                Some("Test returned 1,a"),
                Some("Test returned [object Object]"),
            ]
        );
    }

    #[test]
    fn test_global_error_fails_every_test() {
        let response = execute_default(
            "console.log('before'); throw new Error('boom');",
            &[("one", "true"), ("two", "true")],
        );
        assert_eq!(
            errors(&response),
            vec![
                Some("Global execution error: boom"),
                Some("Global execution error: boom")
            ]
        );
        assert_eq!(
            response.console_logs,
            vec!["\"before\"".to_string(), "\"Execution Error:\" \"boom\"".to_string()]
        );
    }

    #[test]
    fn test_syntax_error_is_global() {
        let response = execute_default("function broken( {", &[("t", "true")]);
        let error = response.results[0].error.as_deref().unwrap();
        assert!(error.starts_with(GLOBAL_ERROR_PREFIX), "{}", error);
    }

    #[test]
    fn test_thrown_non_error_values() {
        let response = execute_default(
            "",
            &[
                ("string", "(() => { throw 'plain'; })()"),
                ("object", "(() => { throw { message: 'shaped' }; })()"),
                ("number", "(() => { throw 7; })()"),
            ],
        );
        assert_eq!(errors(&response), vec![Some("plain"), Some("shaped"), Some("7")]);
    }

    #[test]
    fn test_results_keep_order_and_duplicates() {
        let tests: Vec<(String, String)> = (0..20)
            .map(|i| (format!("t{}", i % 3), format!("{} % 2 === 0", i)))
            .collect();
        let borrowed: Vec<(&str, &str)> = tests.iter().map(|(d, c)| (d.as_str(), c.as_str())).collect();
        let response = execute_default("", &borrowed);

        assert_eq!(response.results.len(), 20);
        for (i, result) in response.results.iter().enumerate() {
            assert_eq!(result.description, format!("t{}", i % 3));
            assert_eq!(result.passed, i % 2 == 0);
        }
    }

    #[test]
    fn test_tests_share_and_mutate_scope() {
        let response = execute_default(
            "let count = 0; function inc() { count++; console.log(count); return true; }",
            &[("first", "inc()"), ("second", "inc()"), ("count", "count === 2")],
        );
        assert!(response.all_passed());
        assert_eq!(response.console_logs, vec!["1".to_string(), "2".to_string()]);
    }

    #[test]
    fn test_step_budget_is_per_invocation() {
        let config = SandboxConfig::default().with_fuel_limit(5_000);
        let request = ExecutionRequest::new("function spin(n) { let i = 0; while (i < n) i++; return true; }", Vec::new())
            .with_test("small", "spin(100)")
            .with_test("endless", "spin(Infinity)")
            .with_test("small again", "spin(100)");
        let response = execute(&request, &config, CancelToken::new());

        assert!(response.results[0].passed);
        assert_eq!(
            response.results[1].error.as_deref(),
            Some("Execution exceeded the step budget of 5000")
        );
        assert!(response.results[2].passed);
    }

    #[test]
    fn test_cancelled_run_aborts_everything() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let request = ExecutionRequest::new("var x = 1;", Vec::new()).with_test("t", "true");
        let response = execute(&request, &SandboxConfig::default(), cancel);
        assert_eq!(
            response.results[0].error.as_deref(),
            Some("Global execution error: Execution was cancelled")
        );
    }

    #[test]
    fn test_console_capture_limit() {
        let config = SandboxConfig::default().with_console_limits(3, 1024 * 1024);
        let request = ExecutionRequest::new("for (let i = 0; i < 10; i++) console.info(i);", Vec::new());
        let response = execute(&request, &config, CancelToken::new());
        assert_eq!(
            response.console_logs,
            vec!["0", "1", "2", "... output truncated (7 more lines)"]
        );
    }

    #[test]
    fn test_console_byte_limit() {
        let config = SandboxConfig {
            forward_console: false,
            ..SandboxConfig::default()
        };
        let request = ExecutionRequest::new(
            "let s = 'x'.repeat(100000); for (let i = 0; i < 50; i++) console.log(s);",
            Vec::new(),
        );
        let response = execute(&request, &config, CancelToken::new());

        assert_eq!(response.console_logs.len(), 11);
        assert_eq!(response.console_logs[10], "... output truncated (40 more lines)");
        let captured: usize = response.console_logs.iter().map(String::len).sum();
        assert!(captured < config.max_console_bytes + 64, "{}", captured);
    }

    #[test]
    fn test_console_renders_unserializable_arguments() {
        let response = execute_default(
            "const o = {}; o.self = o; function f(x) { return x; } console.log('c', o, f, [1, f]);",
            &[],
        );
        assert_eq!(
            response.console_logs,
            vec!["\"c\" [object Object] function f(x) { return x; } [\n  1,\n  null\n]".to_string()]
        );
    }

    #[test]
    fn test_panic_text() {
        let payload: Box<dyn Any + Send> = Box::new("bad state");
        assert_eq!(panic_text(payload.as_ref()), "bad state");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_text(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(3_u8);
        assert_eq!(panic_text(payload.as_ref()), "unknown panic");
    }
}
