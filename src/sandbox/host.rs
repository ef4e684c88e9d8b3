//! Sandbox host: spawns one executor thread per run and waits for its answer

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use humantime_serde::re::humantime;
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use super::executor::TestExecutor;
use super::types::{ExecutionRequest, ExecutionResponse, Test};
use super::worker;
use crate::config::SandboxConfig;
use crate::error::{Error, Result};
use crate::script::CancelToken;

/// Reported for every test when the executor dies without answering.
pub const TERMINATED_MESSAGE: &str = "Executor terminated without a response";

/// Host-side orchestrator for sandboxed runs
///
/// Each run gets a fresh executor thread that is never reused. A run that
/// outlives `timeout` is cancelled and detached; the caller gets a synthesized
/// failure for every test immediately.
pub struct SandboxHost {
    config: SandboxConfig,
    permits: Option<Arc<Semaphore>>,
}

impl SandboxHost {
    /// Create a new host
    pub fn new(config: SandboxConfig) -> Self {
        let permits = match config.max_concurrent_runs {
            0 => None,
            n => Some(Arc::new(Semaphore::new(n))),
        };
        SandboxHost { config, permits }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Run one request to completion, timeout or executor loss.
    ///
    /// Only a failure to start the executor is an `Err`.
    pub async fn run(&self, request: ExecutionRequest) -> Result<ExecutionResponse> {
        let run_id = Uuid::new_v4();
        let span = info_span!("sandbox_run", %run_id, tests = request.tests.len());
        self.run_in_span(run_id, request).instrument(span).await
    }

    async fn run_in_span(&self, run_id: Uuid, request: ExecutionRequest) -> Result<ExecutionResponse> {
        let permit = self.acquire().await?;
        let tests = request.tests.clone();
        let cancel = CancelToken::new();
        let (tx, rx) = oneshot::channel();

        let started = Instant::now();
        self.spawn_executor(run_id, request, cancel.clone(), tx, permit)?;

        let timeout = self.config.timeout;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => {
                info!(
                    passed = response.results.iter().filter(|r| r.passed).count(),
                    total = response.results.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Run completed"
                );
                Ok(response)
            }
            Ok(Err(_)) => {
                warn!("{}", TERMINATED_MESSAGE);
                Ok(ExecutionResponse::all_failed(&tests, TERMINATED_MESSAGE))
            }
            Err(_) => {
                cancel.cancel();
                warn!("Execution timed out after {:?}", timeout);
                let message = format!("Execution timed out after {}", humantime::format_duration(timeout));
                Ok(ExecutionResponse::all_failed(&tests, &message))
            }
        }
    }

    async fn acquire(&self) -> Result<Option<OwnedSemaphorePermit>> {
        match &self.permits {
            Some(permits) => {
                let permit = permits
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|e| Error::Sandbox(format!("Run limiter closed: {}", e)))?;
                Ok(Some(permit))
            }
            None => Ok(None),
        }
    }

    /// The permit moves into the thread, so a cancelled executor keeps its
    /// slot until it has actually stopped.
    fn spawn_executor(
        &self,
        run_id: Uuid,
        request: ExecutionRequest,
        cancel: CancelToken,
        tx: oneshot::Sender<ExecutionResponse>,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Result<()> {
        let config = self.config.clone();
        let span = Span::current();
        std::thread::Builder::new()
            .name(format!("praxis-executor-{}", run_id))
            .stack_size(config.stack_size_bytes)
            .spawn(move || {
                let _enter = span.enter();
                let _permit = permit;
                let response = worker::execute(&request, &config, cancel);
                if tx.send(response).is_err() {
                    debug!("Host stopped waiting; response discarded");
                }
            })
            .map_err(|e| Error::Sandbox(format!("Failed to spawn executor thread: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl TestExecutor for SandboxHost {
    fn name(&self) -> &str {
        "script"
    }

    async fn run_tests(&self, user_code: String, tests: Vec<Test>) -> Result<ExecutionResponse> {
        self.run(ExecutionRequest::new(user_code, tests)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::TestResult;
    use std::time::Duration;

    fn host() -> SandboxHost {
        SandboxHost::new(SandboxConfig::default())
    }

    fn tests(pairs: &[(&str, &str)]) -> Vec<Test> {
        pairs.iter().map(|(d, c)| Test::new(*d, *c)).collect()
    }

    #[tokio::test]
    async fn test_scenario_function_call() {
        let response = host()
            .run_tests(
                "function add(a,b){return a+b;}".to_string(),
                tests(&[("adds", "add(2,3)===5")]),
            )
            .await
            .unwrap();
        assert_eq!(response.results, vec![TestResult::pass("adds")]);
    }

    #[tokio::test]
    async fn test_scenario_undefined_name() {
        let response = host()
            .run_tests(String::new(), tests(&[("x", "x===1")]))
            .await
            .unwrap();
        assert_eq!(response.results, vec![TestResult::fail("x", "x is not defined")]);
    }

    #[tokio::test]
    async fn test_scenario_mixed_verdicts() {
        let response = host()
            .run_tests(
                "var x=2;".to_string(),
                tests(&[("x is 2", "x===2"), ("wrong", "1===2")]),
            )
            .await
            .unwrap();
        assert_eq!(
            response.results,
            vec![
                TestResult::pass("x is 2"),
                TestResult::fail("wrong", "Test returned false")
            ]
        );
    }

    #[tokio::test]
    async fn test_scenario_global_throw() {
        let response = host()
            .run_tests(
                "throw new Error('boom')".to_string(),
                tests(&[("a", "true"), ("b", "true"), ("c", "true")]),
            )
            .await
            .unwrap();
        assert_eq!(response.results.len(), 3);
        for result in &response.results {
            let error = result.error.as_deref().unwrap();
            assert!(error.starts_with("Global execution error: "));
            assert!(error.contains("boom"));
        }
    }

    #[tokio::test]
    async fn test_unbounded_loop_hits_step_budget() {
        let host = SandboxHost::new(SandboxConfig::default().with_fuel_limit(100_000));
        let response = host
            .run_tests("while(true){}".to_string(), tests(&[("a", "true"), ("b", "true")]))
            .await
            .unwrap();
        assert!(response.results.iter().all(|r| r.error.as_deref()
            == Some("Global execution error: Execution exceeded the step budget of 100000")));
    }

    #[tokio::test]
    async fn test_unbounded_loop_times_out() {
        let config = SandboxConfig::default()
            .with_fuel_limit(u64::MAX)
            .with_timeout(Duration::from_millis(200));
        let host = SandboxHost::new(config);

        let started = Instant::now();
        let response = host
            .run_tests(
                "console.log('spinning'); while(true){}".to_string(),
                tests(&[("a", "true"), ("b", "true")]),
            )
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(
            response.results,
            vec![
                TestResult::fail("a", "Execution timed out after 200ms"),
                TestResult::fail("b", "Execution timed out after 200ms"),
            ]
        );
        assert!(response.console_logs.is_empty());

        // The cancelled executor releases its slot promptly.
        let next = tokio::time::timeout(
            Duration::from_secs(2),
            host.run_tests(String::new(), tests(&[("ok", "true")])),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(next.all_passed());
    }

    #[tokio::test]
    async fn test_concurrent_runs_are_isolated() {
        let host = SandboxHost::new(SandboxConfig::default().with_max_concurrent_runs(0));
        let first = host.run(
            ExecutionRequest::new("var who = 'first'; console.log(who);", Vec::new())
                .with_test("mine", "who === 'first'")
                .with_test("no leak", "typeof second === 'undefined'"),
        );
        let second = host.run(
            ExecutionRequest::new("var who = 'second'; var second = 1; console.log(who);", Vec::new())
                .with_test("mine", "who === 'second'"),
        );
        let (first, second) = tokio::join!(first, second);
        let (first, second) = (first.unwrap(), second.unwrap());

        assert!(first.all_passed(), "{:?}", first.results);
        assert!(second.all_passed(), "{:?}", second.results);
        assert_eq!(first.console_logs, vec!["\"first\"".to_string()]);
        assert_eq!(second.console_logs, vec!["\"second\"".to_string()]);
    }

    #[tokio::test]
    async fn test_runs_do_not_share_state() {
        let host = host();
        host.run_tests("var leaked = 1;".to_string(), Vec::new()).await.unwrap();
        let response = host
            .run_tests(String::new(), tests(&[("fresh", "typeof leaked === 'undefined'")]))
            .await
            .unwrap();
        assert!(response.all_passed());
    }

    #[tokio::test]
    async fn test_deep_recursion_is_a_catchable_range_error() {
        let response = host()
            .run_tests(
                "function down(n) { return down(n + 1); }".to_string(),
                tests(&[
                    ("throws", "down(0)"),
                    (
                        "catchable",
                        "(() => { try { down(0); } catch (e) { return e.name === 'RangeError'; } })()",
                    ),
                ]),
            )
            .await
            .unwrap();
        assert_eq!(
            response.results[0].error.as_deref(),
            Some("Maximum call stack size exceeded")
        );
        assert!(response.results[1].passed, "{:?}", response.results[1]);
    }

    #[tokio::test]
    async fn test_unbounded_nesting_is_released_after_step_budget() {
        let config = SandboxConfig::default()
            .with_fuel_limit(3_000_000)
            .with_timeout(Duration::from_secs(60));
        let host = SandboxHost::new(config);
        let response = host
            .run_tests(
                "let a = []; while (true) a = [a];".to_string(),
                tests(&[("a", "true"), ("b", "true")]),
            )
            .await
            .unwrap();
        assert!(response.results.iter().all(|r| r.error.as_deref()
            == Some("Global execution error: Execution exceeded the step budget of 3000000")));

        let next = host.run_tests(String::new(), tests(&[("ok", "true")])).await.unwrap();
        assert!(next.all_passed());
    }

    #[tokio::test]
    async fn test_deep_structures_can_be_dropped_mid_run() {
        let host = SandboxHost::new(SandboxConfig::default().with_timeout(Duration::from_secs(60)));
        let code = r#"
            let a = [];
            for (let i = 0; i < 200000; i++) a = [a];
            a = 0;
            let o = {};
            for (let i = 0; i < 100000; i++) o = { next: o };
            o = null;
            let f = () => 0;
            for (let i = 0; i < 100000; i++) { const g = f; f = () => g(); }
            f = null;
        "#;
        let response = host
            .run_tests(
                code.to_string(),
                tests(&[("array", "a === 0"), ("object", "o === null"), ("closure", "f === null")]),
            )
            .await
            .unwrap();
        assert!(response.all_passed(), "{:?}", response.results);
    }

    #[tokio::test]
    async fn test_empty_test_list() {
        let response = host().run_tests("console.log({ a: [1, 2] })".to_string(), Vec::new()).await.unwrap();
        assert!(response.results.is_empty());
        assert_eq!(response.console_logs, vec!["{\n  \"a\": [\n    1,\n    2\n  ]\n}".to_string()]);
    }

    #[test]
    fn test_name() {
        assert_eq!(host().name(), "script");
    }
}
