//! Sandbox module - Isolated execution of untrusted snippets and tests
//!
//! - types.rs: request/response shapes crossing the host/executor boundary
//! - assembler.rs: source strings to units callable against a binding scope
//! - capture.rs: console capture with guaranteed restore
//! - worker.rs: the isolated executor algorithm
//! - host.rs: per-run executor threads, timeout and cancellation
//! - executor.rs: the `TestExecutor` trait

mod assembler;
mod capture;
mod executor;
mod host;
mod types;
mod worker;

pub use assembler::{Assembled, Assembler, UnitKind};
pub use capture::{CaptureGuard, OutputCapture, Recorder};
pub use executor::TestExecutor;
pub use host::{SandboxHost, TERMINATED_MESSAGE};
pub use types::{ExecutionRequest, ExecutionResponse, Test, TestResult};
pub use worker::{execute, GLOBAL_ERROR_PREFIX};

use crate::config::SandboxConfig;

/// Create the default executor for `config`
pub fn create_executor(config: &SandboxConfig) -> Box<dyn TestExecutor> {
    Box::new(SandboxHost::new(config.clone()))
}
