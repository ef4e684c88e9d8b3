//! # Praxis
//!
//! A sandboxed execution engine for exercise checking. A learner's snippet
//! runs in a fresh, isolated executor; assertion-style test expressions are
//! then evaluated against the bindings the snippet produced, and every test
//! gets a pass/fail verdict alongside the captured console output.
//!
//! ## Features
//!
//! - **Isolated runs:** one executor thread per run, never reused
//! - **Resource guards:** step budget, call depth, collection size, wall clock
//! - **Failures as data:** nothing raised by the snippet reaches the host
//!
//! ```no_run
//! use praxis::sandbox::{SandboxHost, Test, TestExecutor};
//! use praxis::config::SandboxConfig;
//!
//! # async fn demo() -> praxis::Result<()> {
//! let host = SandboxHost::new(SandboxConfig::default());
//! let response = host
//!     .run_tests(
//!         "function add(a, b) { return a + b; }".to_string(),
//!         vec![Test::new("adds", "add(2, 3) === 5")],
//!     )
//!     .await?;
//! assert!(response.all_passed());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod sandbox;
pub mod script;

pub use config::Config;
pub use error::{Error, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");
