//! Praxis CLI
//!
//! Runs snippets against tests from the command line and manages the
//! configuration file.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use console::style;
use humantime_serde::re::humantime;
use praxis::config::{
    config_path, load_config, read_config_snapshot, save_config, validate_config, Config, LogFormat,
};
use praxis::sandbox::{create_executor, ExecutionRequest, ExecutionResponse, Test, TestExecutor};
use praxis::VERSION;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "praxis",
    author = "Praxis Contributors",
    version = VERSION,
    about = "Praxis - run learner snippets against assertion-style tests in a sandbox",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a snippet file against a JSON array of tests
    Run {
        /// File containing the snippet
        code_file: PathBuf,
        /// JSON file with `[{ "description": ..., "code": ... }, ...]`
        #[arg(long, short)]
        tests: PathBuf,
        /// Wall-clock budget, e.g. "2s" or "500ms"
        #[arg(long, value_parser = humantime::parse_duration)]
        timeout: Option<Duration>,
        /// Print the raw response JSON instead of a report
        #[arg(long)]
        json: bool,
    },

    /// Read an execution request from stdin and write the response to stdout
    Eval {
        /// Wall-clock budget, e.g. "2s" or "500ms"
        #[arg(long, value_parser = humantime::parse_duration)]
        timeout: Option<Duration>,
    },

    /// Show the effective configuration
    Config {
        /// Report validation errors and warnings
        #[arg(long)]
        validate: bool,
    },

    /// Write a default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long, short)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let config = load_config()?;
    init_logging(&config);

    match cli.command {
        Commands::Run {
            code_file,
            tests,
            timeout,
            json,
        } => run_file(config, &code_file, &tests, timeout, json).await,
        Commands::Eval { timeout } => eval_stdin(config, timeout).await,
        Commands::Config { validate } => show_config(&config, validate),
        Commands::InitConfig { force } => init_config(force),
    }
}

/// Logs go to stderr so `eval` output stays machine-readable.
fn init_logging(config: &Config) {
    let filter = EnvFilter::try_new(&config.log.filter).unwrap_or_else(|_| EnvFilter::new("praxis=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    match config.log.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

fn executor_for(mut config: Config, timeout: Option<Duration>) -> Box<dyn TestExecutor> {
    if let Some(timeout) = timeout {
        config.sandbox.timeout = timeout;
    }
    create_executor(&config.sandbox)
}

// ============================================================================
// Running tests
// ============================================================================

async fn run_file(
    config: Config,
    code_file: &Path,
    tests_file: &Path,
    timeout: Option<Duration>,
    json: bool,
) -> anyhow::Result<ExitCode> {
    let user_code = std::fs::read_to_string(code_file)
        .with_context(|| format!("Failed to read {}", code_file.display()))?;
    let raw_tests = std::fs::read_to_string(tests_file)
        .with_context(|| format!("Failed to read {}", tests_file.display()))?;
    let tests = parse_tests(&raw_tests).with_context(|| format!("Invalid tests in {}", tests_file.display()))?;

    info!("Running {} tests from {}", tests.len(), tests_file.display());
    let response = executor_for(config, timeout).run_tests(user_code, tests).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_report(&response);
    }

    Ok(exit_code(&response))
}

async fn eval_stdin(config: Config, timeout: Option<Duration>) -> anyhow::Result<ExitCode> {
    let mut input = String::new();
    io::stdin().read_to_string(&mut input).context("Failed to read stdin")?;
    let request = ExecutionRequest::from_json(&input)?;
    debug!("Evaluating request with {} tests", request.tests.len());

    let executor = executor_for(config, timeout);
    let response = executor.run_tests(request.user_code, request.tests).await?;
    println!("{}", serde_json::to_string(&response)?);
    Ok(exit_code(&response))
}

fn parse_tests(raw: &str) -> anyhow::Result<Vec<Test>> {
    let tests: Vec<Test> = serde_json::from_str(raw)?;
    Ok(tests)
}

fn exit_code(response: &ExecutionResponse) -> ExitCode {
    if response.all_passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn print_report(response: &ExecutionResponse) {
    println!();
    for result in &response.results {
        if result.passed {
            println!("  {} {}", style("✓").green(), result.description);
        } else {
            println!("  {} {}", style("✗").red(), result.description);
            if let Some(error) = &result.error {
                println!("      {}", style(error).red().dim());
            }
        }
    }

    if !response.console_logs.is_empty() {
        println!("\n{}", style("Console output").cyan().bold());
        for line in &response.console_logs {
            for part in line.lines() {
                println!("  {}", style(part).dim());
            }
        }
    }

    let total = response.results.len();
    let failed = response.failures().count();
    let summary = format!("{}/{} tests passed", total - failed, total);
    println!();
    if failed == 0 {
        println!("{}", style(summary).green().bold());
    } else {
        println!("{}", style(summary).red().bold());
    }
}

// ============================================================================
// Configuration
// ============================================================================

fn show_config(config: &Config, validate: bool) -> anyhow::Result<ExitCode> {
    let snapshot = read_config_snapshot(&config_path());
    if snapshot.exists {
        println!("{} {}", style("# Config file:").dim(), snapshot.path.display());
    } else {
        println!(
            "{} {} {}",
            style("# Config file:").dim(),
            snapshot.path.display(),
            style("(not found, using defaults)").dim()
        );
    }
    println!("{}", toml::to_string_pretty(config)?);

    if !validate {
        return Ok(ExitCode::SUCCESS);
    }

    let result = validate_config(config);
    for issue in &result.errors {
        println!("{} {}: {}", style("error").red().bold(), issue.path, issue.message);
        if let Some(suggestion) = &issue.suggestion {
            println!("      {}", style(suggestion).dim());
        }
    }
    for issue in &result.warnings {
        println!("{} {}: {}", style("warning").yellow().bold(), issue.path, issue.message);
        if let Some(suggestion) = &issue.suggestion {
            println!("      {}", style(suggestion).dim());
        }
    }

    if result.valid {
        println!("{}", style("Configuration is valid").green());
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn init_config(force: bool) -> anyhow::Result<ExitCode> {
    let path = config_path();
    if path.exists() && !force {
        bail!("{} already exists; pass --force to overwrite", path.display());
    }

    save_config(&Config::default(), &path)?;
    println!("{} Wrote {}", style("✓").green(), path.display());
    Ok(ExitCode::SUCCESS)
}
