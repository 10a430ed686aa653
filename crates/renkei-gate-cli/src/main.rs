//! Renkei Gate - startup gate CLI
//!
//! The `renkei-gate` command decides whether a host runtime may accept work.
//!
//! ## Commands
//!
//! - `validate`: Run the full no-degradation pipeline
//! - `readiness`: Check only the host health endpoint
//! - `preflight`: Check runbook variables, paths and working directory
//! - `signoff`: Run the canonical signoff workflows
//! - `boundary`: Run the startup boundary self-check
//!
//! Exit code is 0 on success and 1 on any gate failure. With `--json` the
//! only thing written to stdout is the result envelope.

use std::fmt::Display;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, Level};

use renkei_gate::config::select_server_url;
use renkei_gate::workdir::{FsPathProbe, GitMarkerResolver};
use renkei_gate::{
    canonical_workflows, check_host_readiness, evaluate_workflow_signoff, resolve_server_url,
    run_no_degradation_pipeline, verify_environment_preflight, verify_startup_boundary,
    DefaultUrlParser, Envelope, EnvironmentPreflightInput, ErrorCode, ExitCodeContract,
    GateConfig, HostReadiness, HostReadinessInput, NoDegradationInput, PipelineDeps,
    PreflightDeps, ProcessEnv, ReqwestTransport, SignoffDeps, StartupBoundaryEvidence,
    StartupError, SystemClock, TokioCommandRunner,
};

#[derive(Parser)]
#[command(name = "renkei-gate")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Startup gate for an HTTP-hosted agent runtime", long_about = None)]
struct Cli {
    /// Print the result envelope as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every gate stage against a live host
    Validate {
        /// Host base URL (falls back to the configured server URL variable)
        #[arg(long)]
        server_url: Option<String>,

        /// Working directory for the SDK session and registry lookup
        #[arg(long, default_value = ".")]
        cwd: PathBuf,

        /// Approved-surface registry, relative to --cwd
        #[arg(long)]
        registry: Option<String>,

        /// Required composition surfaces (comma separated)
        #[arg(long, value_delimiter = ',')]
        surfaces: Option<Vec<String>>,

        /// Readiness and probe deadline in milliseconds
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        timeout_ms: Option<u64>,
    },

    /// Check the host health endpoint
    Readiness {
        /// Host base URL (falls back to the configured server URL variable)
        #[arg(long)]
        server_url: Option<String>,

        /// Deadline in milliseconds
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        timeout_ms: Option<u64>,

        /// Health path appended to the base URL
        #[arg(long)]
        health_path: Option<String>,
    },

    /// Check runbook environment variables, paths and working directory
    Preflight {
        /// Variable that must be set (repeatable)
        #[arg(long = "require-env")]
        required_env: Vec<String>,

        /// Path that must exist, relative to --cwd (repeatable)
        #[arg(long = "require-path")]
        required_paths: Vec<String>,

        /// Directory the runbook is executed from
        #[arg(long, default_value = ".")]
        cwd: PathBuf,
    },

    /// Run the canonical signoff workflows
    Signoff {
        /// Only run these workflow ids (repeatable)
        #[arg(long = "only")]
        only: Vec<String>,

        /// Directory the workflow commands run in
        #[arg(long, default_value = ".")]
        cwd: PathBuf,
    },

    /// Verify the startup protocol's own contract
    Boundary,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    renkei_gate::telemetry::init_tracing(cli.log_json, level);

    let config = GateConfig::from_env(&ProcessEnv).context("Invalid gate configuration")?;
    debug!(?config, "resolved gate configuration");

    let exit_code = match cli.command {
        Commands::Validate {
            server_url,
            cwd,
            registry,
            surfaces,
            timeout_ms,
        } => {
            cmd_validate(
                &config,
                server_url.as_deref(),
                cwd,
                registry,
                surfaces,
                timeout_ms,
                cli.json,
            )
            .await?
        }
        Commands::Readiness {
            server_url,
            timeout_ms,
            health_path,
        } => {
            cmd_readiness(
                &config,
                server_url.as_deref(),
                timeout_ms,
                health_path,
                cli.json,
            )
            .await?
        }
        Commands::Preflight {
            required_env,
            required_paths,
            cwd,
        } => cmd_preflight(&config, required_env, required_paths, cwd, cli.json).await?,
        Commands::Signoff { only, cwd } => cmd_signoff(&config, &only, cwd, cli.json).await?,
        Commands::Boundary => cmd_boundary(cli.json)?,
    };

    std::process::exit(exit_code);
}

/// Print `result` and return the exit code it maps to.
fn emit<V, E>(label: &str, result: &Result<V, E>, json: bool) -> Result<i32>
where
    V: Serialize,
    E: Serialize + ErrorCode + Display,
{
    if json {
        println!("{}", serde_json::to_string(&Envelope(result))?);
    } else {
        match result {
            Ok(value) => {
                println!("✓ {label} passed");
                println!("{}", serde_json::to_string_pretty(value)?);
            }
            Err(e) => println!("✗ {label} failed [{}]: {e}", e.code()),
        }
    }
    Ok(ExitCodeContract::CANONICAL.exit_code(result))
}

fn absolute(cwd: PathBuf) -> Result<PathBuf> {
    std::path::absolute(&cwd).with_context(|| format!("Failed to resolve {}", cwd.display()))
}

async fn cmd_validate(
    config: &GateConfig,
    server_url: Option<&str>,
    cwd: PathBuf,
    registry: Option<String>,
    surfaces: Option<Vec<String>>,
    timeout_ms: Option<u64>,
    json: bool,
) -> Result<i32> {
    let cwd = absolute(cwd)?;
    let resolved = select_server_url(server_url, &ProcessEnv, &config.server_url_env);
    if let Some(resolved) = &resolved {
        debug!(url = %resolved.url, source = ?resolved.source, "server url selected");
    }

    let mut input = NoDegradationInput::from_config(config, resolved.map(|r| r.url), cwd.clone());
    if let Some(path) = registry {
        input.approved_registry_path = Some(path);
    }
    if let Some(surfaces) = surfaces {
        input.required_surfaces = Some(surfaces);
    }
    if let Some(ms) = timeout_ms {
        input.timeout_ms = ms;
    }

    let result = run_no_degradation_pipeline(&input, &PipelineDeps::production(cwd)).await;
    emit("validate", &result, json)
}

async fn readiness(
    config: &GateConfig,
    server_url: Option<&str>,
    timeout_ms: Option<u64>,
    health_path: Option<String>,
) -> Result<HostReadiness, StartupError> {
    let resolved =
        resolve_server_url(server_url, &ProcessEnv, &config.server_url_env, &DefaultUrlParser)?;
    let input = HostReadinessInput::new(resolved.url, timeout_ms.unwrap_or(config.timeout_ms))
        .with_health_path(health_path.unwrap_or_else(|| config.health_path.clone()));
    check_host_readiness(&input, &ReqwestTransport::default(), &SystemClock).await
}

async fn cmd_readiness(
    config: &GateConfig,
    server_url: Option<&str>,
    timeout_ms: Option<u64>,
    health_path: Option<String>,
    json: bool,
) -> Result<i32> {
    let result = readiness(config, server_url, timeout_ms, health_path).await;
    emit("readiness", &result, json)
}

async fn cmd_preflight(
    config: &GateConfig,
    required_env: Vec<String>,
    required_paths: Vec<String>,
    cwd: PathBuf,
    json: bool,
) -> Result<i32> {
    let cwd = absolute(cwd)?;
    let mut input = EnvironmentPreflightInput::new(cwd.clone());
    input.url_env_var = config.server_url_env.clone();
    input.required_env = required_env;
    input.required_paths = required_paths;

    let paths = FsPathProbe::new(&cwd);
    let repo_root = GitMarkerResolver::new();
    let deps = PreflightDeps {
        clock: &SystemClock,
        env: &ProcessEnv,
        url_parser: &DefaultUrlParser,
        paths: &paths,
        repo_root: &repo_root,
    };
    let result = verify_environment_preflight(&input, deps).await;
    emit("preflight", &result, json)
}

async fn cmd_signoff(
    config: &GateConfig,
    only: &[String],
    cwd: PathBuf,
    json: bool,
) -> Result<i32> {
    let workflows: Vec<_> = canonical_workflows()
        .into_iter()
        .filter(|w| only.is_empty() || only.contains(&w.id))
        .collect();

    let runner = TokioCommandRunner::new().in_dir(absolute(cwd)?);
    let deps = SignoffDeps {
        clock: &SystemClock,
        env: &ProcessEnv,
        runner: &runner,
        live_server_env: &config.live_server_env,
    };
    let result = evaluate_workflow_signoff(&workflows, deps).await;
    emit("signoff", &result, json)
}

fn cmd_boundary(json: bool) -> Result<i32> {
    let result = verify_startup_boundary(&StartupBoundaryEvidence::from_crate(), &SystemClock);
    emit("boundary", &result, json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_surfaces_split_on_commas() {
        let cli = Cli::try_parse_from([
            "renkei-gate",
            "validate",
            "--surfaces",
            "tool-registry,sdk-client",
        ])
        .unwrap();
        match cli.command {
            Commands::Validate { surfaces, .. } => {
                assert_eq!(
                    surfaces,
                    Some(vec!["tool-registry".to_string(), "sdk-client".to_string()])
                );
            }
            _ => panic!("expected validate"),
        }
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        for sub in ["validate", "readiness"] {
            let err = Cli::try_parse_from(["renkei-gate", sub, "--timeout-ms", "0"]);
            assert!(err.is_err(), "{sub} accepted a zero timeout");
        }
        assert!(Cli::try_parse_from(["renkei-gate", "readiness", "--timeout-ms", "1"]).is_ok());
    }
}
