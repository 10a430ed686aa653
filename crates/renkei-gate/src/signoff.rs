//! Workflow signoff: run an ordered list of external commands and require
//! each to exit with its expected code.

use std::collections::HashSet;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::clock::Clock;
use crate::env::EnvAccessor;
use crate::obs;
use crate::outcome::ErrorCode;

/// One workflow to sign off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDescriptor {
    /// Unique within a signoff list.
    pub id: String,

    /// Command to execute (first element is executable).
    pub command: Vec<String>,

    /// Whether the command needs a reachable host.
    pub requires_live_server: bool,
    /// Exit code that counts as a pass. Zero for every canonical workflow.
    pub expected_exit_code: i32,
}

impl WorkflowDescriptor {
    pub fn new<I, S>(id: impl Into<String>, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            command: command.into_iter().map(Into::into).collect(),
            requires_live_server: false,
            expected_exit_code: 0,
        }
    }

    /// Mark this workflow as needing a live host.
    pub fn live(mut self) -> Self {
        self.requires_live_server = true;
        self
    }

    /// Treat `exit_code` as the passing result for this workflow.
    pub fn expecting(mut self, exit_code: i32) -> Self {
        self.expected_exit_code = exit_code;
        self
    }
}

/// The baseline workflows every change must pass.
pub fn canonical_workflows() -> Vec<WorkflowDescriptor> {
    vec![
        WorkflowDescriptor::new("quality:fmt", ["cargo", "fmt", "--all", "--", "--check"]),
        WorkflowDescriptor::new(
            "quality:lint",
            [
                "cargo",
                "clippy",
                "--workspace",
                "--all-targets",
                "--",
                "-D",
                "warnings",
            ],
        ),
        WorkflowDescriptor::new("quality:test-unit", ["cargo", "test", "--workspace", "--lib"]),
        WorkflowDescriptor::new(
            "runtime:gate-json",
            ["cargo", "run", "-p", "renkei-gate-cli", "--", "validate", "--json"],
        )
        .live(),
        WorkflowDescriptor::new(
            "quality:test-integration",
            ["cargo", "test", "--workspace", "--tests"],
        )
        .live(),
    ]
}

/// Captured result of one command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    fn spawn_failure(stderr: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Runs a command to completion. Failures to start are reported as a
/// non-zero [`CommandOutput`], never as an error.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &[String]) -> CommandOutput;
}

/// Production runner over `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct TokioCommandRunner {
    cwd: Option<PathBuf>,
}

impl TokioCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, command: &[String]) -> CommandOutput {
        let Some((exe, args)) = command.split_first() else {
            return CommandOutput::spawn_failure("command is empty");
        };

        let mut cmd = Command::new(exe);
        cmd.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return CommandOutput::spawn_failure(e.to_string()),
        };

        match child.wait_with_output().await {
            Ok(output) => CommandOutput {
                exit_code: output.status.code().unwrap_or(1),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            },
            Err(e) => CommandOutput::spawn_failure(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "code")]
pub enum WorkflowSignoffFailure {
    #[serde(rename = "WORKFLOW_SIGNOFF_LIST_EMPTY")]
    #[error("workflow list is empty")]
    ListEmpty,

    #[serde(rename = "WORKFLOW_SIGNOFF_DUPLICATE_ID")]
    #[error("duplicate workflow id: {id}")]
    DuplicateId { id: String },

    #[serde(rename = "WORKFLOW_SIGNOFF_LIVE_SERVER_REQUIRED")]
    #[error("workflow {workflow_id} needs a live server but {env_var} is not set")]
    LiveServerRequired {
        #[serde(rename = "workflowID")]
        workflow_id: String,
        #[serde(rename = "envVar")]
        env_var: String,
    },

    #[serde(rename = "WORKFLOW_SIGNOFF_COMMAND_FAILED")]
    #[error("workflow {workflow_id} exited {actual_exit_code}, expected {expected_exit_code}")]
    CommandFailed {
        #[serde(rename = "workflowID")]
        workflow_id: String,
        #[serde(rename = "expectedExitCode")]
        expected_exit_code: i32,
        #[serde(rename = "actualExitCode")]
        actual_exit_code: i32,
        stderr: String,
    },
}

impl ErrorCode for WorkflowSignoffFailure {
    fn code(&self) -> &'static str {
        match self {
            WorkflowSignoffFailure::ListEmpty => "WORKFLOW_SIGNOFF_LIST_EMPTY",
            WorkflowSignoffFailure::DuplicateId { .. } => "WORKFLOW_SIGNOFF_DUPLICATE_ID",
            WorkflowSignoffFailure::LiveServerRequired { .. } => {
                "WORKFLOW_SIGNOFF_LIVE_SERVER_REQUIRED"
            }
            WorkflowSignoffFailure::CommandFailed { .. } => "WORKFLOW_SIGNOFF_COMMAND_FAILED",
        }
    }
}

/// Report row for a workflow that exited as expected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRow {
    pub id: String,
    pub command: Vec<String>,
    /// Always true; failing workflows end signoff with an error instead.
    pub ok: bool,
    /// Exit code the command actually returned. This equals the descriptor's
    /// expected code, so it is 0 for canonical workflows and `n` for a
    /// descriptor built with [`WorkflowDescriptor::expecting`].
    pub exit_code: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSignoffReport {
    /// Clock reading taken after the last workflow passed.
    pub checked_at_ms: i64,
    pub pass: bool,
    /// One row per workflow, in execution order.
    pub workflows: Vec<WorkflowRow>,
}

#[derive(Clone, Copy)]
pub struct SignoffDeps<'a> {
    pub clock: &'a dyn Clock,
    pub env: &'a dyn EnvAccessor,
    pub runner: &'a dyn CommandRunner,
    /// Variable whose presence means a live host is available.
    pub live_server_env: &'a str,
}

fn check_preconditions(workflows: &[WorkflowDescriptor]) -> Result<(), WorkflowSignoffFailure> {
    if workflows.is_empty() {
        return Err(WorkflowSignoffFailure::ListEmpty);
    }

    let mut seen = HashSet::new();
    for workflow in workflows {
        if !seen.insert(workflow.id.as_str()) {
            return Err(WorkflowSignoffFailure::DuplicateId {
                id: workflow.id.clone(),
            });
        }
    }
    Ok(())
}

/// Run `workflows` in order, stopping at the first that cannot run or fails.
pub async fn evaluate_workflow_signoff(
    workflows: &[WorkflowDescriptor],
    deps: SignoffDeps<'_>,
) -> Result<WorkflowSignoffReport, WorkflowSignoffFailure> {
    check_preconditions(workflows)?;

    let mut rows = Vec::with_capacity(workflows.len());
    for workflow in workflows {
        if workflow.requires_live_server && !deps.env.has_non_blank(deps.live_server_env) {
            return Err(WorkflowSignoffFailure::LiveServerRequired {
                workflow_id: workflow.id.clone(),
                env_var: deps.live_server_env.to_string(),
            });
        }

        obs::emit_workflow_started(&workflow.id, &workflow.command);
        let output = deps.runner.run(&workflow.command).await;
        obs::emit_workflow_finished(&workflow.id, output.exit_code, workflow.expected_exit_code);

        if output.exit_code != workflow.expected_exit_code {
            return Err(WorkflowSignoffFailure::CommandFailed {
                workflow_id: workflow.id.clone(),
                expected_exit_code: workflow.expected_exit_code,
                actual_exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }

        rows.push(WorkflowRow {
            id: workflow.id.clone(),
            command: workflow.command.clone(),
            ok: true,
            exit_code: output.exit_code,
        });
    }

    Ok(WorkflowSignoffReport {
        checked_at_ms: deps.clock.now_ms(),
        pass: true,
        workflows: rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FixedClock, MapEnv, RecordingRunner};

    const LIVE_ENV: &str = "OPENCODE_SERVER_URL";

    fn deps<'a>(env: &'a MapEnv, runner: &'a RecordingRunner) -> SignoffDeps<'a> {
        static CLOCK: FixedClock = FixedClock::new(99);
        SignoffDeps {
            clock: &CLOCK,
            env,
            runner,
            live_server_env: LIVE_ENV,
        }
    }

    #[test]
    fn test_canonical_workflows_unique_and_ordered() {
        let workflows = canonical_workflows();
        assert_eq!(workflows.len(), 5);
        assert!(check_preconditions(&workflows).is_ok());
        assert_eq!(workflows[0].id, "quality:fmt");
        let live: Vec<&str> = workflows
            .iter()
            .filter(|w| w.requires_live_server)
            .map(|w| w.id.as_str())
            .collect();
        assert_eq!(live, vec!["runtime:gate-json", "quality:test-integration"]);
    }

    #[tokio::test]
    async fn test_empty_list_rejected() {
        let env = MapEnv::new();
        let runner = RecordingRunner::succeeding();
        let err = evaluate_workflow_signoff(&[], deps(&env, &runner))
            .await
            .unwrap_err();
        assert_eq!(err, WorkflowSignoffFailure::ListEmpty);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected_before_any_run() {
        let env = MapEnv::new();
        let runner = RecordingRunner::succeeding();
        let workflows = vec![
            WorkflowDescriptor::new("a", ["true"]),
            WorkflowDescriptor::new("b", ["true"]),
            WorkflowDescriptor::new("a", ["true"]),
        ];

        let err = evaluate_workflow_signoff(&workflows, deps(&env, &runner))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            WorkflowSignoffFailure::DuplicateId {
                id: "a".to_string()
            }
        );
        assert!(runner.invocations().is_empty());
    }

    #[tokio::test]
    async fn test_live_server_required_never_runs() {
        let env = MapEnv::new().with(LIVE_ENV, "   ");
        let runner = RecordingRunner::succeeding();
        let workflows = vec![WorkflowDescriptor::new("live", ["true"]).live()];

        let err = evaluate_workflow_signoff(&workflows, deps(&env, &runner))
            .await
            .unwrap_err();

        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            serde_json::json!({
                "code": "WORKFLOW_SIGNOFF_LIVE_SERVER_REQUIRED",
                "workflowID": "live",
                "envVar": "OPENCODE_SERVER_URL"
            })
        );
        assert!(runner.invocations().is_empty());
    }

    #[tokio::test]
    async fn test_command_failure_skips_remaining() {
        let env = MapEnv::new();
        let runner = RecordingRunner::succeeding().fail_on("lint", 2, "clippy: 3 warnings");
        let workflows = vec![
            WorkflowDescriptor::new("fmt", ["fmt"]),
            WorkflowDescriptor::new("lint", ["lint"]),
            WorkflowDescriptor::new("test", ["test"]),
        ];

        let err = evaluate_workflow_signoff(&workflows, deps(&env, &runner))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            WorkflowSignoffFailure::CommandFailed {
                workflow_id: "lint".to_string(),
                expected_exit_code: 0,
                actual_exit_code: 2,
                stderr: "clippy: 3 warnings".to_string(),
            }
        );
        assert_eq!(runner.invocations(), vec![vec!["fmt"], vec!["lint"]]);
    }

    #[tokio::test]
    async fn test_all_pass_report_rows_in_order() {
        let env = MapEnv::new().with(LIVE_ENV, "http://127.0.0.1:4099");
        let runner = RecordingRunner::succeeding();
        let workflows = vec![
            WorkflowDescriptor::new("one", ["one"]),
            WorkflowDescriptor::new("two", ["two", "--flag"]).live(),
        ];

        let report = evaluate_workflow_signoff(&workflows, deps(&env, &runner))
            .await
            .unwrap();

        assert!(report.pass);
        assert_eq!(report.checked_at_ms, 99);
        let ids: Vec<&str> = report.workflows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["one", "two"]);
        assert!(report.workflows.iter().all(|r| r.ok && r.exit_code == 0));
        assert_eq!(report.workflows[1].command, vec!["two", "--flag"]);
    }

    #[tokio::test]
    async fn test_nonzero_expected_exit_code() {
        let env = MapEnv::new();
        let runner = RecordingRunner::succeeding().fail_on("neg", 3, "");
        let workflows = vec![WorkflowDescriptor::new("neg", ["neg"]).expecting(3)];

        let report = evaluate_workflow_signoff(&workflows, deps(&env, &runner))
            .await
            .unwrap();
        assert!(report.workflows[0].ok);
        assert_eq!(
            report.workflows[0].exit_code,
            workflows[0].expected_exit_code
        );
    }

    #[tokio::test]
    async fn test_tokio_runner_captures_output() {
        let runner = TokioCommandRunner::new();
        let output = runner
            .run(&["echo".to_string(), "hello".to_string()])
            .await;
        assert_eq!(output.exit_code, 0);
        assert!(output.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_tokio_runner_empty_and_missing_binary() {
        let runner = TokioCommandRunner::new();

        let empty = runner.run(&[]).await;
        assert_eq!(empty.exit_code, 1);
        assert_eq!(empty.stderr, "command is empty");

        let missing = runner
            .run(&["renkei-gate-no-such-binary".to_string()])
            .await;
        assert_eq!(missing.exit_code, 1);
        assert!(!missing.stderr.is_empty());
    }
}
