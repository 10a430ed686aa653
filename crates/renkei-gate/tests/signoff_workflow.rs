//! Integration tests for workflow signoff with real child processes.

use renkei_gate::fakes::{FixedClock, MapEnv};
use renkei_gate::{
    evaluate_workflow_signoff, Envelope, ErrorCode, SignoffDeps, TokioCommandRunner,
    WorkflowDescriptor, WorkflowSignoffFailure,
};
use serde_json::Value;

const LIVE_ENV: &str = "OPENCODE_SERVER_URL";

fn deps<'a>(
    env: &'a MapEnv,
    runner: &'a TokioCommandRunner,
    clock: &'a FixedClock,
) -> SignoffDeps<'a> {
    SignoffDeps {
        clock,
        env,
        runner,
        live_server_env: LIVE_ENV,
    }
}

/// Test: every workflow exits as expected
#[tokio::test]
async fn test_real_commands_pass_in_order() {
    let env = MapEnv::new();
    let runner = TokioCommandRunner::new();
    let clock = FixedClock::new(1_700_000_000_000);

    let workflows = vec![
        WorkflowDescriptor::new("shell:true", ["true"]),
        WorkflowDescriptor::new("shell:echo", ["echo", "signoff"]),
        WorkflowDescriptor::new("shell:false", ["false"]).expecting(1),
    ];

    let report = evaluate_workflow_signoff(&workflows, deps(&env, &runner, &clock))
        .await
        .expect("signoff failed");

    assert!(report.pass);
    assert_eq!(report.checked_at_ms, 1_700_000_000_000);
    let codes: Vec<i32> = report.workflows.iter().map(|row| row.exit_code).collect();
    assert_eq!(codes, vec![0, 0, 1]);
}

/// Test: an unexpected exit code stops signoff and carries stderr
#[tokio::test]
async fn test_failing_command_reports_stderr() {
    let env = MapEnv::new();
    let runner = TokioCommandRunner::new();
    let clock = FixedClock::new(0);

    let workflows = vec![
        WorkflowDescriptor::new("shell:stderr", ["sh", "-c", "echo broken >&2; exit 4"]),
        WorkflowDescriptor::new("shell:never", ["true"]),
    ];

    let err = evaluate_workflow_signoff(&workflows, deps(&env, &runner, &clock))
        .await
        .unwrap_err();

    assert_eq!(err.code(), "WORKFLOW_SIGNOFF_COMMAND_FAILED");
    match &err {
        WorkflowSignoffFailure::CommandFailed {
            workflow_id,
            actual_exit_code,
            stderr,
            ..
        } => {
            assert_eq!(workflow_id, "shell:stderr");
            assert_eq!(*actual_exit_code, 4);
            assert!(stderr.contains("broken"));
        }
        other => panic!("expected command failure, got {other:?}"),
    }

    let envelope: Value = serde_json::to_value(Envelope(&Err::<(), _>(err))).unwrap();
    assert_eq!(envelope["error"]["workflowID"], "shell:stderr");
    assert_eq!(envelope["error"]["expectedExitCode"], 0);
    assert_eq!(envelope["error"]["actualExitCode"], 4);
}

/// Test: live workflows need the server variable before anything runs
#[tokio::test]
async fn test_live_workflow_without_server() {
    let env = MapEnv::new();
    let runner = TokioCommandRunner::new();
    let clock = FixedClock::new(0);

    let scratch = tempfile::tempdir().unwrap();
    let marker = scratch.path().join("ran");
    let workflows = vec![WorkflowDescriptor::new(
        "live:touch",
        ["touch".to_string(), marker.to_string_lossy().into_owned()],
    )
    .live()];

    let err = evaluate_workflow_signoff(&workflows, deps(&env, &runner, &clock))
        .await
        .unwrap_err();

    assert_eq!(err.code(), "WORKFLOW_SIGNOFF_LIVE_SERVER_REQUIRED");
    assert!(!marker.exists());
}
