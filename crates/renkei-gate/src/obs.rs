//! Structured observability hooks for gate runs.
//!
//! This module provides:
//! - Run-scoped tracing spans via [`gate_span`]
//! - Emission functions for stage transitions, readiness outcomes,
//!   workflow executions and boundary violations
//!
//! Events are emitted at `info!` level unless noted (filter with
//! `RENKEI_GATE_LOG` or `RUST_LOG`).

use tracing::{info, warn};

/// Span tagged with the run_id for one pipeline run.
///
/// Attach it to the run's future so the future stays `Send`:
///
/// ```ignore
/// use tracing::Instrument;
/// run(input).instrument(gate_span("0b6f…")).await;
/// // every event inside carries run_id = "0b6f…"
/// ```
pub fn gate_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("renkei.gate", run_id = %run_id)
}

pub fn emit_stage_started(stage: &str) {
    info!(event = "gate.stage_started", stage = %stage);
}

pub fn emit_stage_passed(stage: &str, elapsed_ms: u64) {
    info!(event = "gate.stage_passed", stage = %stage, elapsed_ms = elapsed_ms);
}

/// Emit event: stage failed (warning level).
pub fn emit_stage_failed(stage: &str, code: &str, elapsed_ms: u64) {
    warn!(
        event = "gate.stage_failed",
        stage = %stage,
        code = %code,
        elapsed_ms = elapsed_ms,
    );
}

/// Emit event: pipeline finished with verdict and total duration.
pub fn emit_pipeline_finished(pass: bool, total_ms: u64) {
    info!(event = "gate.pipeline_finished", pass = pass, total_ms = total_ms);
}

/// Emit event: the readiness deadline fired before the host answered.
pub fn emit_readiness_timeout(health_url: &str, timeout_ms: u64) {
    warn!(
        event = "readiness.timeout",
        health_url = %health_url,
        timeout_ms = timeout_ms,
    );
}

pub fn emit_readiness_deadline_released(health_url: &str) {
    tracing::trace!(event = "readiness.deadline_released", health_url = %health_url);
}

pub fn emit_workflow_started(workflow_id: &str, command: &[String]) {
    info!(event = "signoff.workflow_started", workflow_id = %workflow_id, command = ?command);
}

pub fn emit_workflow_finished(workflow_id: &str, exit_code: i32, expected_exit_code: i32) {
    info!(
        event = "signoff.workflow_finished",
        workflow_id = %workflow_id,
        exit_code = exit_code,
        expected_exit_code = expected_exit_code,
    );
}

/// Emit event: a boundary invariant failed (warning level).
pub fn emit_boundary_violation(invariant: &str, detail: &str) {
    warn!(event = "boundary.violation", invariant = %invariant, detail = %detail);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_span_create() {
        let _entered = gate_span("test-run-id").entered();
        emit_stage_started("boundary-startup");
    }
}
