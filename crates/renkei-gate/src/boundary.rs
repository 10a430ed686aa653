//! Startup boundary self-check.
//!
//! The gate checks its own contract before it checks the host: where the
//! server URL may come from, the startup stage order, the startup error
//! discriminants and the process exit codes. The expected values below are
//! written out independently of the types they guard, so a change to
//! [`StartupStage::ORDER`] or [`StartupError::DISCRIMINANTS`] surfaces here as
//! a violation instead of silently passing.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::config::ServerUrlSource;
use crate::error::StartupError;
use crate::obs;
use crate::outcome::{ErrorCode, ExitCodeContract};
use crate::startup::StartupStage;

const EXPECTED_STAGE_ORDER: [StartupStage; 3] = [
    StartupStage::Readiness,
    StartupStage::Probe,
    StartupStage::Sdk,
];

const EXPECTED_STARTUP_ERROR_DISCRIMINANTS: [&str; 7] = [
    "STARTUP_SERVER_URL_MISSING",
    "STARTUP_SERVER_URL_INVALID",
    "HOST_HEALTH_TIMEOUT",
    "HOST_HEALTH_UNREACHABLE",
    "HOST_HEALTH_INVALID",
    "PROBE_FAILED",
    "SDK_BOOTSTRAP_FAILED",
];

const EXPECTED_SERVER_URL_SOURCES: [ServerUrlSource; 2] =
    [ServerUrlSource::CliArg, ServerUrlSource::EnvVar];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StartupBoundaryInvariant {
    ServerUrlSourceRule,
    StartupStageOrder,
    StartupErrorDiscriminantsStable,
    ExitCodeContractStable,
    UrlBoundaryIntegrationOnly,
}

impl StartupBoundaryInvariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            StartupBoundaryInvariant::ServerUrlSourceRule => "SERVER_URL_SOURCE_RULE",
            StartupBoundaryInvariant::StartupStageOrder => "STARTUP_STAGE_ORDER",
            StartupBoundaryInvariant::StartupErrorDiscriminantsStable => {
                "STARTUP_ERROR_DISCRIMINANTS_STABLE"
            }
            StartupBoundaryInvariant::ExitCodeContractStable => "EXIT_CODE_CONTRACT_STABLE",
            StartupBoundaryInvariant::UrlBoundaryIntegrationOnly => "URL_BOUNDARY_INTEGRATION_ONLY",
        }
    }

    /// What must hold, reported as the violation detail.
    fn requirement(&self) -> &'static str {
        match self {
            StartupBoundaryInvariant::ServerUrlSourceRule => {
                "server URL source must remain CLI arg or OPENCODE_SERVER_URL"
            }
            StartupBoundaryInvariant::StartupStageOrder => {
                "startup stage order must remain readiness -> probe -> sdk"
            }
            StartupBoundaryInvariant::StartupErrorDiscriminantsStable => {
                "startup error discriminants must remain unchanged"
            }
            StartupBoundaryInvariant::ExitCodeContractStable => {
                "exit contract must remain success=0 failure=1"
            }
            StartupBoundaryInvariant::UrlBoundaryIntegrationOnly => {
                "startup path must stay URL-boundary based without direct vendored runtime imports"
            }
        }
    }
}

impl fmt::Display for StartupBoundaryInvariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the facts the boundary check is evaluated against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartupBoundaryEvidence {
    pub server_url_source_rule_holds: bool,
    pub startup_stage_order: Vec<StartupStage>,
    pub startup_error_discriminants: Vec<String>,
    pub exit_code_contract: ExitCodeContract,
    pub imports_direct_vendored_runtime: bool,
}

impl StartupBoundaryEvidence {
    /// Evidence read from this crate's own constants.
    pub fn from_crate() -> Self {
        Self {
            server_url_source_rule_holds: ServerUrlSource::ALL == EXPECTED_SERVER_URL_SOURCES,
            startup_stage_order: StartupStage::ORDER.to_vec(),
            startup_error_discriminants: StartupError::DISCRIMINANTS
                .iter()
                .map(|code| code.to_string())
                .collect(),
            exit_code_contract: ExitCodeContract::CANONICAL,
            // Probe and SDK stages reach the host over HTTP only.
            imports_direct_vendored_runtime: false,
        }
    }
}

/// One evaluated invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvariantCheck {
    pub id: StartupBoundaryInvariant,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl InvariantCheck {
    fn evaluate(id: StartupBoundaryInvariant, ok: bool) -> Self {
        Self {
            id,
            ok,
            detail: (!ok).then(|| id.requirement().to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartupBoundaryReport {
    pub checked_at_ms: i64,
    pub invariants: Vec<InvariantCheck>,
}

/// The first invariant that did not hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "code", rename = "STARTUP_BOUNDARY_VIOLATION")]
#[error("startup boundary violated ({invariant}): {detail}")]
pub struct StartupBoundaryViolation {
    pub invariant: StartupBoundaryInvariant,
    pub detail: String,
}

impl ErrorCode for StartupBoundaryViolation {
    fn code(&self) -> &'static str {
        "STARTUP_BOUNDARY_VIOLATION"
    }
}

/// Evaluate all five invariants in fixed order.
pub fn evaluate_startup_boundary_evidence(
    evidence: &StartupBoundaryEvidence,
    checked_at_ms: i64,
) -> Result<StartupBoundaryReport, StartupBoundaryViolation> {
    let exit = evidence.exit_code_contract;
    let invariants = vec![
        InvariantCheck::evaluate(
            StartupBoundaryInvariant::ServerUrlSourceRule,
            evidence.server_url_source_rule_holds,
        ),
        InvariantCheck::evaluate(
            StartupBoundaryInvariant::StartupStageOrder,
            evidence.startup_stage_order == EXPECTED_STAGE_ORDER,
        ),
        InvariantCheck::evaluate(
            StartupBoundaryInvariant::StartupErrorDiscriminantsStable,
            evidence.startup_error_discriminants == EXPECTED_STARTUP_ERROR_DISCRIMINANTS,
        ),
        InvariantCheck::evaluate(
            StartupBoundaryInvariant::ExitCodeContractStable,
            exit.success == 0 && exit.failure == 1,
        ),
        InvariantCheck::evaluate(
            StartupBoundaryInvariant::UrlBoundaryIntegrationOnly,
            !evidence.imports_direct_vendored_runtime,
        ),
    ];

    if let Some(failed) = invariants.iter().find(|check| !check.ok) {
        let detail = failed.detail.clone().unwrap_or_default();
        obs::emit_boundary_violation(failed.id.as_str(), &detail);
        return Err(StartupBoundaryViolation {
            invariant: failed.id,
            detail,
        });
    }

    Ok(StartupBoundaryReport {
        checked_at_ms,
        invariants,
    })
}

/// Evaluate `evidence`, stamping the report with the clock.
pub fn verify_startup_boundary(
    evidence: &StartupBoundaryEvidence,
    clock: &dyn Clock,
) -> Result<StartupBoundaryReport, StartupBoundaryViolation> {
    evaluate_startup_boundary_evidence(evidence, clock.now_ms())
}
