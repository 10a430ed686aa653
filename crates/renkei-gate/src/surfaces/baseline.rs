//! No-degradation baseline: the host must expose exactly the expected
//! number of available composition surfaces.

use serde::{Deserialize, Serialize};

use super::CompositionSurfaceId;
use crate::outcome::ErrorCode;
use crate::probe::CapabilityReport;
use crate::startup::StartupTimings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineRequirement {
    pub required_composition_surface_count: usize,
}

impl Default for BaselineRequirement {
    fn default() -> Self {
        Self {
            required_composition_surface_count: CompositionSurfaceId::ALL.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineStatus {
    pub composition_surface_count: usize,
    pub startup_timings_ms: StartupTimings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineEvaluation {
    pub requirement: BaselineRequirement,
    pub status: BaselineStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(
    tag = "code",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum BaselineViolation {
    #[error("expected {expected} available composition surfaces, found {actual}")]
    BaselineCompositionSurfaceCountMismatch { expected: usize, actual: usize },
}

impl ErrorCode for BaselineViolation {
    fn code(&self) -> &'static str {
        match self {
            BaselineViolation::BaselineCompositionSurfaceCountMismatch { .. } => {
                "BASELINE_COMPOSITION_SURFACE_COUNT_MISMATCH"
            }
        }
    }
}

pub fn evaluate_no_degradation_baseline(
    report: &CapabilityReport,
    timings: StartupTimings,
    requirement: BaselineRequirement,
) -> Result<BaselineEvaluation, BaselineViolation> {
    let actual = report.available_count();
    if actual != requirement.required_composition_surface_count {
        return Err(BaselineViolation::BaselineCompositionSurfaceCountMismatch {
            expected: requirement.required_composition_surface_count,
            actual,
        });
    }

    Ok(BaselineEvaluation {
        requirement,
        status: BaselineStatus {
            composition_surface_count: actual,
            startup_timings_ms: timings,
        },
    })
}
