//! Pure surface contract: the host may expose only approved surfaces, each
//! at most once, and every required surface must be available.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::registry::ApprovedSurfaceRegistry;
use super::CompositionSurfaceId;
use crate::clock::Clock;
use crate::outcome::ErrorCode;
use crate::probe::{CapabilityReport, ProbeError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(
    tag = "code",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum SurfaceGateViolation {
    #[error("capability report from {server_url} lists no surfaces")]
    SurfaceReportEmpty { server_url: String },

    #[error("capability report lists {surface} more than once")]
    SurfaceReportContainsDuplicate { surface: CompositionSurfaceId },

    #[error("surface {surface} is not in the approved registry")]
    SurfaceNotApproved {
        surface: CompositionSurfaceId,
        approved: Vec<CompositionSurfaceId>,
    },

    #[error("required surface {surface} is unavailable")]
    RequiredSurfaceUnavailable {
        surface: CompositionSurfaceId,
        probe_error: ProbeError,
    },
}

impl ErrorCode for SurfaceGateViolation {
    fn code(&self) -> &'static str {
        match self {
            SurfaceGateViolation::SurfaceReportEmpty { .. } => "SURFACE_REPORT_EMPTY",
            SurfaceGateViolation::SurfaceReportContainsDuplicate { .. } => {
                "SURFACE_REPORT_CONTAINS_DUPLICATE"
            }
            SurfaceGateViolation::SurfaceNotApproved { .. } => "SURFACE_NOT_APPROVED",
            SurfaceGateViolation::RequiredSurfaceUnavailable { .. } => {
                "REQUIRED_SURFACE_UNAVAILABLE"
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurfaceGateEvaluation {
    pub checked_at_ms: i64,
    pub approved: Vec<CompositionSurfaceId>,
    pub required: Vec<CompositionSurfaceId>,
    pub report_surface_count: usize,
}

/// Check `report` against the approved registry and the required set.
pub fn enforce_pure_surface_contract(
    report: &CapabilityReport,
    required: &[CompositionSurfaceId],
    registry: &ApprovedSurfaceRegistry,
    clock: &dyn Clock,
) -> Result<SurfaceGateEvaluation, SurfaceGateViolation> {
    if report.composition.is_empty() {
        return Err(SurfaceGateViolation::SurfaceReportEmpty {
            server_url: report.server_url.clone(),
        });
    }

    let mut seen = HashSet::new();
    if let Some(item) = report.composition.iter().find(|item| !seen.insert(item.id)) {
        return Err(SurfaceGateViolation::SurfaceReportContainsDuplicate { surface: item.id });
    }

    if let Some(item) = report
        .composition
        .iter()
        .find(|item| !registry.is_approved(item.id.as_str()))
    {
        return Err(SurfaceGateViolation::SurfaceNotApproved {
            surface: item.id,
            approved: registry.approved(),
        });
    }

    if let Some(&surface) = required.iter().find(|&&s| !report.is_available(s)) {
        return Err(SurfaceGateViolation::RequiredSurfaceUnavailable {
            surface,
            probe_error: ProbeError::missing_surface(surface),
        });
    }

    Ok(SurfaceGateEvaluation {
        checked_at_ms: clock.now_ms(),
        approved: registry.approved(),
        required: required.to_vec(),
        report_surface_count: report.composition.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FixedClock;
    use crate::probe::CompositionSurface;
    use crate::surfaces::registry::parse_approved_surface_registry;
    use serde_json::json;

    fn report(items: &[(CompositionSurfaceId, bool)]) -> CapabilityReport {
        CapabilityReport {
            server_url: "http://127.0.0.1:4099".to_string(),
            composition: items
                .iter()
                .map(|&(id, available)| CompositionSurface { id, available })
                .collect(),
            probed_at: 0,
        }
    }

    fn registry(ids: &[&str]) -> ApprovedSurfaceRegistry {
        let json = serde_json::to_string(ids).unwrap();
        parse_approved_surface_registry("approved.json", &json, 0).unwrap()
    }

    fn all_available() -> CapabilityReport {
        report(&CompositionSurfaceId::ALL.map(|id| (id, true)))
    }

    #[test]
    fn test_passes_when_everything_lines_up() {
        let approved = registry(&["tool-registry", "plugin-hooks", "skill-load", "sdk-client"]);
        let evaluation = enforce_pure_surface_contract(
            &all_available(),
            &CompositionSurfaceId::ALL,
            &approved,
            &FixedClock::new(3),
        )
        .unwrap();

        assert_eq!(evaluation.report_surface_count, 4);
        assert_eq!(evaluation.required, CompositionSurfaceId::ALL.to_vec());
        assert_eq!(evaluation.checked_at_ms, 3);
    }

    #[test]
    fn test_empty_report() {
        let err = enforce_pure_surface_contract(
            &report(&[]),
            &[],
            &registry(&["tool-registry"]),
            &FixedClock::new(0),
        )
        .unwrap_err();
        assert_eq!(err.code(), "SURFACE_REPORT_EMPTY");
    }

    #[test]
    fn test_duplicate_surface() {
        let err = enforce_pure_surface_contract(
            &report(&[
                (CompositionSurfaceId::SkillLoad, true),
                (CompositionSurfaceId::SkillLoad, false),
            ]),
            &[],
            &registry(&["skill-load"]),
            &FixedClock::new(0),
        )
        .unwrap_err();
        assert_eq!(
            err,
            SurfaceGateViolation::SurfaceReportContainsDuplicate {
                surface: CompositionSurfaceId::SkillLoad
            }
        );
    }

    #[test]
    fn test_unapproved_surface_lists_approved() {
        let err = enforce_pure_surface_contract(
            &all_available(),
            &[],
            &registry(&["tool-registry", "plugin-hooks"]),
            &FixedClock::new(0),
        )
        .unwrap_err();
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({
                "code": "SURFACE_NOT_APPROVED",
                "surface": "skill-load",
                "approved": ["tool-registry", "plugin-hooks"]
            })
        );
    }

    #[test]
    fn test_required_surface_unavailable_carries_probe_error() {
        let err = enforce_pure_surface_contract(
            &report(&[
                (CompositionSurfaceId::ToolRegistry, true),
                (CompositionSurfaceId::SdkClient, false),
            ]),
            &[CompositionSurfaceId::ToolRegistry, CompositionSurfaceId::SdkClient],
            &registry(&["tool-registry", "sdk-client"]),
            &FixedClock::new(0),
        )
        .unwrap_err();

        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["code"], "REQUIRED_SURFACE_UNAVAILABLE");
        assert_eq!(value["surface"], "sdk-client");
        assert_eq!(value["probeError"]["code"], "MISSING_REQUIRED_SURFACE");
        assert_eq!(
            value["probeError"]["message"],
            "Required composition surface unavailable: sdk-client"
        );
    }
}
