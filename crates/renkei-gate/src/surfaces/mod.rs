//! Composition surfaces: the named capabilities the host must expose.
//!
//! - [`registry`]: the approved-surface registry file and its loader
//! - [`gate`]: the pure surface contract applied to a probe report
//! - [`baseline`]: the exact-count no-degradation baseline

pub mod baseline;
pub mod gate;
pub mod registry;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use baseline::{
    evaluate_no_degradation_baseline, BaselineEvaluation, BaselineRequirement, BaselineStatus,
    BaselineViolation,
};
pub use gate::{enforce_pure_surface_contract, SurfaceGateEvaluation, SurfaceGateViolation};
pub use registry::{
    load_approved_surface_registry, parse_approved_surface_registry,
    verify_approved_surface_registry, ApprovedSurfaceEntry, ApprovedSurfaceRegistry,
    FsRegistrySource, RegistryError, RegistrySource, REGISTRY_VERSION,
};

/// Identifier of a composition surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompositionSurfaceId {
    ToolRegistry,
    PluginHooks,
    SkillLoad,
    SdkClient,
}

impl CompositionSurfaceId {
    /// Every known surface, in canonical order.
    pub const ALL: [CompositionSurfaceId; 4] = [
        CompositionSurfaceId::ToolRegistry,
        CompositionSurfaceId::PluginHooks,
        CompositionSurfaceId::SkillLoad,
        CompositionSurfaceId::SdkClient,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CompositionSurfaceId::ToolRegistry => "tool-registry",
            CompositionSurfaceId::PluginHooks => "plugin-hooks",
            CompositionSurfaceId::SkillLoad => "skill-load",
            CompositionSurfaceId::SdkClient => "sdk-client",
        }
    }
}

impl fmt::Display for CompositionSurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names no known surface.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown composition surface: {0}")]
pub struct UnknownSurface(pub String);

impl FromStr for CompositionSurfaceId {
    type Err = UnknownSurface;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| UnknownSurface(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surface_ids_round_trip_through_str() {
        for id in CompositionSurfaceId::ALL {
            assert_eq!(id.as_str().parse::<CompositionSurfaceId>().unwrap(), id);
        }
    }

    #[test]
    fn test_unknown_surface_rejected() {
        let err = "fork-session".parse::<CompositionSurfaceId>().unwrap_err();
        assert!(err.to_string().contains("fork-session"));
    }

    #[test]
    fn test_serde_uses_kebab_case() {
        let json = serde_json::to_string(&CompositionSurfaceId::SdkClient).unwrap();
        assert_eq!(json, "\"sdk-client\"");
    }
}
