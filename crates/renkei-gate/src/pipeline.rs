//! No-degradation validation pipeline.
//!
//! Runs, in order and stopping at the first failure:
//!
//! 1. `prerequisite`: input validation ([`crate::prereq`])
//! 2. `boundary-startup`: boundary self-check, then host startup
//!    (readiness, probe, sdk)
//! 3. `approved-surface-registry`: load and verify the registry file
//! 4. `pure-surface-gate`: the probe report against the registry
//! 5. `baseline`: exact available-surface count
//!
//! Every failure is a [`NoDegradationError`] naming its stage and carrying
//! the stage's own typed error.

use std::path::PathBuf;
use std::sync::Arc;

use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use crate::boundary::{
    verify_startup_boundary, StartupBoundaryEvidence, StartupBoundaryReport,
    StartupBoundaryViolation,
};
use crate::clock::{Clock, SystemClock};
use crate::config::{GateConfig, DEFAULT_SERVER_URL_ENV, DEFAULT_TIMEOUT_MS};
use crate::env::{DefaultUrlParser, UrlParser};
use crate::error::StartupError;
use crate::obs;
use crate::outcome::ErrorCode;
use crate::prereq::{verify_live_prerequisites, LivePrerequisiteInput, PrerequisiteError};
use crate::probe::{
    CapabilityProbe, CapabilityReport, HttpCapabilityProbe, HttpSdkBootstrap, SdkBootstrap,
};
use crate::readiness::{HealthTransport, ReqwestTransport, DEFAULT_HEALTH_PATH};
use crate::stage::{StageLabel, StageSequence};
use crate::startup::{start_host_runtime, StartupDeps, StartupInput, StartupSuccess, StartupTimings};
use crate::surfaces::{
    enforce_pure_surface_contract, evaluate_no_degradation_baseline,
    load_approved_surface_registry, BaselineEvaluation, BaselineRequirement, BaselineViolation,
    CompositionSurfaceId, FsRegistrySource, RegistryError, RegistrySource, SurfaceGateViolation,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineStage {
    Prerequisite,
    BoundaryStartup,
    ApprovedSurfaceRegistry,
    PureSurfaceGate,
    Baseline,
}

impl StageLabel for PipelineStage {
    fn label(&self) -> &'static str {
        match self {
            PipelineStage::Prerequisite => "prerequisite",
            PipelineStage::BoundaryStartup => "boundary-startup",
            PipelineStage::ApprovedSurfaceRegistry => "approved-surface-registry",
            PipelineStage::PureSurfaceGate => "pure-surface-gate",
            PipelineStage::Baseline => "baseline",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoDegradationInput {
    /// Host base URL; `None` or blank fails the prerequisite stage.
    pub server_url: Option<String>,
    /// Variable named in the error when the URL is missing.
    pub server_url_env: String,
    /// Directory for the SDK session and relative registry paths.
    pub cwd: PathBuf,
    /// Deadline shared by readiness and the capability probe.
    pub timeout_ms: u64,
    pub health_path: String,
    /// Surface ids the host must expose. `None` means every known surface.
    pub required_surfaces: Option<Vec<String>>,
    /// Registry file relative to `cwd`. `None` uses the default path.
    pub approved_registry_path: Option<String>,
}

impl NoDegradationInput {
    pub fn new(server_url: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            server_url: Some(server_url.into()),
            server_url_env: DEFAULT_SERVER_URL_ENV.to_string(),
            cwd: cwd.into(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            health_path: DEFAULT_HEALTH_PATH.to_string(),
            required_surfaces: None,
            approved_registry_path: None,
        }
    }

    /// Input built from a resolved configuration.
    pub fn from_config(config: &GateConfig, server_url: Option<String>, cwd: PathBuf) -> Self {
        Self {
            server_url,
            server_url_env: config.server_url_env.clone(),
            cwd,
            timeout_ms: config.timeout_ms,
            health_path: config.health_path.clone(),
            required_surfaces: Some(config.required_surfaces.clone()),
            approved_registry_path: Some(config.approved_registry_path.clone()),
        }
    }
}

/// Failure inside the `boundary-startup` stage: either the self-check or
/// host startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(untagged)]
pub enum BoundaryStartupError {
    #[error(transparent)]
    Boundary(StartupBoundaryViolation),
    #[error(transparent)]
    Startup(StartupError),
}

impl ErrorCode for BoundaryStartupError {
    fn code(&self) -> &'static str {
        match self {
            BoundaryStartupError::Boundary(e) => e.code(),
            BoundaryStartupError::Startup(e) => e.code(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NoDegradationError {
    #[error("prerequisite: {0}")]
    Prerequisite(PrerequisiteError),
    #[error("boundary-startup: {0}")]
    BoundaryStartup(BoundaryStartupError),
    #[error("approved-surface-registry: {0}")]
    ApprovedRegistry(RegistryError),
    #[error("pure-surface-gate: {0}")]
    PureSurfaceGate(SurfaceGateViolation),
    #[error("baseline: {0}")]
    Baseline(BaselineViolation),
}

impl NoDegradationError {
    pub fn stage(&self) -> PipelineStage {
        match self {
            NoDegradationError::Prerequisite(_) => PipelineStage::Prerequisite,
            NoDegradationError::BoundaryStartup(_) => PipelineStage::BoundaryStartup,
            NoDegradationError::ApprovedRegistry(_) => PipelineStage::ApprovedSurfaceRegistry,
            NoDegradationError::PureSurfaceGate(_) => PipelineStage::PureSurfaceGate,
            NoDegradationError::Baseline(_) => PipelineStage::Baseline,
        }
    }

    /// Discriminant of the stage-local error.
    pub fn inner_code(&self) -> &'static str {
        match self {
            NoDegradationError::Prerequisite(e) => e.code(),
            NoDegradationError::BoundaryStartup(e) => e.code(),
            NoDegradationError::ApprovedRegistry(e) => e.code(),
            NoDegradationError::PureSurfaceGate(e) => e.code(),
            NoDegradationError::Baseline(e) => e.code(),
        }
    }
}

impl ErrorCode for NoDegradationError {
    fn code(&self) -> &'static str {
        match self {
            NoDegradationError::Prerequisite(_) => "NO_DEGRADATION_PREREQUISITE_FAILED",
            NoDegradationError::BoundaryStartup(_) => "NO_DEGRADATION_BOUNDARY_FAILED",
            NoDegradationError::ApprovedRegistry(_) => "NO_DEGRADATION_APPROVED_REGISTRY_FAILED",
            NoDegradationError::PureSurfaceGate(_) => "NO_DEGRADATION_PURE_SURFACE_GATE_FAILED",
            NoDegradationError::Baseline(_) => "NO_DEGRADATION_BASELINE_FAILED",
        }
    }
}

impl Serialize for NoDegradationError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("NoDegradationError", 3)?;
        state.serialize_field("code", self.code())?;
        state.serialize_field("stage", &self.stage())?;
        match self {
            NoDegradationError::Prerequisite(e) => state.serialize_field("error", e)?,
            NoDegradationError::BoundaryStartup(e) => state.serialize_field("error", e)?,
            NoDegradationError::ApprovedRegistry(e) => state.serialize_field("error", e)?,
            NoDegradationError::PureSurfaceGate(e) => state.serialize_field("error", e)?,
            NoDegradationError::Baseline(e) => state.serialize_field("error", e)?,
        }
        state.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoDegradationEvidence {
    /// Capability report the surface gate ran against.
    pub report: CapabilityReport,
    /// Number of surfaces in the report, available or not.
    pub composition_surface_count: usize,
    /// Per-stage startup durations, reported and never enforced.
    pub startup_timings_ms: StartupTimings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoDegradationSuccess {
    /// Clock reading taken once the last stage passed.
    pub checked_at_ms: i64,
    /// Always true; any failed stage returns an error instead.
    pub pass: bool,
    /// Trimmed URL the host was started against.
    pub server_url: String,
    /// Surfaces checked by the pure surface gate, in request order.
    pub required_surfaces: Vec<CompositionSurfaceId>,
    /// Startup boundary self-check report.
    pub boundary: StartupBoundaryReport,
    /// Readiness, probe and SDK session from host startup.
    pub startup: StartupSuccess,
    /// Available-surface count against the baseline requirement.
    pub baseline: BaselineEvaluation,
    pub evidence: NoDegradationEvidence,
}

/// Capabilities for one pipeline run.
#[derive(Clone)]
pub struct PipelineDeps {
    pub clock: Arc<dyn Clock>,
    pub url_parser: Arc<dyn UrlParser>,
    pub transport: Arc<dyn HealthTransport>,
    pub probe: Arc<dyn CapabilityProbe>,
    pub sdk: Arc<dyn SdkBootstrap>,
    pub registry_source: Arc<dyn RegistrySource>,
    pub boundary_evidence: StartupBoundaryEvidence,
    pub baseline: BaselineRequirement,
}

impl PipelineDeps {
    /// Real clock, HTTP host access and registry files under `cwd`.
    pub fn production(cwd: impl Into<PathBuf>) -> Self {
        let client = reqwest::Client::new();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            url_parser: Arc::new(DefaultUrlParser),
            transport: Arc::new(ReqwestTransport::new(client.clone())),
            probe: Arc::new(HttpCapabilityProbe::new(client.clone()).with_clock(clock.clone())),
            sdk: Arc::new(HttpSdkBootstrap::new(client).with_clock(clock.clone())),
            registry_source: Arc::new(FsRegistrySource::new(cwd)),
            boundary_evidence: StartupBoundaryEvidence::from_crate(),
            baseline: BaselineRequirement::default(),
            clock,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn HealthTransport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn CapabilityProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_sdk(mut self, sdk: Arc<dyn SdkBootstrap>) -> Self {
        self.sdk = sdk;
        self
    }

    pub fn with_registry_source(mut self, source: Arc<dyn RegistrySource>) -> Self {
        self.registry_source = source;
        self
    }

    pub fn with_boundary_evidence(mut self, evidence: StartupBoundaryEvidence) -> Self {
        self.boundary_evidence = evidence;
        self
    }
}

async fn boundary_startup(
    input: &StartupInput,
    deps: &PipelineDeps,
) -> Result<(StartupBoundaryReport, StartupSuccess), BoundaryStartupError> {
    let boundary = verify_startup_boundary(&deps.boundary_evidence, deps.clock.as_ref())
        .map_err(BoundaryStartupError::Boundary)?;

    let startup = start_host_runtime(
        input,
        StartupDeps {
            clock: deps.clock.as_ref(),
            transport: deps.transport.as_ref(),
            probe: deps.probe.as_ref(),
            sdk: deps.sdk.as_ref(),
        },
    )
    .await
    .map_err(BoundaryStartupError::Startup)?;

    Ok((boundary, startup))
}

/// Run every stage against `input`.
pub async fn run_no_degradation_pipeline(
    input: &NoDegradationInput,
    deps: &PipelineDeps,
) -> Result<NoDegradationSuccess, NoDegradationError> {
    let run_id = Uuid::new_v4().to_string();
    run_stages(input, deps)
        .instrument(obs::gate_span(&run_id))
        .await
}

async fn run_stages(
    input: &NoDegradationInput,
    deps: &PipelineDeps,
) -> Result<NoDegradationSuccess, NoDegradationError> {
    let mut stages = StageSequence::new(deps.clock.as_ref());
    let result = run_sequence(input, deps, &mut stages).await;
    obs::emit_pipeline_finished(result.is_ok(), stages.total_ms());
    result
}

async fn run_sequence(
    input: &NoDegradationInput,
    deps: &PipelineDeps,
    stages: &mut StageSequence<'_, PipelineStage>,
) -> Result<NoDegradationSuccess, NoDegradationError> {
    let clock = deps.clock.as_ref();

    let prereq = stages
        .step(PipelineStage::Prerequisite, async {
            let prereq_input = LivePrerequisiteInput {
                server_url_env: input.server_url_env.clone(),
                server_url: input.server_url.clone(),
                approved_registry_path: input.approved_registry_path.clone(),
                required_surfaces: input.required_surfaces.clone(),
            };
            verify_live_prerequisites(&prereq_input, deps.url_parser.as_ref(), clock)
                .map_err(NoDegradationError::Prerequisite)
        })
        .await?;

    let startup_input = StartupInput {
        server_url: prereq.server_url.clone(),
        cwd: input.cwd.clone(),
        timeout_ms: input.timeout_ms,
        health_path: input.health_path.clone(),
    };
    let (boundary, startup) = stages
        .step(PipelineStage::BoundaryStartup, async {
            boundary_startup(&startup_input, deps)
                .await
                .map_err(NoDegradationError::BoundaryStartup)
        })
        .await?;

    let registry = stages
        .step(PipelineStage::ApprovedSurfaceRegistry, async {
            load_approved_surface_registry(
                &prereq.approved_registry_path,
                deps.registry_source.as_ref(),
                clock,
            )
            .await
            .map_err(NoDegradationError::ApprovedRegistry)
        })
        .await?;

    let gate = stages
        .step(PipelineStage::PureSurfaceGate, async {
            enforce_pure_surface_contract(
                &startup.report,
                &prereq.required_surfaces,
                &registry,
                clock,
            )
            .map_err(NoDegradationError::PureSurfaceGate)
        })
        .await?;

    let baseline = stages
        .step(PipelineStage::Baseline, async {
            evaluate_no_degradation_baseline(&startup.report, startup.timings_ms, deps.baseline)
                .map_err(NoDegradationError::Baseline)
        })
        .await?;

    Ok(NoDegradationSuccess {
        checked_at_ms: clock.now_ms(),
        pass: true,
        server_url: prereq.server_url,
        required_surfaces: prereq.required_surfaces,
        evidence: NoDegradationEvidence {
            report: startup.report.clone(),
            composition_surface_count: gate.report_surface_count,
            startup_timings_ms: startup.timings_ms,
        },
        boundary,
        startup,
        baseline,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::StartupBoundaryInvariant;
    use crate::fakes::{
        MemoryRegistrySource, ScriptedTransport, SteppingClock, StaticProbe, StaticSdk,
    };
    use crate::probe::CompositionSurface;
    use crate::startup::StartupStage;
    use serde_json::json;

    const REGISTRY_PATH: &str = "config/approved-opencode-surfaces.json";

    fn registry_json(ids: &[&str]) -> String {
        json!({
            "version": "2026-02-19",
            "entries": ids.iter().map(|id| json!({
                "id": id,
                "seam": id,
                "upstreamSurface": format!("upstream/{id}"),
                "rationale": "composition seam",
            })).collect::<Vec<_>>(),
        })
        .to_string()
    }

    struct Fixture {
        transport: Arc<ScriptedTransport>,
        probe: Arc<StaticProbe>,
        registry: Arc<MemoryRegistrySource>,
    }

    impl Fixture {
        fn healthy() -> Self {
            Self {
                transport: Arc::new(ScriptedTransport::body(r#"{"healthy":true,"version":"0.9"}"#)),
                probe: Arc::new(StaticProbe::all_surfaces()),
                registry: Arc::new(MemoryRegistrySource::new().with_file(
                    REGISTRY_PATH,
                    registry_json(&["tool-registry", "plugin-hooks", "skill-load", "sdk-client"]),
                )),
            }
        }

        fn deps(&self) -> PipelineDeps {
            PipelineDeps::production("/work/repo")
                .with_clock(Arc::new(SteppingClock::new(10_000, 2)))
                .with_transport(self.transport.clone())
                .with_probe(self.probe.clone())
                .with_sdk(Arc::new(StaticSdk::ok()))
                .with_registry_source(self.registry.clone())
        }
    }

    fn input() -> NoDegradationInput {
        NoDegradationInput::new("http://127.0.0.1:4099", "/work/repo")
    }

    #[test]
    fn test_stage_labels() {
        let value = serde_json::to_value(PipelineStage::ApprovedSurfaceRegistry).unwrap();
        assert_eq!(value, "approved-surface-registry");
        assert_eq!(PipelineStage::BoundaryStartup.label(), "boundary-startup");
    }

    #[tokio::test]
    async fn test_full_pass() {
        let fixture = Fixture::healthy();

        let success = run_no_degradation_pipeline(&input(), &fixture.deps())
            .await
            .unwrap();

        assert!(success.pass);
        assert_eq!(success.server_url, "http://127.0.0.1:4099");
        assert_eq!(success.required_surfaces, CompositionSurfaceId::ALL.to_vec());
        assert_eq!(success.evidence.composition_surface_count, 4);
        assert_eq!(success.boundary.invariants.len(), 5);
        assert_eq!(success.startup.readiness.version.as_deref(), Some("0.9"));
        let timings = success.evidence.startup_timings_ms;
        assert!(timings.total >= timings.readiness + timings.probe + timings.sdk);
    }

    #[tokio::test]
    async fn test_prerequisite_failure_touches_nothing() {
        let fixture = Fixture::healthy();
        let mut input = input();
        input.server_url = None;

        let err = run_no_degradation_pipeline(&input, &fixture.deps())
            .await
            .unwrap_err();

        assert_eq!(err.code(), "NO_DEGRADATION_PREREQUISITE_FAILED");
        assert_eq!(err.stage(), PipelineStage::Prerequisite);
        assert!(fixture.transport.calls().is_empty());
        assert_eq!(fixture.registry.reads(), 0);
    }

    #[tokio::test]
    async fn test_readiness_failure_is_boundary_startup_and_skips_registry() {
        let mut fixture = Fixture::healthy();
        fixture.transport = Arc::new(ScriptedTransport::error("connection refused"));

        let err = run_no_degradation_pipeline(&input(), &fixture.deps())
            .await
            .unwrap_err();

        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["code"], "NO_DEGRADATION_BOUNDARY_FAILED");
        assert_eq!(value["stage"], "boundary-startup");
        assert_eq!(value["error"]["code"], "HOST_HEALTH_UNREACHABLE");
        assert_eq!(
            value["error"]["healthUrl"],
            "http://127.0.0.1:4099/global/health"
        );
        assert_eq!(fixture.registry.reads(), 0);
        assert_eq!(fixture.probe.calls(), 0);
    }

    #[tokio::test]
    async fn test_boundary_drift_fails_before_readiness() {
        let fixture = Fixture::healthy();
        let mut evidence = StartupBoundaryEvidence::from_crate();
        evidence.startup_stage_order =
            vec![StartupStage::Probe, StartupStage::Readiness, StartupStage::Sdk];

        let err = run_no_degradation_pipeline(
            &input(),
            &fixture.deps().with_boundary_evidence(evidence),
        )
        .await
        .unwrap_err();

        match err {
            NoDegradationError::BoundaryStartup(BoundaryStartupError::Boundary(violation)) => {
                assert_eq!(violation.invariant, StartupBoundaryInvariant::StartupStageOrder);
            }
            other => panic!("expected boundary violation, got {other:?}"),
        }
        assert!(fixture.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_registry_file() {
        let mut fixture = Fixture::healthy();
        fixture.registry = Arc::new(MemoryRegistrySource::new());

        let err = run_no_degradation_pipeline(&input(), &fixture.deps())
            .await
            .unwrap_err();

        assert_eq!(err.code(), "NO_DEGRADATION_APPROVED_REGISTRY_FAILED");
        assert_eq!(err.inner_code(), "APPROVED_SURFACE_REGISTRY_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_unapproved_surface_fails_gate() {
        let mut fixture = Fixture::healthy();
        fixture.registry = Arc::new(MemoryRegistrySource::new().with_file(
            REGISTRY_PATH,
            registry_json(&["tool-registry", "plugin-hooks", "skill-load"]),
        ));

        let err = run_no_degradation_pipeline(&input(), &fixture.deps())
            .await
            .unwrap_err();

        assert_eq!(err.stage(), PipelineStage::PureSurfaceGate);
        assert_eq!(err.inner_code(), "SURFACE_NOT_APPROVED");
    }

    #[tokio::test]
    async fn test_degraded_host_fails_baseline() {
        let mut fixture = Fixture::healthy();
        fixture.probe = Arc::new(StaticProbe::reporting(vec![
            CompositionSurface {
                id: CompositionSurfaceId::ToolRegistry,
                available: true,
            },
            CompositionSurface {
                id: CompositionSurfaceId::SkillLoad,
                available: false,
            },
        ]));
        let mut input = input();
        input.required_surfaces = Some(vec!["tool-registry".to_string()]);

        let err = run_no_degradation_pipeline(&input, &fixture.deps())
            .await
            .unwrap_err();

        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({
                "code": "NO_DEGRADATION_BASELINE_FAILED",
                "stage": "baseline",
                "error": {
                    "code": "BASELINE_COMPOSITION_SURFACE_COUNT_MISMATCH",
                    "expected": 4,
                    "actual": 1
                }
            })
        );
    }
}
