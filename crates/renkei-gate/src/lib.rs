//! Renkei Gate - startup gate for an HTTP-hosted agent runtime
//!
//! Decides whether a host is ready, correctly configured and not degraded
//! before agent work starts:
//! - Host readiness with a hard deadline
//! - Environment preflight (variables, paths, working directory)
//! - Workflow signoff over an ordered command list
//! - Startup boundary self-check
//! - The no-degradation pipeline that composes them
//!
//! Every operation returns `Result<Success, TypedError>`; [`outcome`] maps
//! that onto the JSON envelope and process exit code the CLI emits.

pub mod boundary;
pub mod clock;
pub mod config;
pub mod env;
pub mod error;
pub mod fakes;
pub mod obs;
pub mod outcome;
pub mod pipeline;
pub mod preflight;
pub mod prereq;
pub mod probe;
pub mod readiness;
pub mod signoff;
pub mod stage;
pub mod startup;
pub mod surfaces;
pub mod telemetry;
pub mod workdir;

// Re-export key types
pub use boundary::{
    verify_startup_boundary, StartupBoundaryEvidence, StartupBoundaryInvariant,
    StartupBoundaryReport, StartupBoundaryViolation,
};
pub use clock::{Clock, SystemClock};
pub use config::{resolve_server_url, GateConfig, ResolvedServerUrl, ServerUrlSource};
pub use env::{DefaultUrlParser, EnvAccessor, ProcessEnv, UrlParser};
pub use error::StartupError;
pub use outcome::{Envelope, ErrorCode, ExitCodeContract};
pub use pipeline::{
    run_no_degradation_pipeline, NoDegradationError, NoDegradationInput, NoDegradationSuccess,
    PipelineDeps, PipelineStage,
};
pub use preflight::{
    verify_environment_preflight, EnvironmentPreflightError, EnvironmentPreflightInput,
    EnvironmentPreflightSuccess, PreflightDeps,
};
pub use readiness::{check_host_readiness, HostReadiness, HostReadinessInput, ReqwestTransport};
pub use signoff::{
    canonical_workflows, evaluate_workflow_signoff, SignoffDeps, TokioCommandRunner,
    WorkflowDescriptor, WorkflowSignoffFailure, WorkflowSignoffReport,
};
pub use startup::{start_host_runtime, StartupStage, StartupSuccess};
pub use surfaces::CompositionSurfaceId;
