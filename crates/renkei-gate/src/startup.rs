//! Host startup: readiness, then capability probe, then SDK bootstrap.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::StartupError;
use crate::probe::{CapabilityProbe, CapabilityReport, SdkBootstrap, SdkSession};
use crate::readiness::{check_host_readiness, HealthTransport, HostReadiness, HostReadinessInput};
use crate::stage::{StageLabel, StageSequence};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartupStage {
    Readiness,
    Probe,
    Sdk,
}

impl StartupStage {
    /// The order in which startup runs its stages.
    pub const ORDER: [StartupStage; 3] = [
        StartupStage::Readiness,
        StartupStage::Probe,
        StartupStage::Sdk,
    ];
}

impl StageLabel for StartupStage {
    fn label(&self) -> &'static str {
        match self {
            StartupStage::Readiness => "readiness",
            StartupStage::Probe => "probe",
            StartupStage::Sdk => "sdk",
        }
    }
}

/// Startup durations in milliseconds, measured with the injected clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StartupTimings {
    /// Whole startup sequence.
    pub total: u64,
    /// Host health check.
    pub readiness: u64,
    /// Capability probe.
    pub probe: u64,
    /// SDK session bootstrap.
    pub sdk: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartupInput {
    pub server_url: String,
    pub cwd: PathBuf,
    pub timeout_ms: u64,
    pub health_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartupSuccess {
    pub server_url: String,
    /// Health payload returned by the host.
    pub readiness: HostReadiness,
    /// Composition surfaces the host reported.
    pub report: CapabilityReport,
    /// Connected SDK session bound to the input `cwd`.
    pub session: SdkSession,
    pub timings_ms: StartupTimings,
}

/// Capabilities startup needs for one run.
#[derive(Clone, Copy)]
pub struct StartupDeps<'a> {
    pub clock: &'a dyn Clock,
    pub transport: &'a dyn HealthTransport,
    pub probe: &'a dyn CapabilityProbe,
    pub sdk: &'a dyn SdkBootstrap,
}

/// Bring the host up in [`StartupStage::ORDER`], stopping at the first failure.
pub async fn start_host_runtime(
    input: &StartupInput,
    deps: StartupDeps<'_>,
) -> Result<StartupSuccess, StartupError> {
    let mut stages = StageSequence::new(deps.clock);

    let readiness_input = HostReadinessInput {
        server_url: input.server_url.clone(),
        health_path: input.health_path.clone(),
        timeout_ms: input.timeout_ms,
    };
    let readiness = stages
        .step(
            StartupStage::Readiness,
            check_host_readiness(&readiness_input, deps.transport, deps.clock),
        )
        .await?;

    let report = stages
        .step(StartupStage::Probe, async {
            deps.probe
                .probe(&input.server_url, Duration::from_millis(input.timeout_ms))
                .await
                .map_err(|error| StartupError::ProbeFailed { error })
        })
        .await?;

    let session = stages
        .step(StartupStage::Sdk, async {
            deps.sdk
                .connect(&input.server_url, &input.cwd)
                .await
                .map_err(|error| StartupError::SdkBootstrapFailed { error })
        })
        .await?;

    let timings_ms = StartupTimings {
        readiness: stages.elapsed_ms(StartupStage::Readiness),
        probe: stages.elapsed_ms(StartupStage::Probe),
        sdk: stages.elapsed_ms(StartupStage::Sdk),
        total: stages.total_ms(),
    };

    Ok(StartupSuccess {
        server_url: input.server_url.clone(),
        readiness,
        report,
        session,
        timings_ms,
    })
}
