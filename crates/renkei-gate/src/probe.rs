//! Capability probe and SDK bootstrap stages.
//!
//! Both stages belong to the host integration rather than to the gate, so
//! the gate only sees them through [`CapabilityProbe`] and [`SdkBootstrap`].
//! The HTTP implementations here are the defaults used by the binary.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::outcome::ErrorCode;
use crate::surfaces::CompositionSurfaceId;

/// Timeout for the SDK connectivity check.
pub const SDK_CONNECT_TIMEOUT: Duration = Duration::from_millis(1200);

/// One surface as declared by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositionSurface {
    pub id: CompositionSurfaceId,
    pub available: bool,
}

/// What the host declared it can do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityReport {
    pub server_url: String,
    pub composition: Vec<CompositionSurface>,
    pub probed_at: i64,
}

impl CapabilityReport {
    pub fn is_available(&self, surface: CompositionSurfaceId) -> bool {
        self.composition
            .iter()
            .any(|item| item.id == surface && item.available)
    }

    pub fn available_count(&self) -> usize {
        self.composition.iter().filter(|item| item.available).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(
    tag = "code",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ProbeError {
    #[error("host at {server_url} unreachable: {cause}")]
    OpencodeUnreachable { server_url: String, cause: String },

    #[error("{message}")]
    MissingRequiredSurface {
        surface: CompositionSurfaceId,
        message: String,
    },
}

impl ProbeError {
    pub fn missing_surface(surface: CompositionSurfaceId) -> Self {
        ProbeError::MissingRequiredSurface {
            surface,
            message: format!("Required composition surface unavailable: {surface}"),
        }
    }
}

impl ErrorCode for ProbeError {
    fn code(&self) -> &'static str {
        match self {
            ProbeError::OpencodeUnreachable { .. } => "OPENCODE_UNREACHABLE",
            ProbeError::MissingRequiredSurface { .. } => "MISSING_REQUIRED_SURFACE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(
    tag = "code",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum CompositionError {
    #[error("SDK could not connect to {server_url}: {cause}")]
    SdkConnectionFailed { server_url: String, cause: String },
}

impl ErrorCode for CompositionError {
    fn code(&self) -> &'static str {
        match self {
            CompositionError::SdkConnectionFailed { .. } => "SDK_CONNECTION_FAILED",
        }
    }
}

/// A connected SDK session rooted at a working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SdkSession {
    pub server_url: String,
    pub directory: PathBuf,
    pub connected_at: i64,
}

#[async_trait]
pub trait CapabilityProbe: Send + Sync {
    async fn probe(&self, server_url: &str, timeout: Duration)
        -> Result<CapabilityReport, ProbeError>;
}

#[async_trait]
pub trait SdkBootstrap: Send + Sync {
    async fn connect(&self, server_url: &str, directory: &Path)
        -> Result<SdkSession, CompositionError>;
}

/// Probe that treats a reachable host as exposing every known surface.
pub struct HttpCapabilityProbe {
    client: reqwest::Client,
    clock: Arc<dyn Clock>,
}

impl HttpCapabilityProbe {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl CapabilityProbe for HttpCapabilityProbe {
    async fn probe(
        &self,
        server_url: &str,
        timeout: Duration,
    ) -> Result<CapabilityReport, ProbeError> {
        self.client
            .get(server_url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| ProbeError::OpencodeUnreachable {
                server_url: server_url.to_string(),
                cause: e.to_string(),
            })?;

        Ok(CapabilityReport {
            server_url: server_url.to_string(),
            composition: CompositionSurfaceId::ALL
                .into_iter()
                .map(|id| CompositionSurface {
                    id,
                    available: true,
                })
                .collect(),
            probed_at: self.clock.now_ms(),
        })
    }
}

/// SDK bootstrap that verifies the host answers before handing out a session.
pub struct HttpSdkBootstrap {
    client: reqwest::Client,
    clock: Arc<dyn Clock>,
}

impl HttpSdkBootstrap {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl SdkBootstrap for HttpSdkBootstrap {
    async fn connect(
        &self,
        server_url: &str,
        directory: &Path,
    ) -> Result<SdkSession, CompositionError> {
        self.client
            .get(server_url)
            .timeout(SDK_CONNECT_TIMEOUT)
            .send()
            .await
            .map_err(|e| CompositionError::SdkConnectionFailed {
                server_url: server_url.to_string(),
                cause: e.to_string(),
            })?;

        Ok(SdkSession {
            server_url: server_url.to_string(),
            directory: directory.to_path_buf(),
            connected_at: self.clock.now_ms(),
        })
    }
}
