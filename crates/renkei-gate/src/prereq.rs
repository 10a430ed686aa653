//! Live-integration prerequisites: validate pipeline inputs before any
//! network or filesystem work happens.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::config::{DEFAULT_REGISTRY_PATH, DEFAULT_SERVER_URL_ENV};
use crate::env::UrlParser;
use crate::outcome::ErrorCode;
use crate::surfaces::CompositionSurfaceId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LivePrerequisiteInput {
    /// Name reported in errors as the server URL's origin.
    pub server_url_env: String,
    pub server_url: Option<String>,
    /// Defaults to [`DEFAULT_REGISTRY_PATH`].
    pub approved_registry_path: Option<String>,
    /// Defaults to every known surface.
    pub required_surfaces: Option<Vec<String>>,
}

impl LivePrerequisiteInput {
    pub fn new(server_url: Option<String>) -> Self {
        Self {
            server_url_env: DEFAULT_SERVER_URL_ENV.to_string(),
            server_url,
            approved_registry_path: None,
            required_surfaces: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LivePrerequisiteSuccess {
    pub checked_at_ms: i64,
    /// Trimmed, not canonicalized.
    pub server_url: String,
    pub approved_registry_path: String,
    pub required_surfaces: Vec<CompositionSurfaceId>,
}

/// Why a registry path was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistryPathDetail {
    EmptyPath,
    AbsolutePath,
    PathSeparatorInvalid,
    DotSegment,
    ParentSegment,
    NotJsonFile,
}

impl fmt::Display for RegistryPathDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RegistryPathDetail::EmptyPath => "EMPTY_PATH",
            RegistryPathDetail::AbsolutePath => "ABSOLUTE_PATH",
            RegistryPathDetail::PathSeparatorInvalid => "PATH_SEPARATOR_INVALID",
            RegistryPathDetail::DotSegment => "DOT_SEGMENT",
            RegistryPathDetail::ParentSegment => "PARENT_SEGMENT",
            RegistryPathDetail::NotJsonFile => "NOT_JSON_FILE",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(
    tag = "code",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum PrerequisiteError {
    #[error("{env_var} is not set")]
    LivePrereqServerUrlMissing { env_var: String },

    #[error("{env_var}={value:?} is not a valid URL: {cause}")]
    LivePrereqServerUrlInvalid {
        env_var: String,
        value: String,
        cause: String,
    },

    #[error("required surface list is empty")]
    LivePrereqRequiredSurfaceListEmpty,

    #[error("required surface listed twice: {surface}")]
    LivePrereqRequiredSurfaceDuplicate { surface: String },

    #[error("unknown required surface: {surface}")]
    LivePrereqRequiredSurfaceUnknown {
        surface: String,
        allowed: Vec<CompositionSurfaceId>,
    },

    #[error("approved registry path {path:?} rejected: {detail}")]
    LivePrereqApprovedRegistryPathInvalid {
        path: String,
        detail: RegistryPathDetail,
    },
}

impl ErrorCode for PrerequisiteError {
    fn code(&self) -> &'static str {
        match self {
            PrerequisiteError::LivePrereqServerUrlMissing { .. } => {
                "LIVE_PREREQ_SERVER_URL_MISSING"
            }
            PrerequisiteError::LivePrereqServerUrlInvalid { .. } => {
                "LIVE_PREREQ_SERVER_URL_INVALID"
            }
            PrerequisiteError::LivePrereqRequiredSurfaceListEmpty => {
                "LIVE_PREREQ_REQUIRED_SURFACE_LIST_EMPTY"
            }
            PrerequisiteError::LivePrereqRequiredSurfaceDuplicate { .. } => {
                "LIVE_PREREQ_REQUIRED_SURFACE_DUPLICATE"
            }
            PrerequisiteError::LivePrereqRequiredSurfaceUnknown { .. } => {
                "LIVE_PREREQ_REQUIRED_SURFACE_UNKNOWN"
            }
            PrerequisiteError::LivePrereqApprovedRegistryPathInvalid { .. } => {
                "LIVE_PREREQ_APPROVED_REGISTRY_PATH_INVALID"
            }
        }
    }
}

/// Registry paths must be relative, `/`-separated, free of `.`/`..`
/// segments and name a `.json` file.
pub fn validate_registry_path(path: &str) -> Result<(), RegistryPathDetail> {
    let path = path.trim();
    if path.is_empty() {
        return Err(RegistryPathDetail::EmptyPath);
    }

    let bytes = path.as_bytes();
    let drive_letter =
        bytes.len() >= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && bytes[2] == b'/';
    if path.starts_with('/') || drive_letter {
        return Err(RegistryPathDetail::AbsolutePath);
    }

    if path.contains('\\') {
        return Err(RegistryPathDetail::PathSeparatorInvalid);
    }

    if path.split('/').any(|segment| segment == ".") {
        return Err(RegistryPathDetail::DotSegment);
    }
    if path.split('/').any(|segment| segment == "..") {
        return Err(RegistryPathDetail::ParentSegment);
    }

    if !path.ends_with(".json") {
        return Err(RegistryPathDetail::NotJsonFile);
    }
    Ok(())
}

fn validate_required_surfaces(
    surfaces: &[String],
) -> Result<Vec<CompositionSurfaceId>, PrerequisiteError> {
    if surfaces.is_empty() {
        return Err(PrerequisiteError::LivePrereqRequiredSurfaceListEmpty);
    }

    let mut seen = HashSet::new();
    let mut validated = Vec::with_capacity(surfaces.len());
    for surface in surfaces {
        if !seen.insert(surface.as_str()) {
            return Err(PrerequisiteError::LivePrereqRequiredSurfaceDuplicate {
                surface: surface.clone(),
            });
        }
        let id = surface.parse::<CompositionSurfaceId>().map_err(|_| {
            PrerequisiteError::LivePrereqRequiredSurfaceUnknown {
                surface: surface.clone(),
                allowed: CompositionSurfaceId::ALL.to_vec(),
            }
        })?;
        validated.push(id);
    }
    Ok(validated)
}

/// Check the server URL, required surfaces and registry path, in that order.
pub fn verify_live_prerequisites(
    input: &LivePrerequisiteInput,
    url_parser: &dyn UrlParser,
    clock: &dyn Clock,
) -> Result<LivePrerequisiteSuccess, PrerequisiteError> {
    let raw_url = match input.server_url.as_deref() {
        Some(value) if !value.trim().is_empty() => value,
        _ => {
            return Err(PrerequisiteError::LivePrereqServerUrlMissing {
                env_var: input.server_url_env.clone(),
            })
        }
    };

    let server_url = raw_url.trim().to_string();
    url_parser
        .parse(&server_url)
        .map_err(|e| PrerequisiteError::LivePrereqServerUrlInvalid {
            env_var: input.server_url_env.clone(),
            value: raw_url.to_string(),
            cause: e.cause,
        })?;

    let required_surfaces = match &input.required_surfaces {
        Some(surfaces) => validate_required_surfaces(surfaces)?,
        None => CompositionSurfaceId::ALL.to_vec(),
    };

    let approved_registry_path = input
        .approved_registry_path
        .as_deref()
        .unwrap_or(DEFAULT_REGISTRY_PATH)
        .trim()
        .to_string();
    validate_registry_path(&approved_registry_path).map_err(|detail| {
        PrerequisiteError::LivePrereqApprovedRegistryPathInvalid {
            path: approved_registry_path.clone(),
            detail,
        }
    })?;

    Ok(LivePrerequisiteSuccess {
        checked_at_ms: clock.now_ms(),
        server_url,
        approved_registry_path,
        required_surfaces,
    })
}
