//! Environment preflight for operator runbooks.
//!
//! Three ordered stages, each stopping at its first failure:
//! required variables, required paths, then working-directory identity.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::config::DEFAULT_SERVER_URL_ENV;
use crate::env::{EnvAccessor, UrlParser};
use crate::outcome::ErrorCode;
use crate::workdir::{
    classify_working_directory, PathProbe, RepoRootResolver, WorkingDirectoryLabel, HARNESS_DIR,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentPreflightInput {
    pub required_env: Vec<String>,
    pub required_paths: Vec<String>,
    /// The variable whose value must parse as a URL.
    pub url_env_var: String,
    pub cwd: PathBuf,
}

impl EnvironmentPreflightInput {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            required_env: Vec::new(),
            required_paths: Vec::new(),
            url_env_var: DEFAULT_SERVER_URL_ENV.to_string(),
            cwd: cwd.into(),
        }
    }

    pub fn require_env(mut self, key: impl Into<String>) -> Self {
        self.required_env.push(key.into());
        self
    }

    pub fn require_path(mut self, path: impl Into<String>) -> Self {
        self.required_paths.push(path.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentPreflightSuccess {
    pub checked_at_ms: i64,
    /// Required variables and their values; the URL variable is canonicalized.
    pub env: BTreeMap<String, String>,
    pub resolved_paths: Vec<String>,
    pub working_directory: String,
    pub working_directory_label: WorkingDirectoryLabel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(
    tag = "code",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum EnvironmentPreflightError {
    #[serde(rename = "RUNBOOK_PREFLIGHT_ENV_MISSING")]
    #[error("required environment variable {env_var} is not set")]
    EnvMissing { env_var: String },

    #[serde(rename = "RUNBOOK_PREFLIGHT_ENV_INVALID_URL")]
    #[error("{env_var}={value:?} is not a valid URL: {cause}")]
    EnvInvalidUrl {
        env_var: String,
        value: String,
        cause: String,
    },

    #[serde(rename = "RUNBOOK_PREFLIGHT_PATH_MISSING")]
    #[error("required path is missing: {path}")]
    PathMissing { path: String },

    #[serde(rename = "RUNBOOK_PREFLIGHT_CWD_INVALID")]
    #[error("working directory {cwd} is not one of the allowed locations")]
    CwdInvalid {
        cwd: String,
        allowed: Vec<WorkingDirectoryLabel>,
    },
}

impl ErrorCode for EnvironmentPreflightError {
    fn code(&self) -> &'static str {
        match self {
            EnvironmentPreflightError::EnvMissing { .. } => "RUNBOOK_PREFLIGHT_ENV_MISSING",
            EnvironmentPreflightError::EnvInvalidUrl { .. } => "RUNBOOK_PREFLIGHT_ENV_INVALID_URL",
            EnvironmentPreflightError::PathMissing { .. } => "RUNBOOK_PREFLIGHT_PATH_MISSING",
            EnvironmentPreflightError::CwdInvalid { .. } => "RUNBOOK_PREFLIGHT_CWD_INVALID",
        }
    }
}

#[derive(Clone, Copy)]
pub struct PreflightDeps<'a> {
    pub clock: &'a dyn Clock,
    pub env: &'a dyn EnvAccessor,
    pub url_parser: &'a dyn UrlParser,
    pub paths: &'a dyn PathProbe,
    pub repo_root: &'a dyn RepoRootResolver,
}

/// Run the three preflight stages against `input`.
pub async fn verify_environment_preflight(
    input: &EnvironmentPreflightInput,
    deps: PreflightDeps<'_>,
) -> Result<EnvironmentPreflightSuccess, EnvironmentPreflightError> {
    let mut env = BTreeMap::new();
    for key in &input.required_env {
        let value = deps
            .env
            .var(key)
            .ok_or_else(|| EnvironmentPreflightError::EnvMissing {
                env_var: key.clone(),
            })?;

        let value = if *key == input.url_env_var {
            deps.url_parser.parse(&value).map_err(|e| {
                EnvironmentPreflightError::EnvInvalidUrl {
                    env_var: key.clone(),
                    value: value.clone(),
                    cause: e.cause,
                }
            })?
        } else {
            value
        };
        env.insert(key.clone(), value);
    }

    let mut resolved_paths = Vec::with_capacity(input.required_paths.len());
    for path in &input.required_paths {
        if !deps.paths.exists(path).await {
            return Err(EnvironmentPreflightError::PathMissing { path: path.clone() });
        }
        resolved_paths.push(path.clone());
    }

    let working_directory = input.cwd.to_string_lossy().into_owned();
    let cwd_invalid = || EnvironmentPreflightError::CwdInvalid {
        cwd: working_directory.clone(),
        allowed: WorkingDirectoryLabel::ALL.to_vec(),
    };

    let repo_root = deps
        .repo_root
        .resolve(&input.cwd)
        .await
        .map_err(|_| cwd_invalid())?;
    let harness = repo_root.join(HARNESS_DIR);
    let working_directory_label =
        classify_working_directory(&input.cwd, &repo_root, &harness).map_err(|_| cwd_invalid())?;

    Ok(EnvironmentPreflightSuccess {
        checked_at_ms: deps.clock.now_ms(),
        env,
        resolved_paths,
        working_directory,
        working_directory_label,
    })
}
