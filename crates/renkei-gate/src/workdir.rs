//! Working-directory identity: repository root discovery and the
//! `repo-root` / `harness` classification used by preflight.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::outcome::ErrorCode;

/// Directory marker that identifies a repository root.
pub const REPO_MARKER: &str = ".git";

/// Subdirectory of the repository root that is also an accepted cwd.
pub const HARNESS_DIR: &str = "harness";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkingDirectoryLabel {
    RepoRoot,
    Harness,
}

impl WorkingDirectoryLabel {
    pub const ALL: [WorkingDirectoryLabel; 2] =
        [WorkingDirectoryLabel::RepoRoot, WorkingDirectoryLabel::Harness];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkingDirectoryLabel::RepoRoot => "repo-root",
            WorkingDirectoryLabel::Harness => "harness",
        }
    }
}

impl fmt::Display for WorkingDirectoryLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(
    tag = "code",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum WorkingDirectoryError {
    #[serde(rename = "RUNBOOK_CWD_NOT_ABSOLUTE")]
    #[error("path is not absolute: {path}")]
    NotAbsolute { path: String },

    #[serde(rename = "RUNBOOK_CWD_PATH_TRAVERSAL")]
    #[error("path contains a '.' or '..' segment: {path}")]
    PathTraversal { path: String },

    #[serde(rename = "RUNBOOK_CWD_LABEL_UNRESOLVED")]
    #[error("{normalized_cwd} is neither the repository root nor the harness directory")]
    LabelUnresolved {
        normalized_cwd: String,
        allowed: Vec<WorkingDirectoryLabel>,
    },
}

impl ErrorCode for WorkingDirectoryError {
    fn code(&self) -> &'static str {
        match self {
            WorkingDirectoryError::NotAbsolute { .. } => "RUNBOOK_CWD_NOT_ABSOLUTE",
            WorkingDirectoryError::PathTraversal { .. } => "RUNBOOK_CWD_PATH_TRAVERSAL",
            WorkingDirectoryError::LabelUnresolved { .. } => "RUNBOOK_CWD_LABEL_UNRESOLVED",
        }
    }
}

/// Backslashes become `/`, runs of `/` collapse, and a trailing `/` is
/// dropped unless the path is the root.
fn normalize_path(raw: &str) -> String {
    let mut normalized = String::with_capacity(raw.len());
    for ch in raw.chars().map(|c| if c == '\\' { '/' } else { c }) {
        if ch == '/' && normalized.ends_with('/') {
            continue;
        }
        normalized.push(ch);
    }
    if normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }
    normalized
}

fn has_traversal_segment(normalized: &str) -> bool {
    normalized
        .split('/')
        .any(|segment| segment == "." || segment == "..")
}

/// Classify `cwd` as the repository root or its harness directory.
///
/// All three paths must be absolute and free of `.`/`..` segments; they are
/// compared after normalization.
pub fn classify_working_directory(
    cwd: &Path,
    repo_root: &Path,
    harness: &Path,
) -> Result<WorkingDirectoryLabel, WorkingDirectoryError> {
    let raw: [String; 3] = [cwd, repo_root, harness].map(|p| p.to_string_lossy().into_owned());

    if let Some(path) = raw.iter().find(|p| !p.starts_with('/')) {
        return Err(WorkingDirectoryError::NotAbsolute { path: path.clone() });
    }

    let normalized = raw.clone().map(|p| normalize_path(&p));
    if let Some(index) = normalized.iter().position(|p| has_traversal_segment(p)) {
        return Err(WorkingDirectoryError::PathTraversal {
            path: raw[index].clone(),
        });
    }

    let [cwd, repo_root, harness] = normalized;
    if cwd == repo_root {
        Ok(WorkingDirectoryLabel::RepoRoot)
    } else if cwd == harness {
        Ok(WorkingDirectoryLabel::Harness)
    } else {
        Err(WorkingDirectoryError::LabelUnresolved {
            normalized_cwd: cwd,
            allowed: WorkingDirectoryLabel::ALL.to_vec(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(
    tag = "code",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum RepoRootError {
    #[serde(rename = "PATH_TARGET_MISSING")]
    #[error("repository marker not found: {absolute}")]
    MarkerMissing { absolute: String },
}

impl ErrorCode for RepoRootError {
    fn code(&self) -> &'static str {
        match self {
            RepoRootError::MarkerMissing { .. } => "PATH_TARGET_MISSING",
        }
    }
}

/// Finds the repository root that contains a working directory.
#[async_trait]
pub trait RepoRootResolver: Send + Sync {
    async fn resolve(&self, cwd: &Path) -> Result<PathBuf, RepoRootError>;
}

/// Walks up from the cwd until a directory holding [`REPO_MARKER`] is found.
///
/// With a ceiling set, the walk never looks above that directory.
#[derive(Debug, Clone, Default)]
pub struct GitMarkerResolver {
    ceiling: Option<PathBuf>,
}

impl GitMarkerResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop the ancestor walk at `ceiling` (inclusive).
    pub fn with_ceiling(mut self, ceiling: impl Into<PathBuf>) -> Self {
        self.ceiling = Some(ceiling.into());
        self
    }
}

#[async_trait]
impl RepoRootResolver for GitMarkerResolver {
    async fn resolve(&self, cwd: &Path) -> Result<PathBuf, RepoRootError> {
        for dir in cwd.ancestors() {
            if let Some(ceiling) = &self.ceiling {
                if !dir.starts_with(ceiling) {
                    break;
                }
            }
            if tokio::fs::try_exists(dir.join(REPO_MARKER))
                .await
                .unwrap_or(false)
            {
                return Ok(dir.to_path_buf());
            }
        }
        Err(RepoRootError::MarkerMissing {
            absolute: cwd.join(REPO_MARKER).to_string_lossy().into_owned(),
        })
    }
}

/// Path-existence capability used by preflight.
#[async_trait]
pub trait PathProbe: Send + Sync {
    async fn exists(&self, path: &str) -> bool;
}

/// Checks paths on the real filesystem, relative paths resolved against `base`.
#[derive(Debug, Clone)]
pub struct FsPathProbe {
    base: PathBuf,
}

impl FsPathProbe {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

#[async_trait]
impl PathProbe for FsPathProbe {
    async fn exists(&self, path: &str) -> bool {
        tokio::fs::try_exists(self.base.join(path))
            .await
            .unwrap_or(false)
    }
}
