//! Approved-surface registry file.
//!
//! ```json
//! {
//!   "version": "2026-02-19",
//!   "entries": [
//!     { "id": "tool-registry", "seam": "tool-registry",
//!       "upstreamSurface": "...", "rationale": "..." }
//!   ]
//! }
//! ```
//!
//! A bare JSON array of ids is also accepted; its entries carry the id as
//! their seam and empty upstream/rationale text.

use std::collections::HashSet;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::CompositionSurfaceId;
use crate::clock::Clock;
use crate::outcome::ErrorCode;

/// The only registry format version this crate reads.
pub const REGISTRY_VERSION: &str = "2026-02-19";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovedSurfaceEntry {
    pub id: String,
    pub seam: String,
    pub upstream_surface: String,
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovedSurfaceRegistry {
    pub version: String,
    pub source_path: String,
    pub generated_at_ms: i64,
    pub entries: Vec<ApprovedSurfaceEntry>,
}

impl ApprovedSurfaceRegistry {
    /// Approved surface ids in file order. Ids that name no known surface
    /// are skipped; [`verify_approved_surface_registry`] rejects them.
    pub fn approved(&self) -> Vec<CompositionSurfaceId> {
        self.entries
            .iter()
            .filter_map(|entry| entry.id.parse().ok())
            .collect()
    }

    pub fn is_approved(&self, surface: &str) -> bool {
        self.entries.iter().any(|entry| entry.id == surface)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "code")]
pub enum RegistryError {
    #[serde(rename = "APPROVED_SURFACE_REGISTRY_NOT_FOUND")]
    #[error("approved surface registry not found: {path}")]
    NotFound { path: String },

    #[serde(rename = "APPROVED_SURFACE_REGISTRY_INVALID")]
    #[error("approved surface registry {path} is invalid: {detail}")]
    Invalid { path: String, detail: String },

    #[serde(rename = "APPROVED_SURFACE_DUPLICATE_ID")]
    #[error("approved surface listed twice: {id}")]
    DuplicateId { id: String },

    #[serde(rename = "APPROVED_SURFACE_EMPTY")]
    #[error("approved surface registry {path} has no entries")]
    Empty { path: String },
}

impl ErrorCode for RegistryError {
    fn code(&self) -> &'static str {
        match self {
            RegistryError::NotFound { .. } => "APPROVED_SURFACE_REGISTRY_NOT_FOUND",
            RegistryError::Invalid { .. } => "APPROVED_SURFACE_REGISTRY_INVALID",
            RegistryError::DuplicateId { .. } => "APPROVED_SURFACE_DUPLICATE_ID",
            RegistryError::Empty { .. } => "APPROVED_SURFACE_EMPTY",
        }
    }
}

fn invalid(path: &str, detail: impl Into<String>) -> RegistryError {
    RegistryError::Invalid {
        path: path.to_string(),
        detail: detail.into(),
    }
}

/// Reads registry text by path.
#[async_trait]
pub trait RegistrySource: Send + Sync {
    async fn read(&self, path: &str) -> Result<String, RegistryError>;
}

/// Reads registry files from disk, relative paths resolved against `base`.
#[derive(Debug, Clone)]
pub struct FsRegistrySource {
    base: PathBuf,
}

impl FsRegistrySource {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

#[async_trait]
impl RegistrySource for FsRegistrySource {
    async fn read(&self, path: &str) -> Result<String, RegistryError> {
        let full = self.base.join(path);
        match tokio::fs::read_to_string(&full).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(RegistryError::NotFound {
                path: path.to_string(),
            }),
            Err(e) => Err(invalid(path, format!("Failed to read registry file: {e}"))),
        }
    }
}

fn string_field(entry: &Map<String, Value>, key: &str) -> Option<String> {
    entry.get(key).and_then(Value::as_str).map(str::to_string)
}

fn parse_entries(
    source_path: &str,
    raw: &[Value],
) -> Result<Vec<ApprovedSurfaceEntry>, RegistryError> {
    raw.iter()
        .enumerate()
        .map(|(index, value)| {
            let Some(entry) = value.as_object() else {
                return Err(invalid(
                    source_path,
                    format!("Registry entry at index {index} must be an object"),
                ));
            };
            match (
                string_field(entry, "id"),
                string_field(entry, "seam"),
                string_field(entry, "upstreamSurface"),
                string_field(entry, "rationale"),
            ) {
                (Some(id), Some(seam), Some(upstream_surface), Some(rationale)) => {
                    Ok(ApprovedSurfaceEntry {
                        id,
                        seam,
                        upstream_surface,
                        rationale,
                    })
                }
                _ => Err(invalid(
                    source_path,
                    format!("Registry entry at index {index} is missing required string fields"),
                )),
            }
        })
        .collect()
}

fn parse_bare_ids(
    source_path: &str,
    raw: &[Value],
) -> Result<Vec<ApprovedSurfaceEntry>, RegistryError> {
    raw.iter()
        .enumerate()
        .map(|(index, value)| {
            let id = value.as_str().ok_or_else(|| {
                invalid(
                    source_path,
                    format!("Registry entry at index {index} must be a string id"),
                )
            })?;
            Ok(ApprovedSurfaceEntry {
                id: id.to_string(),
                seam: id.to_string(),
                upstream_surface: String::new(),
                rationale: String::new(),
            })
        })
        .collect()
}

/// Parse registry text. Shape only; see [`verify_approved_surface_registry`]
/// for content rules.
pub fn parse_approved_surface_registry(
    source_path: &str,
    json: &str,
    generated_at_ms: i64,
) -> Result<ApprovedSurfaceRegistry, RegistryError> {
    let parsed: Value = serde_json::from_str(json)
        .map_err(|e| invalid(source_path, format!("Failed to parse JSON: {e}")))?;

    let entries = match &parsed {
        Value::Array(ids) => parse_bare_ids(source_path, ids)?,
        Value::Object(object) => {
            if object.get("version").and_then(Value::as_str) != Some(REGISTRY_VERSION) {
                return Err(invalid(
                    source_path,
                    format!("Registry version must be {REGISTRY_VERSION}"),
                ));
            }
            let Some(raw) = object.get("entries").and_then(Value::as_array) else {
                return Err(invalid(source_path, "Registry entries must be an array"));
            };
            parse_entries(source_path, raw)?
        }
        _ => return Err(invalid(source_path, "Registry payload must be an object")),
    };

    Ok(ApprovedSurfaceRegistry {
        version: REGISTRY_VERSION.to_string(),
        source_path: source_path.to_string(),
        generated_at_ms,
        entries,
    })
}

/// Reject empty registries, unknown ids and duplicate ids, in that order
/// per entry.
pub fn verify_approved_surface_registry(
    registry: &ApprovedSurfaceRegistry,
) -> Result<(), RegistryError> {
    if registry.entries.is_empty() {
        return Err(RegistryError::Empty {
            path: registry.source_path.clone(),
        });
    }

    let mut seen = HashSet::new();
    for entry in &registry.entries {
        if entry.id.parse::<CompositionSurfaceId>().is_err() {
            return Err(invalid(
                &registry.source_path,
                format!("Unknown approved surface id: {}", entry.id),
            ));
        }
        if !seen.insert(entry.id.as_str()) {
            return Err(RegistryError::DuplicateId {
                id: entry.id.clone(),
            });
        }
    }
    Ok(())
}

/// Read, parse and verify the registry at `source_path`.
pub async fn load_approved_surface_registry(
    source_path: &str,
    source: &dyn RegistrySource,
    clock: &dyn Clock,
) -> Result<ApprovedSurfaceRegistry, RegistryError> {
    let text = source.read(source_path).await?;
    let registry = parse_approved_surface_registry(source_path, &text, clock.now_ms())?;
    verify_approved_surface_registry(&registry)?;
    Ok(registry)
}
