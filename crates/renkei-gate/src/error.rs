//! Startup error taxonomy.
//!
//! The set of [`StartupError`] discriminants, and their order, is itself a
//! contract checked by the boundary verifier. Adding, removing or renaming a
//! variant must be a deliberate change to [`StartupError::DISCRIMINANTS`]
//! and to the expected list in `boundary`.

use serde::Serialize;

use crate::outcome::ErrorCode;
use crate::probe::{CompositionError, ProbeError};

/// Errors produced while bringing the host up: URL resolution, readiness,
/// capability probe and SDK bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(
    tag = "code",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum StartupError {
    #[error("no server URL was provided")]
    StartupServerUrlMissing,

    #[error("server URL {value:?} is invalid: {cause}")]
    StartupServerUrlInvalid { value: String, cause: String },

    #[error("health check {health_url} timed out after {timeout_ms}ms")]
    HostHealthTimeout { health_url: String, timeout_ms: u64 },

    #[error("health check {health_url} unreachable: {cause}")]
    HostHealthUnreachable { health_url: String, cause: String },

    #[error("health check {health_url} returned an invalid payload: {detail}")]
    HostHealthInvalid { health_url: String, detail: String },

    #[error("capability probe failed: {error}")]
    ProbeFailed { error: ProbeError },

    #[error("SDK bootstrap failed: {error}")]
    SdkBootstrapFailed { error: CompositionError },
}

impl StartupError {
    /// Every discriminant, in declaration order.
    pub const DISCRIMINANTS: [&'static str; 7] = [
        "STARTUP_SERVER_URL_MISSING",
        "STARTUP_SERVER_URL_INVALID",
        "HOST_HEALTH_TIMEOUT",
        "HOST_HEALTH_UNREACHABLE",
        "HOST_HEALTH_INVALID",
        "PROBE_FAILED",
        "SDK_BOOTSTRAP_FAILED",
    ];

    /// Health URL for the readiness variants.
    pub fn health_url(&self) -> Option<&str> {
        match self {
            StartupError::HostHealthTimeout { health_url, .. }
            | StartupError::HostHealthUnreachable { health_url, .. }
            | StartupError::HostHealthInvalid { health_url, .. } => Some(health_url),
            _ => None,
        }
    }
}

impl ErrorCode for StartupError {
    fn code(&self) -> &'static str {
        let index = match self {
            StartupError::StartupServerUrlMissing => 0,
            StartupError::StartupServerUrlInvalid { .. } => 1,
            StartupError::HostHealthTimeout { .. } => 2,
            StartupError::HostHealthUnreachable { .. } => 3,
            StartupError::HostHealthInvalid { .. } => 4,
            StartupError::ProbeFailed { .. } => 5,
            StartupError::SdkBootstrapFailed { .. } => 6,
        };
        Self::DISCRIMINANTS[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn one_of_each() -> Vec<StartupError> {
        vec![
            StartupError::StartupServerUrlMissing,
            StartupError::StartupServerUrlInvalid {
                value: "nope".to_string(),
                cause: "relative URL without a base".to_string(),
            },
            StartupError::HostHealthTimeout {
                health_url: "http://h/global/health".to_string(),
                timeout_ms: 10,
            },
            StartupError::HostHealthUnreachable {
                health_url: "http://h/global/health".to_string(),
                cause: "refused".to_string(),
            },
            StartupError::HostHealthInvalid {
                health_url: "http://h/global/health".to_string(),
                detail: "bad".to_string(),
            },
            StartupError::ProbeFailed {
                error: ProbeError::OpencodeUnreachable {
                    server_url: "http://h".to_string(),
                    cause: "refused".to_string(),
                },
            },
            StartupError::SdkBootstrapFailed {
                error: CompositionError::SdkConnectionFailed {
                    server_url: "http://h".to_string(),
                    cause: "refused".to_string(),
                },
            },
        ]
    }

    #[test]
    fn test_codes_match_serialized_tag() {
        for error in one_of_each() {
            let value = serde_json::to_value(&error).unwrap();
            assert_eq!(value["code"], error.code());
        }
    }

    #[test]
    fn test_discriminants_follow_declaration_order() {
        let codes: Vec<&str> = one_of_each().iter().map(|e| e.code()).collect();
        assert_eq!(codes, StartupError::DISCRIMINANTS.to_vec());
    }

    #[test]
    fn test_timeout_serializes_camel_case_context() {
        let error = StartupError::HostHealthTimeout {
            health_url: "http://127.0.0.1:4099/global/health".to_string(),
            timeout_ms: 1500,
        };
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            json!({
                "code": "HOST_HEALTH_TIMEOUT",
                "healthUrl": "http://127.0.0.1:4099/global/health",
                "timeoutMs": 1500
            })
        );
    }

    #[test]
    fn test_display_mentions_url() {
        let error = StartupError::HostHealthUnreachable {
            health_url: "http://127.0.0.1:1/global/health".to_string(),
            cause: "connection refused".to_string(),
        };
        assert!(error.to_string().contains("127.0.0.1:1"));
        assert_eq!(error.health_url(), Some("http://127.0.0.1:1/global/health"));
    }
}
