//! Gate configuration and the server URL source rule.

use serde::{Deserialize, Serialize};

use crate::env::{EnvAccessor, UrlParser};
use crate::error::StartupError;
use crate::outcome::ErrorCode;
use crate::readiness::DEFAULT_HEALTH_PATH;
use crate::surfaces::CompositionSurfaceId;

/// Variable naming the host's base URL.
pub const DEFAULT_SERVER_URL_ENV: &str = "OPENCODE_SERVER_URL";

pub const DEFAULT_TIMEOUT_MS: u64 = 1500;

pub const DEFAULT_REGISTRY_PATH: &str = "config/approved-opencode-surfaces.json";

pub const HEALTH_PATH_ENV: &str = "RENKEI_GATE_HEALTH_PATH";
pub const TIMEOUT_MS_ENV: &str = "RENKEI_GATE_TIMEOUT_MS";
pub const REGISTRY_PATH_ENV: &str = "RENKEI_GATE_REGISTRY_PATH";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(
    tag = "code",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ConfigError {
    #[error("{env_var}={value:?} is not a positive number of milliseconds")]
    ConfigTimeoutInvalid { env_var: String, value: String },
}

impl ErrorCode for ConfigError {
    fn code(&self) -> &'static str {
        match self {
            ConfigError::ConfigTimeoutInvalid { .. } => "CONFIG_TIMEOUT_INVALID",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GateConfig {
    pub server_url_env: String,
    /// Variable whose presence marks a live host for signoff workflows.
    pub live_server_env: String,
    pub health_path: String,
    pub timeout_ms: u64,
    pub approved_registry_path: String,
    pub required_surfaces: Vec<String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            server_url_env: DEFAULT_SERVER_URL_ENV.to_string(),
            live_server_env: DEFAULT_SERVER_URL_ENV.to_string(),
            health_path: DEFAULT_HEALTH_PATH.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            approved_registry_path: DEFAULT_REGISTRY_PATH.to_string(),
            required_surfaces: CompositionSurfaceId::ALL
                .iter()
                .map(|id| id.as_str().to_string())
                .collect(),
        }
    }
}

impl GateConfig {
    /// Defaults overlaid with the `RENKEI_GATE_*` variables that are set.
    pub fn from_env(env: &dyn EnvAccessor) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = env.var(HEALTH_PATH_ENV).filter(|v| !v.trim().is_empty()) {
            config.health_path = path;
        }

        if let Some(raw) = env.var(TIMEOUT_MS_ENV) {
            config.timeout_ms = raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|ms| *ms > 0)
                .ok_or_else(|| ConfigError::ConfigTimeoutInvalid {
                    env_var: TIMEOUT_MS_ENV.to_string(),
                    value: raw.clone(),
                })?;
        }

        if let Some(path) = env.var(REGISTRY_PATH_ENV).filter(|v| !v.trim().is_empty()) {
            config.approved_registry_path = path;
        }

        Ok(config)
    }
}

/// Where a server URL was taken from. These are the only permitted sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerUrlSource {
    CliArg,
    EnvVar,
}

impl ServerUrlSource {
    pub const ALL: [ServerUrlSource; 2] = [ServerUrlSource::CliArg, ServerUrlSource::EnvVar];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedServerUrl {
    pub url: String,
    pub source: ServerUrlSource,
}

fn is_non_blank(value: &str) -> bool {
    !value.trim().is_empty()
}

/// Pick the server URL: a non-blank CLI argument wins over the variable.
pub fn select_server_url(
    cli_arg: Option<&str>,
    env: &dyn EnvAccessor,
    env_var: &str,
) -> Option<ResolvedServerUrl> {
    if let Some(url) = cli_arg.filter(|v| is_non_blank(v)) {
        return Some(ResolvedServerUrl {
            url: url.trim().to_string(),
            source: ServerUrlSource::CliArg,
        });
    }

    env.var(env_var)
        .filter(|v| is_non_blank(v))
        .map(|url| ResolvedServerUrl {
            url: url.trim().to_string(),
            source: ServerUrlSource::EnvVar,
        })
}

/// [`select_server_url`], then require the value to parse as a URL.
pub fn resolve_server_url(
    cli_arg: Option<&str>,
    env: &dyn EnvAccessor,
    env_var: &str,
    url_parser: &dyn UrlParser,
) -> Result<ResolvedServerUrl, StartupError> {
    let resolved =
        select_server_url(cli_arg, env, env_var).ok_or(StartupError::StartupServerUrlMissing)?;

    url_parser
        .parse(&resolved.url)
        .map_err(|e| StartupError::StartupServerUrlInvalid {
            value: resolved.url.clone(),
            cause: e.cause,
        })?;
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::DefaultUrlParser;
    use crate::fakes::MapEnv;

    #[test]
    fn test_defaults() {
        let config = GateConfig::default();
        assert_eq!(config.server_url_env, "OPENCODE_SERVER_URL");
        assert_eq!(config.health_path, "/global/health");
        assert_eq!(config.timeout_ms, 1500);
        assert_eq!(config.approved_registry_path, DEFAULT_REGISTRY_PATH);
        assert_eq!(config.required_surfaces.len(), 4);
    }

    #[test]
    fn test_env_overlay() {
        let env = MapEnv::new()
            .with(HEALTH_PATH_ENV, "/healthz")
            .with(TIMEOUT_MS_ENV, "250")
            .with(REGISTRY_PATH_ENV, "fixtures/approved.json");

        let config = GateConfig::from_env(&env).unwrap();

        assert_eq!(config.health_path, "/healthz");
        assert_eq!(config.timeout_ms, 250);
        assert_eq!(config.approved_registry_path, "fixtures/approved.json");
    }

    #[test]
    fn test_bad_timeout_rejected() {
        for value in ["0", "-5", "soon"] {
            let env = MapEnv::new().with(TIMEOUT_MS_ENV, value);
            let err = GateConfig::from_env(&env).unwrap_err();
            assert_eq!(err.code(), "CONFIG_TIMEOUT_INVALID");
        }
    }

    #[test]
    fn test_partial_config_deserializes_with_defaults() {
        let config: GateConfig = serde_json::from_str(r#"{"timeoutMs": 900}"#).unwrap();
        assert_eq!(config.timeout_ms, 900);
        assert_eq!(config.health_path, "/global/health");
    }

    #[test]
    fn test_cli_arg_wins_over_env() {
        let env = MapEnv::new().with("OPENCODE_SERVER_URL", "http://env:1");
        let resolved =
            select_server_url(Some("http://cli:2"), &env, "OPENCODE_SERVER_URL").unwrap();
        assert_eq!(resolved.url, "http://cli:2");
        assert_eq!(resolved.source, ServerUrlSource::CliArg);

        let resolved = select_server_url(Some("  "), &env, "OPENCODE_SERVER_URL").unwrap();
        assert_eq!(resolved.source, ServerUrlSource::EnvVar);
    }

    #[test]
    fn test_resolve_missing_and_invalid() {
        let env = MapEnv::new();
        assert_eq!(
            resolve_server_url(None, &env, "OPENCODE_SERVER_URL", &DefaultUrlParser).unwrap_err(),
            StartupError::StartupServerUrlMissing
        );

        let err = resolve_server_url(Some("nope"), &env, "OPENCODE_SERVER_URL", &DefaultUrlParser)
            .unwrap_err();
        assert_eq!(err.code(), "STARTUP_SERVER_URL_INVALID");
    }
}
