//! Host readiness: one deadline-guarded health probe.
//!
//! The health URL is derived from the server URL and health path, a single
//! request is raced against a deadline, and the body is narrowed to
//! [`HostHealthPayload`] before anything trusts it. The deadline and the
//! in-flight request live in one scoped [`ProbeDeadline`]; when the deadline
//! wins, the request future is dropped (cancelled) and the timer is released
//! with the scope on every exit path.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Sleep;

use crate::clock::Clock;
use crate::error::StartupError;
use crate::obs;

pub const DEFAULT_HEALTH_PATH: &str = "/global/health";

/// Transport failure (connection refused, DNS, TLS, body read).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Network capability used by the readiness check.
#[async_trait]
pub trait HealthTransport: Send + Sync {
    /// GET `url` and return the raw response body.
    ///
    /// Dropping the returned future must abort the request.
    async fn fetch(&self, url: &str) -> Result<String, TransportError>;
}

/// Production transport over a shared reqwest client.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HealthTransport for ReqwestTransport {
    async fn fetch(&self, url: &str) -> Result<String, TransportError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError(e.to_string()))?;
        response
            .text()
            .await
            .map_err(|e| TransportError(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostReadinessInput {
    pub server_url: String,
    pub health_path: String,
    pub timeout_ms: u64,
}

impl HostReadinessInput {
    pub fn new(server_url: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            server_url: server_url.into(),
            health_path: DEFAULT_HEALTH_PATH.to_string(),
            timeout_ms,
        }
    }

    pub fn with_health_path(mut self, health_path: impl Into<String>) -> Self {
        self.health_path = health_path.into();
        self
    }
}

/// Proof that the host answered its health endpoint with `healthy: true`.
///
/// Only [`check_host_readiness`] constructs this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostReadiness {
    pub checked_url: String,
    pub health_url: String,
    pub healthy: bool,
    pub responded_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// The narrowed health payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostHealthPayload {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Narrow an untyped JSON value to a healthy payload.
pub fn narrow_health_payload(value: &Value) -> Result<HostHealthPayload, String> {
    let Some(object) = value.as_object() else {
        return Err("health payload must be a JSON object".to_string());
    };

    if object.get("healthy") != Some(&Value::Bool(true)) {
        return Err("health payload must include healthy: true".to_string());
    }

    Ok(HostHealthPayload {
        healthy: true,
        version: object
            .get("version")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

/// Resolve `health_path` against `server_url`, dropping one trailing slash.
pub fn resolve_health_url(server_url: &str, health_path: &str) -> Result<String, StartupError> {
    if server_url.trim().is_empty() {
        return Err(StartupError::StartupServerUrlMissing);
    }

    let invalid = |cause: String| StartupError::StartupServerUrlInvalid {
        value: server_url.to_string(),
        cause,
    };
    let base = Url::parse(server_url).map_err(|e| invalid(e.to_string()))?;
    let joined = base.join(health_path).map_err(|e| invalid(e.to_string()))?;

    let mut health_url = joined.to_string();
    if health_url.ends_with('/') {
        health_url.pop();
    }
    Ok(health_url)
}

/// Deadline timer scoped to one in-flight call.
struct ProbeDeadline<'a> {
    sleep: Pin<Box<Sleep>>,
    health_url: &'a str,
}

impl<'a> ProbeDeadline<'a> {
    fn arm(timeout: Duration, health_url: &'a str) -> Self {
        Self {
            sleep: Box::pin(tokio::time::sleep(timeout)),
            health_url,
        }
    }

    /// Drive `call` until it completes or the deadline fires. On timeout the
    /// call future is dropped here, which cancels it.
    async fn race<F: Future>(&mut self, call: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            output = call => Some(output),
            () = &mut self.sleep => None,
        }
    }
}

impl Drop for ProbeDeadline<'_> {
    fn drop(&mut self) {
        obs::emit_readiness_deadline_released(self.health_url);
    }
}

/// Check that the host at `input.server_url` reports itself healthy.
pub async fn check_host_readiness(
    input: &HostReadinessInput,
    transport: &dyn HealthTransport,
    clock: &dyn Clock,
) -> Result<HostReadiness, StartupError> {
    let health_url = resolve_health_url(&input.server_url, &input.health_path)?;

    let outcome = {
        let mut deadline =
            ProbeDeadline::arm(Duration::from_millis(input.timeout_ms), &health_url);
        deadline.race(transport.fetch(&health_url)).await
    };

    let body = match outcome {
        None => {
            obs::emit_readiness_timeout(&health_url, input.timeout_ms);
            return Err(StartupError::HostHealthTimeout {
                health_url,
                timeout_ms: input.timeout_ms,
            });
        }
        Some(Err(e)) => {
            return Err(StartupError::HostHealthUnreachable {
                health_url,
                cause: e.to_string(),
            });
        }
        Some(Ok(body)) => body,
    };

    let payload = serde_json::from_str::<Value>(&body)
        .map_err(|e| format!("health payload is not JSON: {e}"))
        .and_then(|value| narrow_health_payload(&value));
    let payload = match payload {
        Ok(payload) => payload,
        Err(detail) => return Err(StartupError::HostHealthInvalid { health_url, detail }),
    };

    Ok(HostReadiness {
        checked_url: input.server_url.clone(),
        health_url,
        healthy: true,
        responded_at: clock.now_ms(),
        version: payload.version,
    })
}
