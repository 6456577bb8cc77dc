//! Registry HTTP client: validator discovery and agent registration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use subnet_types::{timestamp_from_unix, ValidatorEndpoint};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{RegistryError, RegistryResult};

/// Default per-request timeout for registry calls.
pub const DEFAULT_REGISTRY_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest error body kept from a failed response.
const MAX_ERROR_BODY: usize = 1024;

#[derive(Debug, Deserialize)]
struct ValidatorList {
    #[serde(default)]
    validators: Vec<ValidatorEntry>,
}

#[derive(Debug, Deserialize)]
struct ValidatorEntry {
    #[serde(default)]
    id: String,
    #[serde(default)]
    endpoint: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    last_seen: i64,
}

/// Payload of `POST /agents`.
#[derive(Debug, Clone, Serialize)]
pub struct AgentRegistration {
    /// Agent identifier
    pub id: String,
    /// Capabilities offered
    pub capabilities: Vec<String>,
    /// Endpoint the agent is reachable at
    pub endpoint: String,
}

/// Base URL for a registry address: trailing `/` removed, `http://` added
/// when no scheme is given.
pub fn registry_base_url(addr: &str) -> String {
    let base = addr.trim().trim_end_matches('/');
    if base.starts_with("http://") || base.starts_with("https://") {
        base.to_string()
    } else {
        format!("http://{base}")
    }
}

/// HTTP client for the validator/agent registry.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    http: reqwest::Client,
    base_url: String,
}

impl RegistryClient {
    /// Create a client for `addr` with a per-request timeout.
    pub fn new(addr: &str, timeout: Duration) -> RegistryResult<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: registry_base_url(addr),
        })
    }

    /// Base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// `GET /validators`.
    pub async fn discover_validators(&self) -> RegistryResult<Vec<ValidatorEndpoint>> {
        let response = self.http.get(self.url("/validators")).send().await?;
        let response = check_status(response).await?;
        let list: ValidatorList = response.json().await?;

        debug!(count = list.validators.len(), "Discovered validators");
        Ok(list
            .validators
            .into_iter()
            .map(|v| ValidatorEndpoint {
                id: v.id,
                endpoint: v.endpoint,
                status: v.status,
                last_seen: timestamp_from_unix(v.last_seen),
            })
            .collect())
    }

    /// `POST /agents`.
    pub async fn register(&self, registration: &AgentRegistration) -> RegistryResult<()> {
        let response = self
            .http
            .post(self.url("/agents"))
            .json(registration)
            .send()
            .await?;
        check_status(response).await?;
        info!(agent_id = %registration.id, registry = %self.base_url, "Registered with registry");
        Ok(())
    }

    /// `POST /agents/{id}/heartbeat`.
    pub async fn heartbeat(&self, agent_id: &str) -> RegistryResult<()> {
        let response = self
            .http
            .post(self.url(&format!("/agents/{agent_id}/heartbeat")))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    /// `DELETE /agents/{id}`.
    pub async fn unregister(&self, agent_id: &str) -> RegistryResult<()> {
        let response = self
            .http
            .delete(self.url(&format!("/agents/{agent_id}")))
            .send()
            .await?;
        check_status(response).await?;
        info!(agent_id, "Unregistered from registry");
        Ok(())
    }

    /// Send heartbeats every `interval` until `cancel` fires.
    ///
    /// Failures are logged and retried on the next tick.
    pub fn spawn_heartbeat(
        &self,
        agent_id: String,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick fires immediately; registration just happened.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = client.heartbeat(&agent_id).await {
                            warn!(agent_id = %agent_id, error = %e, "Registry heartbeat failed");
                        }
                    }
                }
            }
            debug!(agent_id = %agent_id, "Heartbeat loop stopped");
        })
    }
}

async fn check_status(response: reqwest::Response) -> RegistryResult<reqwest::Response> {
    let status = response.status();
    if status.as_u16() < 300 {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RegistryError::Status {
        status: status.as_u16(),
        body: truncate(body.trim(), MAX_ERROR_BODY),
    })
}

/// Cut `s` to at most `max` bytes on a char boundary.
pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
