//! Execution report dispatcher.
//!
//! Discovers validator endpoints (registry query plus a static fallback),
//! normalizes them to the report URL, and delivers one report to all of them
//! concurrently. Delivery is partial-success: receipts from validators that
//! answered are returned together with an aggregated error for the rest.
//!
//! ```text
//! registry /validators ─┐
//!                       ├─► normalize ─► dedup/sort ─► POST ×N ─► receipts + FanoutError
//! validator_addr ───────┘
//! ```

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use base64::prelude::{Engine as _, BASE64_STANDARD};
use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use subnet_transport::RequestSigner;
use subnet_types::{timestamp_from_unix, ExecutionReceipt, ExecutionReport};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{EndpointFailure, FanoutError, RegistryResult, ReportError};
use crate::identity::AgentIdentity;
use crate::metrics::AgentMetrics;
use crate::registry::{truncate, RegistryClient};

/// Path every report URL ends in.
pub const EXECUTION_REPORT_PATH: &str = "/api/v1/execution-report";

/// Default per-validator delivery timeout.
pub const DEFAULT_REPORT_TIMEOUT: Duration = Duration::from_secs(10);

const MAX_ERROR_BODY: usize = 1024;

/// Normalize a validator address to its report URL.
///
/// Adds `http://` when no scheme is given, strips query and fragment, and
/// makes the path end in exactly one [`EXECUTION_REPORT_PATH`]. Blank input
/// yields `None`. Applying it to its own output is a no-op.
pub fn execution_report_url(endpoint: &str) -> Result<Option<String>, url::ParseError> {
    let trimmed = endpoint.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };

    let mut parsed = Url::parse(&with_scheme)?;
    let path = parsed.path().trim_end_matches('/').to_string();
    if path.is_empty() {
        parsed.set_path(EXECUTION_REPORT_PATH);
    } else if path.ends_with(EXECUTION_REPORT_PATH) {
        parsed.set_path(&path);
    } else {
        parsed.set_path(&format!("{path}{EXECUTION_REPORT_PATH}"));
    }
    parsed.set_query(None);
    parsed.set_fragment(None);

    Ok(Some(parsed.to_string()))
}

/// JSON body of `POST …/api/v1/execution-report`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportPayload {
    pub report_id: String,
    pub assignment_id: String,
    pub intent_id: String,
    pub agent_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub status: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub result_data: String,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ReceiptReply {
    #[serde(default)]
    report_id: String,
    #[serde(default)]
    intent_id: String,
    #[serde(default)]
    validator_id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    received_ts: i64,
    #[serde(default)]
    message: String,
}

/// Outcome of a report fan-out with at least one receipt.
#[derive(Debug, Clone, Default)]
pub struct ReportSubmission {
    /// Receipts from validators that acknowledged, in endpoint order.
    pub receipts: Vec<ExecutionReceipt>,
    /// Failures of the remaining deliveries.
    pub error: Option<FanoutError>,
}

impl ReportSubmission {
    /// True when some, but not all, deliveries failed.
    pub fn is_partial(&self) -> bool {
        self.error.is_some()
    }
}

/// Dispatcher settings.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Registry used for discovery.
    pub registry: Option<RegistryClient>,
    /// Static validator address used in addition to discovery.
    pub fallback_addr: Option<String>,
    /// Upper bound for each delivery.
    pub per_call_timeout: Duration,
    /// Aborts in-flight deliveries.
    pub cancel: CancellationToken,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            registry: None,
            fallback_addr: None,
            per_call_timeout: DEFAULT_REPORT_TIMEOUT,
            cancel: CancellationToken::new(),
        }
    }
}

/// Delivers execution reports to every known validator.
#[derive(Debug, Clone)]
pub struct ReportDispatcher {
    http: reqwest::Client,
    config: DispatcherConfig,
    identity: Arc<AgentIdentity>,
    signer: Option<RequestSigner>,
    metrics: AgentMetrics,
}

impl ReportDispatcher {
    pub fn new(
        config: DispatcherConfig,
        identity: Arc<AgentIdentity>,
        metrics: AgentMetrics,
    ) -> RegistryResult<Self> {
        let http = reqwest::Client::builder().build()?;
        let signer = identity.request_signer();
        Ok(Self {
            http,
            config,
            identity,
            signer,
            metrics,
        })
    }

    /// True when at least one endpoint source is configured.
    pub fn has_sources(&self) -> bool {
        self.config.registry.is_some()
            || self
                .config
                .fallback_addr
                .as_deref()
                .is_some_and(|a| !a.trim().is_empty())
    }

    /// Validate `report` and build the wire payload.
    pub fn prepare(&self, report: &ExecutionReport) -> Result<ReportPayload, ReportError> {
        let report = resolve_report(&self.identity, report)?;

        let result_data = if report.result_data.is_empty() {
            String::new()
        } else {
            BASE64_STANDARD.encode(&report.result_data)
        };

        Ok(ReportPayload {
            report_id: report.report_id,
            assignment_id: report.assignment_id,
            intent_id: report.intent_id,
            agent_id: report.agent_id,
            status: report.status.as_str().to_string(),
            result_data,
            timestamp: report.timestamp.unwrap_or_else(Utc::now).timestamp(),
            metadata: report.metadata,
        })
    }

    /// Discover, normalize, deduplicate and sort report URLs.
    ///
    /// Returns the endpoints plus any discovery or parse errors; errors do
    /// not prevent the remaining sources from being used.
    pub async fn endpoints(&self) -> (Vec<String>, Vec<String>) {
        let mut endpoints = BTreeSet::new();
        let mut errors = Vec::new();

        let mut add = |raw: &str, errors: &mut Vec<String>| match execution_report_url(raw) {
            Ok(Some(url)) => {
                endpoints.insert(url);
            }
            Ok(None) => {}
            Err(e) => errors.push(format!("{raw}: {e}")),
        };

        if let Some(registry) = &self.config.registry {
            match registry.discover_validators().await {
                Ok(validators) => {
                    for validator in &validators {
                        add(&validator.endpoint, &mut errors);
                    }
                }
                Err(e) => errors.push(format!("discover validators: {e}")),
            }
        }
        if let Some(fallback) = &self.config.fallback_addr {
            add(fallback, &mut errors);
        }

        (endpoints.into_iter().collect(), errors)
    }

    /// Deliver `report` to every discovered validator.
    ///
    /// `deadline` bounds the whole fan-out; each delivery gets the remaining
    /// time capped at the per-call timeout.
    pub async fn submit(
        &self,
        report: &ExecutionReport,
        deadline: Option<Instant>,
    ) -> Result<ReportSubmission, ReportError> {
        let payload = self.prepare(report)?;

        let (endpoints, discovery_errors) = self.endpoints().await;
        if endpoints.is_empty() {
            if discovery_errors.is_empty() {
                return Err(ReportError::NoEndpoints);
            }
            return Err(ReportError::Discovery(discovery_errors.join("; ")));
        }
        for error in &discovery_errors {
            warn!(report_id = %payload.report_id, error = %error, "Validator discovery error");
        }
        if self.config.cancel.is_cancelled() {
            return Err(ReportError::Cancelled);
        }

        debug!(report_id = %payload.report_id, endpoints = endpoints.len(), "Submitting execution report");
        let outcomes = join_all(
            endpoints
                .iter()
                .map(|endpoint| self.deliver(endpoint, &payload, deadline)),
        )
        .await;

        let mut receipts = Vec::new();
        let mut failures = Vec::new();
        for (endpoint, outcome) in endpoints.iter().zip(outcomes) {
            match outcome {
                Ok(mut receipt) => {
                    receipt.endpoint = endpoint.clone();
                    receipts.push(receipt);
                    self.metrics.record_report_success();
                }
                Err(reason) => {
                    warn!(report_id = %payload.report_id, endpoint = %endpoint, reason = %reason, "Report delivery failed");
                    failures.push(EndpointFailure {
                        endpoint: endpoint.clone(),
                        reason,
                    });
                    self.metrics.record_report_failure();
                }
            }
        }

        if receipts.is_empty() {
            if self.config.cancel.is_cancelled() {
                return Err(ReportError::Cancelled);
            }
            return Err(ReportError::AllFailed(FanoutError { failures }));
        }

        info!(
            report_id = %payload.report_id,
            receipts = receipts.len(),
            failed = failures.len(),
            "Execution report submitted"
        );
        let error = (!failures.is_empty()).then_some(FanoutError { failures });
        Ok(ReportSubmission { receipts, error })
    }

    async fn deliver(
        &self,
        endpoint: &str,
        payload: &ReportPayload,
        deadline: Option<Instant>,
    ) -> Result<ExecutionReceipt, String> {
        let mut timeout = self.config.per_call_timeout;
        if let Some(deadline) = deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err("deadline exceeded".to_string());
            }
            timeout = timeout.min(remaining);
        }

        let mut request = self.http.post(endpoint).timeout(timeout).json(payload);
        if let Some(signer) = &self.signer {
            let signed = signer
                .sign(EXECUTION_REPORT_PATH, Some(payload))
                .map_err(|e| format!("sign report: {e}"))?;
            for (key, value) in signed.pairs() {
                request = request.header(key, value);
            }
        }

        let exchange = async move {
            let response = request
                .send()
                .await
                .map_err(|e| format!("submit report: {e}"))?;
            let status = response.status();
            if status.as_u16() >= 300 {
                let body = response.text().await.unwrap_or_default();
                let body = truncate(body.trim(), MAX_ERROR_BODY);
                return Err(if body.is_empty() {
                    format!("validator returned {status}")
                } else {
                    format!("validator returned {status}: {body}")
                });
            }
            let reply: ReceiptReply = response
                .json()
                .await
                .map_err(|e| format!("decode response: {e}"))?;
            Ok(ExecutionReceipt {
                report_id: reply.report_id,
                intent_id: reply.intent_id,
                validator_id: reply.validator_id,
                status: reply.status,
                received_at: timestamp_from_unix(reply.received_ts),
                message: reply.message,
                endpoint: endpoint.to_string(),
            })
        };

        tokio::select! {
            _ = self.config.cancel.cancelled() => Err("cancelled".to_string()),
            outcome = tokio::time::timeout(timeout, exchange) => match outcome {
                Ok(result) => result,
                Err(_) => Err(format!("timed out after {}ms", timeout.as_millis())),
            },
        }
    }
}

/// Validate a report and fill in what the runtime knows.
///
/// Ids are trimmed and must be non-empty. An empty `agent_id` becomes the
/// identity's, a missing timestamp becomes now, and `chain_address` is
/// added to the metadata when the identity has one.
pub fn resolve_report(
    identity: &AgentIdentity,
    report: &ExecutionReport,
) -> Result<ExecutionReport, ReportError> {
    let report_id = required(&report.report_id, "report_id")?;
    let assignment_id = required(&report.assignment_id, "assignment_id")?;
    let intent_id = required(&report.intent_id, "intent_id")?;

    let agent_id = match report.agent_id.trim() {
        "" => identity.agent_id().to_string(),
        id => id.to_string(),
    };
    if agent_id.is_empty() {
        return Err(ReportError::Validation("agent_id is required".to_string()));
    }

    Ok(ExecutionReport {
        report_id,
        assignment_id,
        intent_id,
        agent_id,
        status: report.status,
        result_data: report.result_data.clone(),
        timestamp: Some(report.timestamp.unwrap_or_else(Utc::now)),
        metadata: identity.ensure_chain_address(&report.metadata),
    })
}

fn required(value: &str, field: &str) -> Result<String, ReportError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ReportError::Validation(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}
