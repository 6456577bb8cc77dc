//! Core value types for the subnet agent runtime.
//!
//! These types are shared by the transport clients and the agent runtime.
//! They are plain value objects: produced once by a stream or a handler and
//! passed by value to a single owner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Metadata key carrying the agent's on-chain address.
pub const CHAIN_ADDRESS_METADATA_KEY: &str = "chain_address";

/// Metadata key carrying the bid identifier a task was assigned under.
pub const BID_ID_METADATA_KEY: &str = "bid_id";

/// Metadata key carrying an execution error message on failed reports.
pub const ERROR_METADATA_KEY: &str = "error";

/// String metadata attached to bids, tasks, results and reports.
pub type Metadata = HashMap<String, String>;

/// A concrete unit of work assigned to this agent after bid acceptance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Task (assignment) identifier.
    pub id: String,
    /// Intent the task was created from.
    pub intent_id: String,
    /// Task type, matched against agent capabilities.
    #[serde(rename = "type")]
    pub task_type: String,
    /// Opaque task input.
    #[serde(default)]
    pub payload: Vec<u8>,
    /// Free-form metadata; carries `bid_id` when known.
    #[serde(default)]
    pub metadata: Metadata,
    /// Point in time after which the task result is no longer useful.
    pub deadline: DateTime<Utc>,
    /// Creation time reported by the matcher.
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Bid identifier the task was assigned under, if the matcher sent one.
    pub fn bid_id(&self) -> Option<&str> {
        self.metadata
            .get(BID_ID_METADATA_KEY)
            .map(String::as_str)
            .filter(|id| !id.is_empty())
    }
}

/// Output of a task handler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Result payload.
    #[serde(default)]
    pub data: Vec<u8>,
    /// Whether the task succeeded.
    pub success: bool,
    /// Error message when `success` is false.
    #[serde(default)]
    pub error: String,
    /// Extra metadata merged into the execution report.
    #[serde(default)]
    pub metadata: Metadata,
}

impl TaskResult {
    /// Successful result carrying `data`.
    pub fn success(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            success: true,
            ..Self::default()
        }
    }

    /// Failed result carrying an error message.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            ..Self::default()
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// An announced unit of future work open for bidding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    /// Intent identifier.
    pub id: String,
    /// Intent type, matched against agent capabilities.
    #[serde(rename = "type")]
    pub intent_type: String,
    /// Human readable description.
    #[serde(default)]
    pub description: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// A priced offer produced by a bidding strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    /// Offered price in the smallest unit of `currency`.
    pub price: u64,
    /// Currency symbol.
    pub currency: String,
    /// Free-form metadata; must carry `chain_address` when one is configured.
    #[serde(default)]
    pub metadata: Metadata,
}

impl Bid {
    /// Bid at `price` in `currency` with empty metadata.
    pub fn new(price: u64, currency: impl Into<String>) -> Self {
        Self {
            price,
            currency: currency.into(),
            metadata: Metadata::new(),
        }
    }
}

/// A bid ready for submission to the matcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BidSubmission {
    /// Unique bid identifier (`0x` + 32 random bytes hex).
    pub bid_id: String,
    /// Intent being bid on.
    pub intent_id: String,
    /// Bidding agent.
    pub agent_id: String,
    /// Bid price.
    pub price: u64,
    /// Currency symbol.
    pub currency: String,
    /// Random hex nonce.
    pub nonce: String,
    /// Submission time.
    pub submitted_at: DateTime<Utc>,
    /// Metadata after chain address injection.
    pub metadata: Metadata,
}

/// Matcher answer to a single bid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BidAck {
    /// Bid the answer refers to.
    pub bid_id: String,
    /// Whether the matcher accepted the bid.
    pub accepted: bool,
    /// Matcher-provided reason or status message.
    pub message: String,
}

/// Matcher answer to a bid batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BidBatchAck {
    /// Per-bid answers, in submission order when the matcher preserves it.
    pub acks: Vec<BidAck>,
    /// Number of accepted bids.
    pub accepted: u32,
    /// Number of rejected bids.
    pub rejected: u32,
}

/// Accept/reject answer sent to the matcher for an assigned task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResponse {
    /// Task being answered.
    pub task_id: String,
    /// Responding agent.
    pub agent_id: String,
    /// Whether the agent takes the task.
    pub accepted: bool,
    /// Reason when rejecting.
    pub reason: String,
    /// Response time.
    pub timestamp: DateTime<Utc>,
}

/// Outcome status of an execution report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionReportStatus {
    /// Status not set.
    #[serde(rename = "status_unspecified")]
    Unspecified,
    /// Task succeeded.
    #[default]
    Success,
    /// Task failed.
    Failed,
    /// Task partially succeeded.
    Partial,
}

impl ExecutionReportStatus {
    /// Wire name used in HTTP report payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionReportStatus::Unspecified => "status_unspecified",
            ExecutionReportStatus::Success => "success",
            ExecutionReportStatus::Failed => "failed",
            ExecutionReportStatus::Partial => "partial",
        }
    }
}

impl fmt::Display for ExecutionReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown report status name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid status: {0}")]
pub struct InvalidStatus(pub String);

impl FromStr for ExecutionReportStatus {
    type Err = InvalidStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "status_unspecified" | "unspecified" => Ok(ExecutionReportStatus::Unspecified),
            "success" => Ok(ExecutionReportStatus::Success),
            "failed" => Ok(ExecutionReportStatus::Failed),
            "partial" => Ok(ExecutionReportStatus::Partial),
            _ => Err(InvalidStatus(s.to_string())),
        }
    }
}

/// Signed record of a task outcome sent to validators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Unique report identifier.
    pub report_id: String,
    /// Assignment (task) the report is for.
    pub assignment_id: String,
    /// Intent the assignment was created from.
    pub intent_id: String,
    /// Reporting agent; resolved from the runtime identity when empty.
    #[serde(default)]
    pub agent_id: String,
    /// Outcome status.
    #[serde(default)]
    pub status: ExecutionReportStatus,
    /// Result payload.
    #[serde(default)]
    pub result_data: Vec<u8>,
    /// Report time; `None` means "now" at submission.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: Metadata,
}

/// A validator's acknowledgment of a received execution report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReceipt {
    /// Report the receipt acknowledges.
    pub report_id: String,
    /// Intent of the report.
    pub intent_id: String,
    /// Acknowledging validator.
    pub validator_id: String,
    /// Validator-side status string.
    pub status: String,
    /// Time the validator received the report.
    pub received_at: Option<DateTime<Utc>>,
    /// Optional validator message.
    #[serde(default)]
    pub message: String,
    /// Endpoint the report was delivered to.
    #[serde(default)]
    pub endpoint: String,
}

/// A discovered validator endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorEndpoint {
    /// Validator identifier.
    pub id: String,
    /// Base URL or host:port of the validator.
    pub endpoint: String,
    /// Registry-reported status.
    #[serde(default)]
    pub status: String,
    /// Last time the registry saw the validator.
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

/// Convert unix seconds to a UTC timestamp, treating zero as absent.
pub fn timestamp_from_unix(secs: i64) -> Option<DateTime<Utc>> {
    if secs <= 0 {
        return None;
    }
    DateTime::from_timestamp(secs, 0)
}
