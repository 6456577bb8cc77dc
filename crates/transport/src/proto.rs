//! Protobuf messages for the `subnet.v1` matcher and validator services.
//!
//! The messages are declared with `prost` derives rather than generated at
//! build time, so the crate builds without `protoc`. Request messages also
//! derive `Serialize` following proto3 JSON rules (original field names,
//! default values omitted, 64-bit integers as strings, bytes as base64,
//! enums by name); that JSON is what request signatures cover.

use base64::prelude::{Engine as _, BASE64_STANDARD};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use subnet_types as types;

/// gRPC method paths.
pub mod paths {
    /// Matcher bid submission.
    pub const SUBMIT_BID: &str = "/subnet.v1.MatcherService/SubmitBid";
    /// Matcher batch bid submission.
    pub const SUBMIT_BID_BATCH: &str = "/subnet.v1.MatcherService/SubmitBidBatch";
    /// Matcher intent stream.
    pub const STREAM_INTENTS: &str = "/subnet.v1.MatcherService/StreamIntents";
    /// Matcher task stream.
    pub const STREAM_TASKS: &str = "/subnet.v1.MatcherService/StreamTasks";
    /// Matcher task accept/reject.
    pub const RESPOND_TO_TASK: &str = "/subnet.v1.MatcherService/RespondToTask";
    /// Validator single report.
    pub const SUBMIT_EXECUTION_REPORT: &str = "/subnet.v1.ValidatorService/SubmitExecutionReport";
    /// Validator report batch.
    pub const SUBMIT_EXECUTION_REPORT_BATCH: &str =
        "/subnet.v1.ValidatorService/SubmitExecutionReportBatch";
    /// Validator set query.
    pub const GET_VALIDATOR_SET: &str = "/subnet.v1.ValidatorService/GetValidatorSet";
}

// proto3 JSON helpers

fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}

fn is_zero_i64(v: &i64) -> bool {
    *v == 0
}

fn is_false(v: &bool) -> bool {
    !*v
}

fn int_as_string<T: std::fmt::Display, S: Serializer>(v: &T, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(v)
}

fn bytes_as_base64<S: Serializer>(v: &[u8], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&BASE64_STANDARD.encode(v))
}

fn report_status_name<S: Serializer>(v: &i32, s: S) -> Result<S::Ok, S::Error> {
    match ReportStatus::try_from(*v) {
        Ok(status) => s.serialize_str(status.as_str_name()),
        Err(_) => s.serialize_i32(*v),
    }
}

// Matcher service

/// A bid on an intent.
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct Bid {
    #[prost(string, tag = "1")]
    #[serde(skip_serializing_if = "String::is_empty")]
    pub bid_id: String,
    #[prost(string, tag = "2")]
    #[serde(skip_serializing_if = "String::is_empty")]
    pub intent_id: String,
    #[prost(string, tag = "3")]
    #[serde(skip_serializing_if = "String::is_empty")]
    pub agent_id: String,
    #[prost(uint64, tag = "4")]
    #[serde(skip_serializing_if = "is_zero_u64", serialize_with = "int_as_string")]
    pub price: u64,
    #[prost(string, tag = "5")]
    #[serde(skip_serializing_if = "String::is_empty")]
    pub token: String,
    #[prost(int64, tag = "6")]
    #[serde(skip_serializing_if = "is_zero_i64", serialize_with = "int_as_string")]
    pub submitted_at: i64,
    #[prost(string, tag = "7")]
    #[serde(skip_serializing_if = "String::is_empty")]
    pub nonce: String,
    #[prost(map = "string, string", tag = "8")]
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct SubmitBidRequest {
    #[prost(message, optional, tag = "1")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bid: Option<Bid>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BidAck {
    #[prost(string, tag = "1")]
    pub bid_id: String,
    #[prost(bool, tag = "2")]
    pub accepted: bool,
    #[prost(string, tag = "3")]
    pub reason: String,
    #[prost(string, tag = "4")]
    pub status: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubmitBidResponse {
    #[prost(message, optional, tag = "1")]
    pub ack: Option<BidAck>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct SubmitBidBatchRequest {
    #[prost(message, repeated, tag = "1")]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub bids: Vec<Bid>,
    #[prost(string, tag = "2")]
    #[serde(skip_serializing_if = "String::is_empty")]
    pub batch_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubmitBidBatchResponse {
    #[prost(message, repeated, tag = "1")]
    pub acks: Vec<BidAck>,
    #[prost(uint32, tag = "2")]
    pub success: u32,
    #[prost(uint32, tag = "3")]
    pub failed: u32,
    #[prost(string, tag = "4")]
    pub msg: String,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct StreamIntentsRequest {
    #[prost(string, tag = "1")]
    #[serde(skip_serializing_if = "String::is_empty")]
    pub subnet_id: String,
    #[prost(string, repeated, tag = "2")]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub intent_types: Vec<String>,
}

/// Intent announcement pushed by the matcher.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MatcherIntentUpdate {
    #[prost(string, tag = "1")]
    pub intent_id: String,
    #[prost(string, tag = "2")]
    pub update_type: String,
    #[prost(int64, tag = "3")]
    pub timestamp: i64,
    #[prost(string, tag = "4")]
    pub payload: String,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct StreamTasksRequest {
    #[prost(string, tag = "1")]
    #[serde(skip_serializing_if = "String::is_empty")]
    pub agent_id: String,
}

/// Task assignment pushed by the matcher.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExecutionTask {
    #[prost(string, tag = "1")]
    pub task_id: String,
    #[prost(string, tag = "2")]
    pub intent_id: String,
    #[prost(string, tag = "3")]
    pub agent_id: String,
    #[prost(string, tag = "4")]
    pub bid_id: String,
    #[prost(int64, tag = "5")]
    pub created_at: i64,
    #[prost(int64, tag = "6")]
    pub deadline: i64,
    #[prost(bytes = "vec", tag = "7")]
    pub intent_data: Vec<u8>,
    #[prost(string, tag = "8")]
    pub intent_type: String,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct TaskResponse {
    #[prost(string, tag = "1")]
    #[serde(skip_serializing_if = "String::is_empty")]
    pub task_id: String,
    #[prost(string, tag = "2")]
    #[serde(skip_serializing_if = "String::is_empty")]
    pub agent_id: String,
    #[prost(bool, tag = "3")]
    #[serde(skip_serializing_if = "is_false")]
    pub accepted: bool,
    #[prost(string, tag = "4")]
    #[serde(skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[prost(int64, tag = "5")]
    #[serde(skip_serializing_if = "is_zero_i64", serialize_with = "int_as_string")]
    pub timestamp: i64,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct RespondToTaskRequest {
    #[prost(message, optional, tag = "1")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<TaskResponse>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RespondToTaskResponse {
    #[prost(bool, tag = "1")]
    pub ok: bool,
    #[prost(string, tag = "2")]
    pub msg: String,
}

// Validator service

/// Execution report status on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ReportStatus {
    Unspecified = 0,
    Success = 1,
    Failed = 2,
    Partial = 3,
}

impl ReportStatus {
    /// Enum value name as written in the schema.
    pub fn as_str_name(&self) -> &'static str {
        match self {
            ReportStatus::Unspecified => "STATUS_UNSPECIFIED",
            ReportStatus::Success => "SUCCESS",
            ReportStatus::Failed => "FAILED",
            ReportStatus::Partial => "PARTIAL",
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct ErrorInfo {
    #[prost(string, tag = "1")]
    #[serde(skip_serializing_if = "String::is_empty")]
    pub code: String,
    #[prost(string, tag = "2")]
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct ExecutionReport {
    #[prost(string, tag = "1")]
    #[serde(skip_serializing_if = "String::is_empty")]
    pub report_id: String,
    #[prost(string, tag = "2")]
    #[serde(skip_serializing_if = "String::is_empty")]
    pub assignment_id: String,
    #[prost(string, tag = "3")]
    #[serde(skip_serializing_if = "String::is_empty")]
    pub intent_id: String,
    #[prost(string, tag = "4")]
    #[serde(skip_serializing_if = "String::is_empty")]
    pub agent_id: String,
    #[prost(enumeration = "ReportStatus", tag = "5")]
    #[serde(skip_serializing_if = "is_zero_i32", serialize_with = "report_status_name")]
    pub status: i32,
    #[prost(bytes = "vec", tag = "6")]
    #[serde(skip_serializing_if = "Vec::is_empty", serialize_with = "bytes_as_base64")]
    pub result_data: Vec<u8>,
    #[prost(int64, tag = "7")]
    #[serde(skip_serializing_if = "is_zero_i64", serialize_with = "int_as_string")]
    pub timestamp: i64,
    #[prost(message, optional, tag = "8")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[prost(map = "string, string", tag = "9")]
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

fn is_zero_i32(v: &i32) -> bool {
    *v == 0
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Receipt {
    #[prost(string, tag = "1")]
    pub report_id: String,
    #[prost(string, tag = "2")]
    pub intent_id: String,
    #[prost(string, tag = "3")]
    pub validator_id: String,
    #[prost(int64, tag = "4")]
    pub received_ts: i64,
    #[prost(string, tag = "5")]
    pub status: String,
    #[prost(string, tag = "6")]
    pub message: String,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct ExecutionReportBatchRequest {
    #[prost(message, repeated, tag = "1")]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reports: Vec<ExecutionReport>,
    #[prost(string, tag = "2")]
    #[serde(skip_serializing_if = "String::is_empty")]
    pub batch_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExecutionReportBatchResponse {
    #[prost(message, repeated, tag = "1")]
    pub receipts: Vec<Receipt>,
    #[prost(uint32, tag = "2")]
    pub success: u32,
    #[prost(uint32, tag = "3")]
    pub failed: u32,
    #[prost(string, tag = "4")]
    pub msg: String,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct GetValidatorSetRequest {
    #[prost(string, tag = "1")]
    #[serde(skip_serializing_if = "String::is_empty")]
    pub subnet_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ValidatorInfo {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub endpoint: String,
    #[prost(string, tag = "3")]
    pub status: String,
    #[prost(int64, tag = "4")]
    pub last_seen: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ValidatorSet {
    #[prost(message, repeated, tag = "1")]
    pub validators: Vec<ValidatorInfo>,
}

// Conversions between wire messages and runtime types.

fn unix_or_epoch(secs: i64) -> DateTime<Utc> {
    types::timestamp_from_unix(secs).unwrap_or_default()
}

impl From<&types::BidSubmission> for Bid {
    fn from(bid: &types::BidSubmission) -> Self {
        Self {
            bid_id: bid.bid_id.clone(),
            intent_id: bid.intent_id.clone(),
            agent_id: bid.agent_id.clone(),
            price: bid.price,
            token: bid.currency.clone(),
            submitted_at: bid.submitted_at.timestamp(),
            nonce: bid.nonce.clone(),
            metadata: bid.metadata.clone(),
        }
    }
}

impl BidAck {
    /// Runtime form; falls back to `bid_id` when the matcher omits it.
    pub fn into_ack(self, bid_id: &str) -> types::BidAck {
        let message = if self.reason.is_empty() {
            self.status
        } else {
            self.reason
        };
        types::BidAck {
            bid_id: if self.bid_id.is_empty() {
                bid_id.to_string()
            } else {
                self.bid_id
            },
            accepted: self.accepted,
            message,
        }
    }
}

impl From<ExecutionTask> for types::Task {
    fn from(task: ExecutionTask) -> Self {
        let mut metadata = types::Metadata::new();
        metadata.insert(types::BID_ID_METADATA_KEY.to_string(), task.bid_id);
        Self {
            id: task.task_id,
            intent_id: task.intent_id,
            task_type: task.intent_type,
            payload: task.intent_data,
            metadata,
            deadline: unix_or_epoch(task.deadline),
            created_at: unix_or_epoch(task.created_at),
        }
    }
}

impl From<MatcherIntentUpdate> for types::Intent {
    fn from(update: MatcherIntentUpdate) -> Self {
        let intent_type = if update.update_type.is_empty() {
            "unknown".to_string()
        } else {
            update.update_type
        };
        Self {
            id: update.intent_id,
            intent_type,
            description: update.payload,
            created_at: types::timestamp_from_unix(update.timestamp).unwrap_or_else(Utc::now),
        }
    }
}

impl From<&types::TaskResponse> for TaskResponse {
    fn from(response: &types::TaskResponse) -> Self {
        Self {
            task_id: response.task_id.clone(),
            agent_id: response.agent_id.clone(),
            accepted: response.accepted,
            reason: response.reason.clone(),
            timestamp: response.timestamp.timestamp(),
        }
    }
}

impl From<types::ExecutionReportStatus> for ReportStatus {
    fn from(status: types::ExecutionReportStatus) -> Self {
        match status {
            types::ExecutionReportStatus::Unspecified => ReportStatus::Unspecified,
            types::ExecutionReportStatus::Success => ReportStatus::Success,
            types::ExecutionReportStatus::Failed => ReportStatus::Failed,
            types::ExecutionReportStatus::Partial => ReportStatus::Partial,
        }
    }
}

impl From<&types::ExecutionReport> for ExecutionReport {
    fn from(report: &types::ExecutionReport) -> Self {
        let error = match report.metadata.get(types::ERROR_METADATA_KEY) {
            Some(message) if report.status == types::ExecutionReportStatus::Failed => {
                Some(ErrorInfo {
                    code: "EXECUTION_FAILED".to_string(),
                    message: message.clone(),
                })
            }
            _ => None,
        };
        Self {
            report_id: report.report_id.clone(),
            assignment_id: report.assignment_id.clone(),
            intent_id: report.intent_id.clone(),
            agent_id: report.agent_id.clone(),
            status: ReportStatus::from(report.status) as i32,
            result_data: report.result_data.clone(),
            timestamp: report.timestamp.unwrap_or_else(Utc::now).timestamp(),
            error,
            metadata: report.metadata.clone(),
        }
    }
}

impl Receipt {
    /// Runtime form, tagged with the endpoint that issued it.
    pub fn into_receipt(self, endpoint: &str) -> types::ExecutionReceipt {
        types::ExecutionReceipt {
            report_id: self.report_id,
            intent_id: self.intent_id,
            validator_id: self.validator_id,
            status: self.status,
            received_at: types::timestamp_from_unix(self.received_ts),
            message: self.message,
            endpoint: endpoint.to_string(),
        }
    }
}

impl From<ValidatorInfo> for types::ValidatorEndpoint {
    fn from(info: ValidatorInfo) -> Self {
        Self {
            id: info.id,
            endpoint: info.endpoint,
            status: info.status,
            last_seen: types::timestamp_from_unix(info.last_seen),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;
    use serde_json::json;

    #[test]
    fn test_bid_request_json_follows_proto3_rules() {
        let request = SubmitBidRequest {
            bid: Some(Bid {
                bid_id: "0x01".into(),
                intent_id: "intent-1".into(),
                agent_id: "agent-1".into(),
                price: 150,
                token: "PIN".into(),
                submitted_at: 1_700_000_000,
                nonce: String::new(),
                metadata: HashMap::from([("chain_address".to_string(), "0xabc".to_string())]),
            }),
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "bid": {
                    "bid_id": "0x01",
                    "intent_id": "intent-1",
                    "agent_id": "agent-1",
                    "price": "150",
                    "token": "PIN",
                    "submitted_at": "1700000000",
                    "metadata": {"chain_address": "0xabc"}
                }
            })
        );
    }

    #[test]
    fn test_report_json_uses_enum_names_and_base64() {
        let report = ExecutionReport {
            report_id: "r1".into(),
            status: ReportStatus::Failed as i32,
            result_data: b"hi".to_vec(),
            ..Default::default()
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value, json!({"report_id": "r1", "status": "FAILED", "result_data": "aGk="}));
    }

    #[test]
    fn test_execution_task_conversion() {
        let wire = ExecutionTask {
            task_id: "task-1".into(),
            intent_id: "intent-1".into(),
            agent_id: "agent-1".into(),
            bid_id: "0xbid".into(),
            created_at: 1_700_000_000,
            deadline: 1_700_000_300,
            intent_data: b"payload".to_vec(),
            intent_type: "compute".into(),
        };

        let decoded = ExecutionTask::decode(wire.encode_to_vec().as_slice()).unwrap();
        let task: types::Task = decoded.into();
        assert_eq!(task.id, "task-1");
        assert_eq!(task.task_type, "compute");
        assert_eq!(task.payload, b"payload");
        assert_eq!(task.bid_id(), Some("0xbid"));
        assert_eq!(task.deadline.timestamp(), 1_700_000_300);
    }

    #[test]
    fn test_intent_update_defaults_type() {
        let intent: types::Intent = MatcherIntentUpdate {
            intent_id: "i1".into(),
            ..Default::default()
        }
        .into();
        assert_eq!(intent.intent_type, "unknown");
    }

    #[test]
    fn test_failed_report_carries_error_info() {
        let mut report = types::ExecutionReport {
            report_id: "r1".into(),
            assignment_id: "t1".into(),
            intent_id: "i1".into(),
            agent_id: "a1".into(),
            status: types::ExecutionReportStatus::Failed,
            ..Default::default()
        };
        report
            .metadata
            .insert(types::ERROR_METADATA_KEY.into(), "boom".into());

        let wire = ExecutionReport::from(&report);
        assert_eq!(wire.status(), ReportStatus::Failed);
        assert_eq!(wire.error.unwrap().message, "boom");
        assert!(wire.timestamp > 0);
    }

    #[test]
    fn test_bid_ack_conversion_prefers_reason() {
        let ack = BidAck {
            bid_id: String::new(),
            accepted: false,
            reason: "price too high".into(),
            status: "rejected".into(),
        }
        .into_ack("0xbid");
        assert_eq!(ack.bid_id, "0xbid");
        assert_eq!(ack.message, "price too high");
    }
}
