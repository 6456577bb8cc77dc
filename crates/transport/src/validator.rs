//! Validator service client.

use async_trait::async_trait;
use subnet_types::{ExecutionReceipt, ExecutionReport, ValidatorEndpoint};
use tonic::transport::Channel;
use tracing::{debug, info};

use crate::channel::{connect_lazy, ClientConfig};
use crate::error::TransportResult;
use crate::proto::{self, paths};
use crate::rpc::RpcClient;
use crate::signing::RequestSigner;

/// Validator answer to a report batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportBatchAck {
    /// Receipts for accepted reports.
    pub receipts: Vec<ExecutionReceipt>,
    /// Number of accepted reports.
    pub success: u32,
    /// Number of rejected reports.
    pub failed: u32,
    /// Validator message.
    pub message: String,
}

/// Operations the agent runtime needs from a validator.
#[async_trait]
pub trait ValidatorTransport: Send + Sync {
    /// Submit a single execution report.
    async fn submit_execution_report(
        &self,
        report: &ExecutionReport,
    ) -> TransportResult<ExecutionReceipt>;

    /// Submit several execution reports in one call.
    async fn submit_execution_report_batch(
        &self,
        reports: &[ExecutionReport],
    ) -> TransportResult<ReportBatchAck>;

    /// Fetch the validator set of a subnet.
    async fn get_validator_set(&self, subnet_id: &str) -> TransportResult<Vec<ValidatorEndpoint>>;
}

/// gRPC client for `subnet.v1.ValidatorService`.
#[derive(Debug, Clone)]
pub struct ValidatorClient {
    rpc: RpcClient,
    endpoint: String,
}

impl ValidatorClient {
    /// Create a client; the connection is established on first use.
    pub fn new(config: ClientConfig) -> TransportResult<Self> {
        let channel = connect_lazy(&config)?;
        info!(endpoint = %config.endpoint, signed = config.signer.is_some(), "Validator client created");
        Ok(Self {
            rpc: RpcClient::new(channel, config.signer),
            endpoint: config.endpoint,
        })
    }

    /// Create a client from an existing channel (for testing).
    pub fn from_channel(channel: Channel, signer: Option<RequestSigner>) -> Self {
        Self {
            rpc: RpcClient::new(channel, signer),
            endpoint: String::new(),
        }
    }

    /// Configured endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ValidatorTransport for ValidatorClient {
    async fn submit_execution_report(
        &self,
        report: &ExecutionReport,
    ) -> TransportResult<ExecutionReceipt> {
        let message = proto::ExecutionReport::from(report);
        let request = self.rpc.signed(paths::SUBMIT_EXECUTION_REPORT, message)?;
        let receipt: proto::Receipt = self
            .rpc
            .unary(request, paths::SUBMIT_EXECUTION_REPORT)
            .await?
            .into_inner();

        debug!(report_id = %report.report_id, validator_id = %receipt.validator_id, "Report accepted");
        Ok(receipt.into_receipt(&self.endpoint))
    }

    async fn submit_execution_report_batch(
        &self,
        reports: &[ExecutionReport],
    ) -> TransportResult<ReportBatchAck> {
        let message = proto::ExecutionReportBatchRequest {
            reports: reports.iter().map(proto::ExecutionReport::from).collect(),
            batch_id: format!("batch-{}", hex::encode(rand::random::<[u8; 8]>())),
        };
        let request = self
            .rpc
            .signed(paths::SUBMIT_EXECUTION_REPORT_BATCH, message)?;
        let response: proto::ExecutionReportBatchResponse = self
            .rpc
            .unary(request, paths::SUBMIT_EXECUTION_REPORT_BATCH)
            .await?
            .into_inner();

        Ok(ReportBatchAck {
            receipts: response
                .receipts
                .into_iter()
                .map(|r| r.into_receipt(&self.endpoint))
                .collect(),
            success: response.success,
            failed: response.failed,
            message: response.msg,
        })
    }

    async fn get_validator_set(&self, subnet_id: &str) -> TransportResult<Vec<ValidatorEndpoint>> {
        let message = proto::GetValidatorSetRequest {
            subnet_id: subnet_id.to_string(),
        };
        let request = self.rpc.signed(paths::GET_VALIDATOR_SET, message)?;
        let set: proto::ValidatorSet = self
            .rpc
            .unary(request, paths::GET_VALIDATOR_SET)
            .await?
            .into_inner();

        Ok(set.validators.into_iter().map(ValidatorEndpoint::from).collect())
    }
}
