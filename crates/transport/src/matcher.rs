//! Matcher service client.

use async_trait::async_trait;
use subnet_types::{BidAck, BidBatchAck, BidSubmission, Intent, Task, TaskResponse};
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use tracing::{debug, info};

use crate::channel::{connect_lazy, ClientConfig};
use crate::error::{TransportError, TransportResult};
use crate::proto::{self, paths};
use crate::rpc::RpcClient;
use crate::signing::RequestSigner;
use crate::subscription::{spawn_pump, Subscription};

/// Operations the agent runtime needs from the matcher.
///
/// Streaming operations never fail synchronously: a connection or signing
/// failure is delivered through the subscription's error channel.
#[async_trait]
pub trait MatcherTransport: Send + Sync {
    /// Submit one bid.
    async fn submit_bid(&self, bid: &BidSubmission) -> TransportResult<BidAck>;

    /// Submit several bids in one call.
    async fn submit_bid_batch(&self, bids: &[BidSubmission]) -> TransportResult<BidBatchAck>;

    /// Subscribe to intent announcements for a subnet.
    fn stream_intents(&self, subnet_id: &str, cancel: CancellationToken) -> Subscription<Intent>;

    /// Subscribe to task assignments for an agent.
    fn stream_tasks(&self, agent_id: &str, cancel: CancellationToken) -> Subscription<Task>;

    /// Accept or reject an assigned task.
    ///
    /// Returns [`TransportError::Rejected`] when the matcher declines the answer.
    async fn respond_to_task(&self, response: &TaskResponse) -> TransportResult<()>;
}

/// gRPC client for `subnet.v1.MatcherService`.
#[derive(Debug, Clone)]
pub struct MatcherClient {
    rpc: RpcClient,
    endpoint: String,
}

impl MatcherClient {
    /// Create a client; the connection is established on first use.
    pub fn new(config: ClientConfig) -> TransportResult<Self> {
        let channel = connect_lazy(&config)?;
        info!(endpoint = %config.endpoint, signed = config.signer.is_some(), "Matcher client created");
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
impl MatcherTransport for MatcherClient {
    async fn submit_bid(&self, bid: &BidSubmission) -> TransportResult<BidAck> {
        let message = proto::SubmitBidRequest {
            bid: Some(proto::Bid::from(bid)),
        };
        let request = self.rpc.signed(paths::SUBMIT_BID, message)?;
        let response: proto::SubmitBidResponse =
            self.rpc.unary(request, paths::SUBMIT_BID).await?.into_inner();

        debug!(bid_id = %bid.bid_id, has_ack = response.ack.is_some(), "Bid submitted");
        Ok(match response.ack {
            Some(ack) => ack.into_ack(&bid.bid_id),
            None => BidAck {
                bid_id: bid.bid_id.clone(),
                accepted: false,
                message: "no acknowledgement".to_string(),
            },
        })
    }

    async fn submit_bid_batch(&self, bids: &[BidSubmission]) -> TransportResult<BidBatchAck> {
        let message = proto::SubmitBidBatchRequest {
            bids: bids.iter().map(proto::Bid::from).collect(),
            batch_id: format!("batch-{}", hex::encode(rand::random::<[u8; 8]>())),
        };
        let request = self.rpc.signed(paths::SUBMIT_BID_BATCH, message)?;
        let response: proto::SubmitBidBatchResponse = self
            .rpc
            .unary(request, paths::SUBMIT_BID_BATCH)
            .await?
            .into_inner();

        let acks: Vec<BidAck> = response
            .acks
            .into_iter()
            .enumerate()
            .map(|(i, ack)| {
                let fallback = bids.get(i).map(|b| b.bid_id.as_str()).unwrap_or_default();
                ack.into_ack(fallback)
            })
            .collect();

        Ok(BidBatchAck {
            acks,
            accepted: response.success,
            rejected: response.failed,
        })
    }

    fn stream_intents(&self, subnet_id: &str, cancel: CancellationToken) -> Subscription<Intent> {
        let message = proto::StreamIntentsRequest {
            subnet_id: subnet_id.to_string(),
            intent_types: Vec::new(),
        };
        let request = self.rpc.signed_stream(paths::STREAM_INTENTS, message);
        let rpc = self.rpc.clone();

        spawn_pump::<proto::MatcherIntentUpdate, Intent, _>(
            async move {
                let response = rpc.server_streaming(request?, paths::STREAM_INTENTS).await?;
                Ok(response.into_inner())
            },
            cancel,
            paths::STREAM_INTENTS,
        )
    }

    fn stream_tasks(&self, agent_id: &str, cancel: CancellationToken) -> Subscription<Task> {
        let message = proto::StreamTasksRequest {
            agent_id: agent_id.to_string(),
        };
        let request = self.rpc.signed_stream(paths::STREAM_TASKS, message);
        let rpc = self.rpc.clone();

        spawn_pump::<proto::ExecutionTask, Task, _>(
            async move {
                let response = rpc.server_streaming(request?, paths::STREAM_TASKS).await?;
                Ok(response.into_inner())
            },
            cancel,
            paths::STREAM_TASKS,
        )
    }

    async fn respond_to_task(&self, response: &TaskResponse) -> TransportResult<()> {
        let message = proto::RespondToTaskRequest {
            response: Some(proto::TaskResponse::from(response)),
        };
        let request = self.rpc.signed(paths::RESPOND_TO_TASK, message)?;
        let reply: proto::RespondToTaskResponse = self
            .rpc
            .unary(request, paths::RESPOND_TO_TASK)
            .await?
            .into_inner();

        if reply.ok {
            Ok(())
        } else {
            let reason = if reply.msg.is_empty() {
                "task response not acknowledged".to_string()
            } else {
                reply.msg
            };
            Err(TransportError::Rejected(reason))
        }
    }
}
