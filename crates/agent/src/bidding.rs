//! Bidding engine.
//!
//! Turns intents into bid submissions: strategy filter, pricing, chain
//! address injection, nonce and id generation, then a bounded matcher call.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use subnet_transport::{generate_nonce, MatcherTransport};
use subnet_types::{Bid, BidAck, BidBatchAck, BidSubmission, Intent};
use tracing::{debug, info, warn};

use crate::callbacks::CallbackBus;
use crate::error::{AgentError, AgentResult};
use crate::handler::BiddingStrategy;
use crate::identity::AgentIdentity;
use crate::metrics::AgentMetrics;

/// What happened to one intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BidOutcome {
    /// Strategy declined; nothing was sent.
    Skipped,
    /// Matcher accepted the bid.
    Accepted(BidAck),
    /// Matcher answered but did not accept.
    Rejected(BidAck),
    /// The call failed or timed out.
    Failed {
        /// Bid that was attempted.
        bid_id: String,
        /// Failure description.
        reason: String,
    },
}

/// Fresh bid identifier: `0x` followed by 32 random bytes in hex.
pub fn generate_bid_id() -> String {
    format!("0x{}", hex::encode(rand::random::<[u8; 32]>()))
}

/// Build the submission for `bid` on `intent_id`.
pub fn build_submission(identity: &AgentIdentity, intent_id: &str, bid: &Bid) -> BidSubmission {
    BidSubmission {
        bid_id: generate_bid_id(),
        intent_id: intent_id.to_string(),
        agent_id: identity.agent_id().to_string(),
        price: bid.price,
        currency: bid.currency.clone(),
        nonce: generate_nonce(),
        submitted_at: Utc::now(),
        metadata: identity.ensure_chain_address(&bid.metadata),
    }
}

/// Submits bids to the matcher and tracks the outcome.
pub struct BiddingEngine {
    matcher: Arc<dyn MatcherTransport>,
    identity: Arc<AgentIdentity>,
    metrics: AgentMetrics,
    callbacks: CallbackBus,
    timeout: Duration,
}

impl BiddingEngine {
    pub fn new(
        matcher: Arc<dyn MatcherTransport>,
        identity: Arc<AgentIdentity>,
        metrics: AgentMetrics,
        callbacks: CallbackBus,
        timeout: Duration,
    ) -> Self {
        Self {
            matcher,
            identity,
            metrics,
            callbacks,
            timeout,
        }
    }

    /// Evaluate one intent and bid on it if `strategy` wants to.
    pub async fn handle_intent(&self, strategy: &dyn BiddingStrategy, intent: &Intent) -> BidOutcome {
        if !strategy.should_bid(intent) {
            debug!(intent_id = %intent.id, intent_type = %intent.intent_type, "Skipping intent");
            return BidOutcome::Skipped;
        }
        let Some(bid) = strategy.calculate_bid(intent) else {
            debug!(intent_id = %intent.id, "Strategy produced no bid");
            return BidOutcome::Skipped;
        };

        let submission = build_submission(&self.identity, &intent.id, &bid);
        let bid_id = submission.bid_id.clone();

        let outcome = tokio::time::timeout(self.timeout, self.matcher.submit_bid(&submission)).await;
        match outcome {
            Ok(Ok(ack)) if ack.accepted => {
                self.metrics.record_bid(true);
                info!(
                    intent_id = %intent.id,
                    bid_id = %bid_id,
                    price = submission.price,
                    currency = %submission.currency,
                    "Bid accepted"
                );
                let submitted = Bid {
                    price: submission.price,
                    currency: submission.currency,
                    metadata: submission.metadata,
                };
                self.callbacks.bid_submitted(intent, &submitted);
                BidOutcome::Accepted(ack)
            }
            Ok(Ok(ack)) => {
                self.metrics.record_bid(false);
                warn!(intent_id = %intent.id, bid_id = %bid_id, message = %ack.message, "Bid rejected");
                self.callbacks.bid_failed(&intent.id, &bid_id, &ack.message);
                BidOutcome::Rejected(ack)
            }
            Ok(Err(e)) => {
                self.metrics.record_bid(false);
                let reason = e.to_string();
                warn!(intent_id = %intent.id, bid_id = %bid_id, error = %reason, "Bid submission failed");
                self.callbacks.bid_failed(&intent.id, &bid_id, &reason);
                self.callbacks.error(&AgentError::Transport(e));
                BidOutcome::Failed { bid_id, reason }
            }
            Err(_) => {
                self.metrics.record_bid(false);
                let reason = format!("bid submission timed out after {}ms", self.timeout.as_millis());
                warn!(intent_id = %intent.id, bid_id = %bid_id, "Bid submission timed out");
                self.callbacks.bid_failed(&intent.id, &bid_id, &reason);
                BidOutcome::Failed { bid_id, reason }
            }
        }
    }

    /// Submit several priced bids in one matcher call.
    ///
    /// Every bid counts as one attempt; acceptance is taken from the
    /// matcher's per-bid answers.
    pub async fn submit_batch(&self, bids: &[(String, Bid)]) -> AgentResult<BidBatchAck> {
        if bids.is_empty() {
            return Err(AgentError::Invalid("no bids to submit".to_string()));
        }
        if let Some((intent_id, _)) = bids.iter().find(|(intent_id, _)| intent_id.trim().is_empty()) {
            return Err(AgentError::Invalid(format!("intent_id is required: {intent_id:?}")));
        }

        let submissions: Vec<BidSubmission> = bids
            .iter()
            .map(|(intent_id, bid)| build_submission(&self.identity, intent_id.trim(), bid))
            .collect();

        let ack = match tokio::time::timeout(self.timeout, self.matcher.submit_bid_batch(&submissions)).await {
            Ok(Ok(ack)) => ack,
            Ok(Err(e)) => {
                for _ in &submissions {
                    self.metrics.record_bid(false);
                }
                return Err(e.into());
            }
            Err(_) => {
                for _ in &submissions {
                    self.metrics.record_bid(false);
                }
                return Err(AgentError::Timeout {
                    operation: "bid batch",
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }
        };

        for submission in &submissions {
            let accepted = ack
                .acks
                .iter()
                .any(|a| a.bid_id == submission.bid_id && a.accepted);
            self.metrics.record_bid(accepted);
        }
        info!(
            bids = submissions.len(),
            accepted = ack.accepted,
            rejected = ack.rejected,
            "Bid batch submitted"
        );
        Ok(ack)
    }
}
