//! Pluggable task handler and bidding strategy.

use std::future::Future;

use async_trait::async_trait;
use subnet_types::{Bid, Intent, Task, TaskResult};
use tokio_util::sync::CancellationToken;

use crate::config::BiddingConfig;

/// Executes assigned tasks.
///
/// `cancel` fires when the task timeout expires or the agent stops; a
/// handler that ignores it is abandoned at that point.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Run one task.
    async fn execute(&self, task: &Task, cancel: CancellationToken) -> anyhow::Result<TaskResult>;
}

/// [`TaskHandler`] backed by an async closure.
pub struct FnTaskHandler<F>(F);

/// Wrap an async closure as a [`TaskHandler`].
pub fn handler_fn<F, Fut>(f: F) -> FnTaskHandler<F>
where
    F: Fn(Task, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<TaskResult>> + Send + 'static,
{
    FnTaskHandler(f)
}

#[async_trait]
impl<F, Fut> TaskHandler for FnTaskHandler<F>
where
    F: Fn(Task, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<TaskResult>> + Send + 'static,
{
    async fn execute(&self, task: &Task, cancel: CancellationToken) -> anyhow::Result<TaskResult> {
        (self.0)(task.clone(), cancel).await
    }
}

/// Decides whether and how to bid on intents.
pub trait BiddingStrategy: Send + Sync {
    /// Cheap pre-filter.
    fn should_bid(&self, intent: &Intent) -> bool;

    /// Price the bid; `None` drops the intent silently.
    fn calculate_bid(&self, intent: &Intent) -> Option<Bid>;
}

/// Bids a fixed price on intents matching the agent's capabilities.
///
/// A `*` capability matches every intent type.
#[derive(Debug, Clone)]
pub struct FixedPriceStrategy {
    price: u64,
    currency: String,
    capabilities: Vec<String>,
}

impl FixedPriceStrategy {
    pub fn new(price: u64, currency: impl Into<String>, capabilities: Vec<String>) -> Self {
        Self {
            price,
            currency: currency.into(),
            capabilities,
        }
    }

    /// Strategy bidding `min_bid_price` from the bidding config.
    pub fn from_config(bidding: &BiddingConfig, capabilities: &[String]) -> Self {
        Self::new(bidding.min_bid_price, bidding.currency.clone(), capabilities.to_vec())
    }
}

impl BiddingStrategy for FixedPriceStrategy {
    fn should_bid(&self, intent: &Intent) -> bool {
        self.capabilities
            .iter()
            .any(|c| c == "*" || c.eq_ignore_ascii_case(&intent.intent_type))
    }

    fn calculate_bid(&self, _intent: &Intent) -> Option<Bid> {
        Some(Bid::new(self.price, self.currency.clone()))
    }
}
