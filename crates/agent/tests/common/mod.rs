//! Shared mocks for agent integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use subnet_agent::{
    AgentCallbacks, AgentConfig, AgentError, Bid, BidAck, BidBatchAck, BidSubmission,
    ExecutionReceipt, HandlerError, Intent, Metadata, MatcherTransport, Task, TaskResponse,
    TaskResult,
};
use subnet_transport::{Subscription, TransportError, TransportResult};
use tokio_util::sync::CancellationToken;

pub const KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub const ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

/// Config for subnet `s1`, agent `a1`, with fast timeouts.
pub fn config() -> AgentConfig {
    AgentConfig::new("s1", "a1", "127.0.0.1:1")
        .with_capability("compute")
        .with_private_key(KEY)
        .with_reconnect_interval(Duration::from_millis(50))
        .with_report_timeout(Duration::from_millis(500))
}

pub fn task(id: &str) -> Task {
    let mut metadata = Metadata::new();
    metadata.insert("bid_id".into(), format!("0xbid-{id}"));
    Task {
        id: id.into(),
        intent_id: format!("intent-{id}"),
        task_type: "compute".into(),
        payload: id.as_bytes().to_vec(),
        metadata,
        deadline: Utc::now(),
        created_at: Utc::now(),
    }
}

pub fn intent(id: &str, kind: &str) -> Intent {
    Intent {
        id: id.into(),
        intent_type: kind.into(),
        description: String::new(),
        created_at: Utc::now(),
    }
}

/// One scripted stream connection: `None` fails immediately.
pub type Script<T> = VecDeque<Option<Vec<T>>>;

/// Matcher that replays scripted stream connections and records calls.
///
/// Once a script is exhausted, further connections stay open and idle
/// until cancelled.
#[derive(Default)]
pub struct MockMatcher {
    pub task_script: Mutex<Script<Task>>,
    pub intent_script: Mutex<Script<Intent>>,
    pub task_opens: AtomicUsize,
    pub intent_opens: AtomicUsize,
    pub bids: Mutex<Vec<BidSubmission>>,
    pub responses: Mutex<Vec<TaskResponse>>,
    pub reject_task_responses: bool,
}

impl MockMatcher {
    pub fn with_tasks(script: Script<Task>) -> Self {
        Self {
            task_script: Mutex::new(script),
            ..Self::default()
        }
    }

    pub fn bid_count(&self) -> usize {
        self.bids.lock().unwrap().len()
    }
}

fn replay<T: Send + 'static>(script: &Mutex<Script<T>>, cancel: CancellationToken) -> Subscription<T> {
    let next = script.lock().unwrap().pop_front();
    if let Some(None) = next {
        return Subscription::failed(TransportError::Stream("matcher unavailable".into()));
    }
    let items = next.flatten().unwrap_or_default();

    let (mut tx, subscription) = Subscription::channel(16);
    tokio::spawn(async move {
        tx.opened();
        for item in items {
            if !tx.send(item).await {
                return;
            }
        }
        cancel.cancelled().await;
    });
    subscription
}

#[async_trait]
impl MatcherTransport for MockMatcher {
    async fn submit_bid(&self, bid: &BidSubmission) -> TransportResult<BidAck> {
        self.bids.lock().unwrap().push(bid.clone());
        Ok(BidAck {
            bid_id: bid.bid_id.clone(),
            accepted: true,
            message: "accepted".into(),
        })
    }

    async fn submit_bid_batch(&self, bids: &[BidSubmission]) -> TransportResult<BidBatchAck> {
        self.bids.lock().unwrap().extend_from_slice(bids);
        Ok(BidBatchAck {
            acks: bids
                .iter()
                .map(|b| BidAck {
                    bid_id: b.bid_id.clone(),
                    accepted: true,
                    message: String::new(),
                })
                .collect(),
            accepted: bids.len() as u32,
            rejected: 0,
        })
    }

    fn stream_intents(&self, _subnet_id: &str, cancel: CancellationToken) -> Subscription<Intent> {
        self.intent_opens.fetch_add(1, Ordering::SeqCst);
        replay(&self.intent_script, cancel)
    }

    fn stream_tasks(&self, _agent_id: &str, cancel: CancellationToken) -> Subscription<Task> {
        self.task_opens.fetch_add(1, Ordering::SeqCst);
        replay(&self.task_script, cancel)
    }

    async fn respond_to_task(&self, response: &TaskResponse) -> TransportResult<()> {
        self.responses.lock().unwrap().push(response.clone());
        if self.reject_task_responses {
            return Err(TransportError::Rejected("task already assigned".into()));
        }
        Ok(())
    }
}

/// Callbacks that record every event as a short string.
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<String>>,
    pub completed: Mutex<Vec<(String, TaskResult, Option<String>)>>,
    pub receipts: Mutex<Vec<ExecutionReceipt>>,
    pub submitted_bids: Mutex<Vec<Bid>>,
}

impl EventLog {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events().iter().filter(|e| e.starts_with(prefix)).count()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl AgentCallbacks for EventLog {
    fn on_start(&self) -> anyhow::Result<()> {
        self.push("start".into());
        Ok(())
    }

    fn on_stop(&self) -> anyhow::Result<()> {
        self.push("stop".into());
        Ok(())
    }

    fn on_task_accepted(&self, task: &Task) {
        self.push(format!("task_accepted:{}", task.id));
    }

    fn on_task_rejected(&self, task: &Task, reason: &str) {
        self.push(format!("task_rejected:{}:{reason}", task.id));
    }

    fn on_task_completed(&self, task: &Task, result: &TaskResult, error: Option<&HandlerError>) {
        self.push(format!("task_completed:{}", task.id));
        self.completed.lock().unwrap().push((
            task.id.clone(),
            result.clone(),
            error.map(|e| e.to_string()),
        ));
    }

    fn on_bid_submitted(&self, intent: &Intent, bid: &Bid) {
        self.push(format!("bid_submitted:{}", intent.id));
        self.submitted_bids.lock().unwrap().push(bid.clone());
    }

    fn on_bid_failed(&self, intent_id: &str, _bid_id: &str, reason: &str) {
        self.push(format!("bid_failed:{intent_id}:{reason}"));
    }

    fn on_report_submitted(&self, report_id: &str, receipts: &[ExecutionReceipt]) {
        self.push(format!("report_submitted:{report_id}"));
        self.receipts.lock().unwrap().extend_from_slice(receipts);
    }

    fn on_report_failed(&self, report_id: &str, reason: &str) {
        self.push(format!("report_failed:{report_id}:{reason}"));
    }

    fn on_error(&self, error: &AgentError) {
        self.push(format!("error:{error}"));
    }
}

/// Poll `condition` every 10ms until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Run `f` with a 5s ceiling.
pub async fn bounded<F: Future>(f: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), f)
        .await
        .expect("operation timed out")
}
