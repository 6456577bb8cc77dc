//! Integration tests for the agent lifecycle with a mock matcher.

mod common;

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{bounded, config, intent, task, wait_until, EventLog, MockMatcher, ADDRESS};
use subnet_agent::{
    handler_fn, Agent, AgentError, Bid, FixedPriceStrategy, StreamState, Task, TaskResult,
    CHAIN_ADDRESS_METADATA_KEY,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn echo_handler() -> Arc<dyn subnet_agent::TaskHandler> {
    Arc::new(handler_fn(|task: Task, _cancel| async move {
        Ok(TaskResult::success(task.payload))
    }))
}

async fn agent_with(config: subnet_agent::AgentConfig, matcher: Arc<MockMatcher>) -> (Agent, Arc<EventLog>) {
    let agent = Agent::new(config).unwrap();
    let events = Arc::new(EventLog::default());
    agent.register_handler(echo_handler()).await;
    agent.register_callbacks(events.clone()).await;
    agent.set_matcher_transport(matcher).await;
    (agent, events)
}

#[tokio::test]
async fn test_start_stop() {
    let matcher = Arc::new(MockMatcher::default());
    let (agent, events) = agent_with(config(), matcher.clone()).await;

    agent.start().await.unwrap();
    assert!(agent.is_running().await);
    assert!(matches!(agent.start().await, Err(AgentError::AlreadyRunning)));

    let mut tasks = agent.task_stream_state();
    bounded(tasks.wait_for(|s| *s == StreamState::Streaming)).await.unwrap();

    bounded(agent.stop()).await.unwrap();
    assert!(!agent.is_running().await);
    assert_eq!(*agent.task_stream_state().borrow(), StreamState::Cancelled);
    // No strategy registered, so the intent stream never ran.
    assert_eq!(*agent.intent_stream_state().borrow(), StreamState::Idle);
    assert_eq!(matcher.intent_opens.load(Ordering::SeqCst), 0);
    assert_eq!(events.events().first().map(String::as_str), Some("start"));
    assert_eq!(events.events().last().map(String::as_str), Some("stop"));
}

#[tokio::test]
async fn test_streamed_task_is_executed_and_reported() {
    let validator = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/execution-report"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "report_id": "ignored",
            "intent_id": "intent-t1",
            "validator_id": "v1",
            "status": "accepted",
            "received_ts": 1700000000
        })))
        .expect(1)
        .mount(&validator)
        .await;

    let matcher = Arc::new(MockMatcher::with_tasks(VecDeque::from([Some(vec![task("t1")])])));
    let (agent, events) = agent_with(config().with_validator_addr(validator.uri()), matcher).await;

    agent.start().await.unwrap();
    assert!(wait_until(Duration::from_secs(3), || events.count("report_submitted:") == 1).await);
    agent.stop().await.unwrap();

    let completed = events.completed.lock().unwrap().clone();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].1.data, b"t1");
    assert!(events.count("task_accepted:t1") == 1);

    let receipts = events.receipts.lock().unwrap().clone();
    assert_eq!(receipts[0].validator_id, "v1");

    let requests = validator.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["assignment_id"], "t1");
    assert_eq!(body["agent_id"], "a1");
    assert_eq!(body["status"], "success");
    assert_eq!(body["metadata"]["bid_id"], "0xbid-t1");
    assert_eq!(body["metadata"]["chain_address"], ADDRESS);

    let metrics = agent.metrics();
    assert_eq!(metrics.tasks_completed, 1);
    assert_eq!(metrics.reports_submitted, 1);
}

#[tokio::test]
async fn test_task_stream_reconnects_after_error() {
    let matcher = Arc::new(MockMatcher::with_tasks(VecDeque::from([
        None,
        Some(vec![task("t1")]),
    ])));
    let (agent, events) = agent_with(config(), matcher.clone()).await;

    agent.start().await.unwrap();
    assert!(wait_until(Duration::from_secs(3), || events.count("task_completed:t1") == 1).await);
    agent.stop().await.unwrap();

    assert_eq!(matcher.task_opens.load(Ordering::SeqCst), 2);
    assert!(events
        .events()
        .iter()
        .any(|e| e.starts_with("error:") && e.contains("matcher unavailable")));
}

#[tokio::test]
async fn test_intents_are_bid_on_when_strategy_matches() {
    let matcher = Arc::new(MockMatcher::default());
    matcher.intent_script.lock().unwrap().push_back(Some(vec![
        intent("i1", "compute"),
        intent("i2", "storage"),
        intent("i3", "compute"),
    ]));
    let (agent, events) = agent_with(config(), matcher.clone()).await;
    agent
        .register_bidding_strategy(Arc::new(FixedPriceStrategy::new(
            250,
            "PIN",
            vec!["compute".into()],
        )))
        .await;

    agent.start().await.unwrap();
    assert!(wait_until(Duration::from_secs(3), || events.count("bid_submitted:") == 2).await);
    agent.stop().await.unwrap();

    // "storage" was skipped by the strategy and never reached the matcher.
    assert_eq!(matcher.bid_count(), 2);
    let bids = matcher.bids.lock().unwrap().clone();
    assert!(bids.iter().all(|b| b.price == 250 && b.intent_id != "i2"));
    assert!(bids
        .iter()
        .all(|b| b.metadata.get(CHAIN_ADDRESS_METADATA_KEY).map(String::as_str) == Some(ADDRESS)));

    let metrics = agent.metrics();
    assert_eq!(metrics.total_bids, 2);
    assert_eq!(metrics.successful_bids, 2);
}

#[tokio::test]
async fn test_rejected_handshake_skips_handler() {
    let matcher = Arc::new(MockMatcher {
        reject_task_responses: true,
        ..MockMatcher::with_tasks(VecDeque::from([Some(vec![task("t1")])]))
    });
    let (agent, events) = agent_with(config().with_task_ack(true), matcher.clone()).await;

    agent.start().await.unwrap();
    assert!(wait_until(Duration::from_secs(3), || events.count("task_rejected:t1") == 1).await);
    agent.stop().await.unwrap();

    assert_eq!(events.count("task_accepted:"), 0);
    assert_eq!(events.count("task_completed:"), 0);
    assert_eq!(matcher.responses.lock().unwrap()[0].task_id, "t1");
    assert_eq!(agent.metrics().tasks_completed, 0);
}

#[tokio::test]
async fn test_handler_timeout_reported_to_callbacks() {
    let matcher = Arc::new(MockMatcher::default());
    let (agent, events) = agent_with(
        config().with_task_timeout(Duration::from_millis(50)),
        matcher,
    )
    .await;
    agent
        .register_handler(Arc::new(handler_fn(|_task: Task, _cancel| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(TaskResult::success(Vec::new()))
        })))
        .await;

    let outcome = bounded(agent.execute_task(task("slow"))).await.unwrap();
    assert!(!outcome.result.success);
    assert!(outcome.result.error.contains("timed out"));

    let completed = events.completed.lock().unwrap().clone();
    assert_eq!(completed.len(), 1);
    assert!(!completed[0].1.success);
    assert_eq!(completed[0].2.as_deref(), Some("task timed out after 50ms"));
    assert_eq!(agent.metrics().tasks_failed, 1);
}

#[tokio::test]
async fn test_submit_bids_batch() {
    let matcher = Arc::new(MockMatcher::default());
    let (agent, _) = agent_with(config(), matcher.clone()).await;

    let ack = agent
        .submit_bids(&[
            ("i1".to_string(), Bid::new(100, "PIN")),
            ("i2".to_string(), Bid::new(120, "PIN")),
        ])
        .await
        .unwrap();
    assert_eq!(ack.accepted, 2);
    assert_eq!(matcher.bid_count(), 2);
    assert_eq!(agent.metrics().total_bids, 2);
}

#[tokio::test]
async fn test_registry_registration_lifecycle() {
    let registry = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/agents"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&registry)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/agents/a1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&registry)
        .await;

    let matcher = Arc::new(MockMatcher::default());
    let (agent, _) = agent_with(
        config().with_registry(registry.uri(), "http://agent-a1:7000"),
        matcher,
    )
    .await;

    agent.start().await.unwrap();
    agent.stop().await.unwrap();

    let requests = registry.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["id"], "a1");
    assert_eq!(body["capabilities"][0], "compute");
    assert_eq!(body["endpoint"], "http://agent-a1:7000");
}

#[tokio::test]
async fn test_failed_registration_is_reported_not_fatal() {
    let registry = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/agents"))
        .respond_with(ResponseTemplate::new(500).set_body_string("db down"))
        .mount(&registry)
        .await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&registry)
        .await;

    let (agent, events) = agent_with(
        config().with_registry(registry.uri(), "http://agent-a1:7000"),
        Arc::new(MockMatcher::default()),
    )
    .await;

    agent.start().await.unwrap();
    assert!(agent.is_running().await);
    assert!(events
        .events()
        .contains(&"error:registry error: registry returned 500: db down".to_string()));
    agent.stop().await.unwrap();
}

#[tokio::test]
async fn test_slow_registration_does_not_block_state_reads() {
    let registry = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/agents"))
        .respond_with(ResponseTemplate::new(201).set_delay(Duration::from_secs(1)))
        .mount(&registry)
        .await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&registry)
        .await;

    let (agent, _) = agent_with(
        config().with_registry(registry.uri(), "http://agent-a1:7000"),
        Arc::new(MockMatcher::default()),
    )
    .await;

    let observe = async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        tokio::time::timeout(Duration::from_millis(100), agent.is_running()).await
    };
    let (started, observed) = tokio::join!(agent.start(), observe);
    started.unwrap();

    // Mid-registration the agent is readable and not yet running.
    assert_eq!(observed.ok(), Some(false));
    assert!(agent.is_running().await);
    agent.stop().await.unwrap();
}
