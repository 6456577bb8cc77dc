//! Report fan-out through the public agent API.

mod common;

use std::time::Duration;

use common::{config, ADDRESS};
use subnet_agent::{
    execution_report_url, Agent, AgentError, ExecutionReport, ExecutionReportStatus, Metadata,
    ReportError,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn report(id: &str) -> ExecutionReport {
    ExecutionReport {
        report_id: id.into(),
        assignment_id: "task-1".into(),
        intent_id: "intent-1".into(),
        agent_id: String::new(),
        status: ExecutionReportStatus::Success,
        result_data: b"result".to_vec(),
        timestamp: None,
        metadata: Metadata::new(),
    }
}

async fn validator(id: &str, delay: Duration) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/execution-report"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({
                    "report_id": "r1",
                    "intent_id": "intent-1",
                    "validator_id": id,
                    "status": "accepted",
                    "received_ts": 1700000000,
                    "message": "ok"
                }))
                .set_delay(delay),
        )
        .mount(&server)
        .await;
    server
}

async fn registry(validators: &[(&str, String)]) -> MockServer {
    let server = MockServer::start().await;
    let list: Vec<_> = validators
        .iter()
        .map(|(id, endpoint)| serde_json::json!({"id": id, "endpoint": endpoint, "status": "active"}))
        .collect();
    Mock::given(method("GET"))
        .and(path("/validators"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "validators": list })))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_one_validator_times_out() {
    let v1 = validator("v1", Duration::ZERO).await;
    let v2 = validator("v2", Duration::from_secs(10)).await;
    let registry = registry(&[("v1", v1.uri()), ("v2", v2.uri())]).await;

    let agent = Agent::new(config().with_registry(registry.uri(), "http://a1:7000")).unwrap();
    let submission = agent
        .submit_execution_report(&report("r1"), Some(Duration::from_secs(2)))
        .await
        .unwrap();

    assert_eq!(submission.receipts.len(), 1);
    assert_eq!(submission.receipts[0].validator_id, "v1");
    assert_eq!(submission.receipts[0].message, "ok");
    let error = submission.error.expect("v2 failure reported");
    assert_eq!(error.len(), 1);
    assert!(error.failures[0].endpoint.starts_with(&v2.uri()));

    let metrics = agent.metrics();
    assert_eq!(metrics.reports_submitted, 1);
    assert_eq!(metrics.reports_failed, 1);

    let requests = v1.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["agent_id"], "a1");
    assert_eq!(body["result_data"], "cmVzdWx0");
    assert_eq!(body["metadata"]["chain_address"], ADDRESS);
}

#[tokio::test]
async fn test_all_validators_fail() {
    let v1 = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&v1)
        .await;
    let v2 = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad report"))
        .mount(&v2)
        .await;
    let registry = registry(&[("v1", v1.uri()), ("v2", v2.uri())]).await;

    let agent = Agent::new(config().with_registry(registry.uri(), "http://a1:7000")).unwrap();
    let err = agent
        .submit_execution_report(&report("r1"), None)
        .await
        .unwrap_err();

    match err {
        AgentError::Report(ReportError::AllFailed(fanout)) => {
            assert_eq!(fanout.len(), 2);
            assert!(fanout.to_string().contains("bad report"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(agent.metrics().reports_failed, 2);
}

#[tokio::test]
async fn test_no_endpoints_configured() {
    let agent = Agent::new(config()).unwrap();
    let err = agent
        .submit_execution_report(&report("r1"), None)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "report error: no validator endpoints available"
    );
    assert_eq!(agent.metrics().reports_failed, 0);
}

#[tokio::test]
async fn test_invalid_report_fails_before_network() {
    let v1 = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&v1)
        .await;

    let agent = Agent::new(config().with_validator_addr(v1.uri())).unwrap();
    let mut bad = report("r1");
    bad.intent_id.clear();
    let err = agent.submit_execution_report(&bad, None).await.unwrap_err();
    assert!(matches!(err, AgentError::Report(ReportError::Validation(_))));
}

#[tokio::test]
async fn test_unspecified_status_is_delivered() {
    let v1 = validator("v1", Duration::ZERO).await;
    let agent = Agent::new(config().with_validator_addr(v1.uri())).unwrap();

    let mut unspecified = report("r1");
    unspecified.status = ExecutionReportStatus::Unspecified;
    let submission = agent
        .submit_execution_report(&unspecified, None)
        .await
        .unwrap();
    assert_eq!(submission.receipts.len(), 1);

    let requests = v1.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["status"], "status_unspecified");
}

#[test]
fn test_report_url_is_idempotent() {
    for raw in ["v1:9200", "http://v1:9200/", "https://v1/api/v1/execution-report?x=1"] {
        let once = execution_report_url(raw).unwrap().unwrap();
        let twice = execution_report_url(&once).unwrap().unwrap();
        assert_eq!(once, twice);
        assert!(once.ends_with("/api/v1/execution-report"));
    }
}
