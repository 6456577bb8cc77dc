//! Task executor.
//!
//! Runs assigned tasks through the registered [`TaskHandler`] under a
//! timeout and a concurrency bound, then reports the outcome:
//!
//! 1. Waits for a concurrency permit
//! 2. Optionally accepts the task with the matcher
//! 3. Runs the handler, cancelling it at the timeout boundary
//! 4. Records metrics and fires `on_task_completed`
//! 5. Hands an execution report to the dispatcher, if one is configured

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use subnet_transport::MatcherTransport;
use subnet_types::{
    ExecutionReport, ExecutionReportStatus, Task, TaskResponse, TaskResult, BID_ID_METADATA_KEY,
    ERROR_METADATA_KEY,
};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::callbacks::CallbackBus;
use crate::dispatcher::{ReportDispatcher, ReportSubmission};
use crate::error::{AgentError, HandlerError, ReportError};
use crate::handler::TaskHandler;
use crate::metrics::AgentMetrics;

/// Executor settings.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Handler timeout.
    pub task_timeout: Duration,
    /// Maximum concurrently running handlers.
    pub max_concurrent: usize,
    /// Accept each task with the matcher before running it.
    pub require_ack: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            task_timeout: Duration::from_secs(30),
            max_concurrent: 5,
            require_ack: false,
        }
    }
}

/// Result of running one task.
#[derive(Debug)]
pub struct TaskOutcome {
    /// Task that ran.
    pub task_id: String,
    /// Handler result; a synthesized failure when the handler errored.
    pub result: TaskResult,
    /// Handler error, timeout, or cancellation.
    pub error: Option<HandlerError>,
    /// Report delivery outcome; `None` when no dispatcher is configured.
    pub report: Option<Result<ReportSubmission, ReportError>>,
}

impl TaskOutcome {
    /// True when the handler returned a successful result in time.
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.result.success
    }
}

/// Fresh report identifier: `report-` followed by 16 random bytes in hex.
pub fn generate_report_id() -> String {
    format!("report-{}", hex::encode(rand::random::<[u8; 16]>()))
}

/// Build the execution report for a finished task.
///
/// The result metadata is carried over, `bid_id` is added from the task when
/// the result does not set it, and failed results carry their error message.
pub fn build_report(task: &Task, result: &TaskResult, agent_id: &str) -> ExecutionReport {
    let mut metadata = result.metadata.clone();
    if let Some(bid_id) = task.bid_id() {
        metadata
            .entry(BID_ID_METADATA_KEY.to_string())
            .or_insert_with(|| bid_id.to_string());
    }

    let status = if result.success {
        ExecutionReportStatus::Success
    } else {
        if !result.error.is_empty() {
            metadata.insert(ERROR_METADATA_KEY.to_string(), result.error.clone());
        }
        ExecutionReportStatus::Failed
    };

    ExecutionReport {
        report_id: generate_report_id(),
        assignment_id: task.id.clone(),
        intent_id: task.intent_id.clone(),
        agent_id: agent_id.to_string(),
        status,
        result_data: result.data.clone(),
        timestamp: Some(Utc::now()),
        metadata,
    }
}

/// Runs tasks and reports their outcome.
pub struct TaskExecutor {
    config: ExecutorConfig,
    agent_id: String,
    handler: Arc<dyn TaskHandler>,
    metrics: AgentMetrics,
    callbacks: CallbackBus,
    matcher: Option<Arc<dyn MatcherTransport>>,
    dispatcher: Option<Arc<ReportDispatcher>>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl TaskExecutor {
    pub fn new(
        config: ExecutorConfig,
        agent_id: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
        metrics: AgentMetrics,
        cancel: CancellationToken,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            config,
            agent_id: agent_id.into(),
            handler,
            metrics,
            callbacks: CallbackBus::default(),
            matcher: None,
            dispatcher: None,
            permits,
            cancel,
        }
    }

    /// Fire lifecycle events on `callbacks`.
    pub fn with_callbacks(mut self, callbacks: CallbackBus) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Matcher used for the accept handshake.
    pub fn with_matcher(mut self, matcher: Arc<dyn MatcherTransport>) -> Self {
        self.matcher = Some(matcher);
        self
    }

    /// Deliver an execution report after every task.
    pub fn with_dispatcher(mut self, dispatcher: Arc<ReportDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Handle a task received from the matcher.
    ///
    /// Returns `None` when the task was not run: the executor was stopped
    /// while waiting for a permit, or the accept handshake failed.
    pub async fn process(&self, task: Task) -> Option<TaskOutcome> {
        let _permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                debug!(task_id = %task.id, "Executor stopped before task started");
                return None;
            }
            permit = self.permits.clone().acquire_owned() => permit.ok()?,
        };

        if self.config.require_ack {
            if let Err(reason) = self.accept(&task).await {
                warn!(task_id = %task.id, reason = %reason, "Task handshake failed");
                self.callbacks.task_rejected(&task, &reason);
                return None;
            }
        }

        Some(self.execute(task).await)
    }

    async fn accept(&self, task: &Task) -> Result<(), String> {
        let matcher = self
            .matcher
            .as_ref()
            .ok_or_else(|| AgentError::NoMatcher.to_string())?;
        let response = TaskResponse {
            task_id: task.id.clone(),
            agent_id: self.agent_id.clone(),
            accepted: true,
            reason: String::new(),
            timestamp: Utc::now(),
        };
        matcher.respond_to_task(&response).await.map_err(|e| {
            let reason = e.to_string();
            if !e.is_rejection() {
                self.callbacks.error(&AgentError::Transport(e));
            }
            reason
        })
    }

    /// Run `task` through the handler and report the outcome.
    pub async fn execute(&self, task: Task) -> TaskOutcome {
        self.callbacks.task_accepted(&task);
        info!(task_id = %task.id, task_type = %task.task_type, "Executing task");

        let (result, error) = self.run_handler(&task).await;
        let success = error.is_none() && result.success;

        match &error {
            None if success => info!(task_id = %task.id, "Task completed"),
            None => warn!(task_id = %task.id, error = %result.error, "Task returned failure"),
            Some(e) => error!(task_id = %task.id, error = %e, "Task failed"),
        }
        self.callbacks.task_completed(&task, &result, error.as_ref());

        let report = match &self.dispatcher {
            Some(dispatcher) => Some(self.report(dispatcher, &task, &result).await),
            None => None,
        };

        TaskOutcome {
            task_id: task.id,
            result,
            error,
            report,
        }
    }

    async fn run_handler(&self, task: &Task) -> (TaskResult, Option<HandlerError>) {
        let handler_cancel = self.cancel.child_token();
        let started = Instant::now();
        self.metrics.tasks_in_flight.inc();

        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(HandlerError::Cancelled),
            run = tokio::time::timeout(
                self.config.task_timeout,
                self.handler.execute(task, handler_cancel.clone()),
            ) => match run {
                Ok(Ok(result)) => Ok(result),
                Ok(Err(e)) => Err(HandlerError::Failed(e)),
                Err(_) => Err(HandlerError::Timeout {
                    timeout_ms: self.config.task_timeout.as_millis() as u64,
                }),
            },
        };
        handler_cancel.cancel();

        self.metrics.tasks_in_flight.dec();
        let success = matches!(&outcome, Ok(result) if result.success);
        self.metrics
            .record_task(success, started.elapsed().as_secs_f64());

        match outcome {
            Ok(result) => (result, None),
            Err(e) => (TaskResult::failure(e.to_string()), Some(e)),
        }
    }

    async fn report(
        &self,
        dispatcher: &ReportDispatcher,
        task: &Task,
        result: &TaskResult,
    ) -> Result<ReportSubmission, ReportError> {
        let report = build_report(task, result, &self.agent_id);
        let outcome = dispatcher.submit(&report, None).await;

        match &outcome {
            Ok(submission) => {
                if let Some(partial) = &submission.error {
                    warn!(report_id = %report.report_id, error = %partial, "Report partially delivered");
                }
                self.callbacks
                    .report_submitted(&report.report_id, &submission.receipts);
            }
            Err(e) => {
                warn!(report_id = %report.report_id, task_id = %task.id, error = %e, "Report submission failed");
                self.callbacks.report_failed(&report.report_id, &e.to_string());
                self.callbacks.error(&AgentError::Report(e.clone()));
            }
        }
        outcome
    }
}

impl std::fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("config", &self.config)
            .field("agent_id", &self.agent_id)
            .field("available_permits", &self.permits.available_permits())
            .field("reports", &self.dispatcher.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::AgentCallbacks;
    use crate::handler::handler_fn;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use subnet_types::Metadata;

    fn task(id: &str) -> Task {
        let mut metadata = Metadata::new();
        metadata.insert(BID_ID_METADATA_KEY.into(), "0xbid".into());
        Task {
            id: id.into(),
            intent_id: "intent-1".into(),
            task_type: "compute".into(),
            payload: b"input".to_vec(),
            metadata,
            deadline: Utc::now(),
            created_at: Utc::now(),
        }
    }

    #[derive(Default)]
    struct Recorder {
        accepted: AtomicUsize,
        completed: Mutex<Vec<(String, bool, Option<String>)>>,
    }

    impl AgentCallbacks for Recorder {
        fn on_task_accepted(&self, _task: &Task) {
            self.accepted.fetch_add(1, Ordering::SeqCst);
        }

        fn on_task_completed(&self, task: &Task, result: &TaskResult, error: Option<&HandlerError>) {
            self.completed.lock().unwrap().push((
                task.id.clone(),
                result.success,
                error.map(|e| e.to_string()),
            ));
        }
    }

    fn executor(handler: Arc<dyn TaskHandler>, timeout: Duration) -> (TaskExecutor, AgentMetrics, Arc<Recorder>) {
        let metrics = AgentMetrics::new().unwrap();
        let recorder = Arc::new(Recorder::default());
        let config = ExecutorConfig {
            task_timeout: timeout,
            ..ExecutorConfig::default()
        };
        let executor = TaskExecutor::new(config, "a1", handler, metrics.clone(), CancellationToken::new())
            .with_callbacks(CallbackBus::new(recorder.clone()));
        (executor, metrics, recorder)
    }

    #[test]
    fn test_build_report_success() {
        let result = TaskResult::success(b"out".to_vec()).with_metadata("model", "m1");
        let report = build_report(&task("t1"), &result, "a1");
        assert!(report.report_id.starts_with("report-"));
        assert_eq!(report.report_id.len(), "report-".len() + 32);
        assert_eq!(report.assignment_id, "t1");
        assert_eq!(report.status, ExecutionReportStatus::Success);
        assert_eq!(report.metadata.get(BID_ID_METADATA_KEY).unwrap(), "0xbid");
        assert_eq!(report.metadata.get("model").unwrap(), "m1");
        assert!(!report.metadata.contains_key(ERROR_METADATA_KEY));
    }

    #[test]
    fn test_build_report_failure_carries_error() {
        let report = build_report(&task("t1"), &TaskResult::failure("out of memory"), "a1");
        assert_eq!(report.status, ExecutionReportStatus::Failed);
        assert_eq!(report.metadata.get(ERROR_METADATA_KEY).unwrap(), "out of memory");
    }

    #[tokio::test]
    async fn test_execute_success() {
        let handler = Arc::new(handler_fn(|task: Task, _cancel| async move {
            Ok(TaskResult::success(task.payload))
        }));
        let (executor, metrics, recorder) = executor(handler, Duration::from_secs(1));

        let outcome = executor.execute(task("t1")).await;
        assert!(outcome.succeeded());
        assert_eq!(outcome.result.data, b"input");
        assert!(outcome.report.is_none());

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.tasks_completed, 1);
        assert_eq!(snapshot.tasks_in_flight, 0);
        assert_eq!(recorder.accepted.load(Ordering::SeqCst), 1);
        assert_eq!(
            recorder.completed.lock().unwrap()[0],
            ("t1".to_string(), true, None)
        );
    }

    #[tokio::test]
    async fn test_handler_error_becomes_failed_result() {
        let handler = Arc::new(handler_fn(|_task: Task, _cancel| async move {
            Err(anyhow::anyhow!("model not found"))
        }));
        let (executor, metrics, _) = executor(handler, Duration::from_secs(1));

        let outcome = executor.execute(task("t1")).await;
        assert!(!outcome.succeeded());
        assert_eq!(outcome.result.error, "model not found");
        assert_eq!(metrics.snapshot().tasks_failed, 1);
    }

    #[tokio::test]
    async fn test_unsuccessful_result_counts_as_failure() {
        let handler = Arc::new(handler_fn(|_task: Task, _cancel| async move {
            Ok(TaskResult::failure("bad input"))
        }));
        let (executor, metrics, _) = executor(handler, Duration::from_secs(1));

        let outcome = executor.execute(task("t1")).await;
        assert!(outcome.error.is_none());
        assert!(!outcome.succeeded());
        assert_eq!(metrics.snapshot().tasks_failed, 1);
    }

    #[tokio::test]
    async fn test_timeout_cancels_handler() {
        let observed_cancel = Arc::new(AtomicUsize::new(0));
        let observed = observed_cancel.clone();
        let handler = Arc::new(handler_fn(move |_task: Task, cancel: CancellationToken| {
            let observed = observed.clone();
            async move {
                let watcher = cancel.clone();
                tokio::spawn(async move {
                    watcher.cancelled().await;
                    observed.fetch_add(1, Ordering::SeqCst);
                });
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(TaskResult::success(Vec::new()))
            }
        }));
        let (executor, metrics, recorder) = executor(handler, Duration::from_millis(50));

        let outcome = executor.execute(task("t1")).await;
        assert!(matches!(outcome.error, Some(HandlerError::Timeout { timeout_ms: 50 })));
        assert!(!outcome.result.success);
        assert_eq!(outcome.result.error, "task timed out after 50ms");

        let completed = recorder.completed.lock().unwrap().clone();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].2.as_deref(), Some("task timed out after 50ms"));
        assert_eq!(metrics.snapshot().tasks_failed, 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(observed_cancel.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (r, p) = (running.clone(), peak.clone());
        let handler = Arc::new(handler_fn(move |_task: Task, _cancel| {
            let (running, peak) = (r.clone(), p.clone());
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(TaskResult::success(Vec::new()))
            }
        }));
        let config = ExecutorConfig {
            max_concurrent: 2,
            ..ExecutorConfig::default()
        };
        let executor = Arc::new(TaskExecutor::new(
            config,
            "a1",
            handler,
            AgentMetrics::new().unwrap(),
            CancellationToken::new(),
        ));

        let handles: Vec<_> = (0..6)
            .map(|i| {
                let executor = executor.clone();
                tokio::spawn(async move { executor.process(task(&format!("t{i}"))).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().is_some());
        }
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stopped_executor_skips_waiting_tasks() {
        let handler = Arc::new(handler_fn(|_task: Task, _cancel| async move {
            Ok(TaskResult::success(Vec::new()))
        }));
        let cancel = CancellationToken::new();
        let executor = TaskExecutor::new(
            ExecutorConfig::default(),
            "a1",
            handler,
            AgentMetrics::new().unwrap(),
            cancel.clone(),
        );
        cancel.cancel();
        assert!(executor.process(task("t1")).await.is_none());
    }
}
