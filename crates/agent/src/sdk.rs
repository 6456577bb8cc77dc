//! The agent instance.
//!
//! [`Agent`] owns the configuration, identity and metrics, and guards the
//! mutable runtime state (running flag, handler, strategy, callbacks,
//! transports, loop handles) behind one reader-writer lock.

use std::sync::Arc;
use std::time::Duration;

use subnet_transport::{
    ClientConfig, MatcherClient, MatcherTransport, ReportBatchAck, TlsSettings, ValidatorClient,
    ValidatorTransport,
};
use subnet_types::{Bid, BidBatchAck, ExecutionReport, Intent, Task, ValidatorEndpoint};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bidding::BiddingEngine;
use crate::callbacks::{AgentCallbacks, CallbackBus};
use crate::config::AgentConfig;
use crate::dispatcher::{resolve_report, DispatcherConfig, ReportDispatcher, ReportSubmission};
use crate::error::{AgentError, AgentResult, RegistryError};
use crate::executor::{ExecutorConfig, TaskExecutor, TaskOutcome};
use crate::handler::{BiddingStrategy, TaskHandler};
use crate::identity::AgentIdentity;
use crate::metrics::{AgentMetrics, MetricsSnapshot};
use crate::registry::{AgentRegistration, RegistryClient, DEFAULT_REGISTRY_TIMEOUT};
use crate::supervisor::{stream_state_channel, StreamState, StreamStateSender, StreamSupervisor};

#[derive(Default)]
struct AgentInner {
    running: bool,
    handler: Option<Arc<dyn TaskHandler>>,
    strategy: Option<Arc<dyn BiddingStrategy>>,
    callbacks: CallbackBus,
    matcher: Option<Arc<dyn MatcherTransport>>,
    validator: Option<Arc<dyn ValidatorTransport>>,
    cancel: CancellationToken,
    loops: Vec<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
}

/// A marketplace agent.
///
/// Register a [`TaskHandler`] (and optionally a [`BiddingStrategy`] and
/// [`AgentCallbacks`]), then [`start`](Agent::start). Handler, strategy and
/// callbacks are captured at start; later registrations apply on the next
/// start.
pub struct Agent {
    config: AgentConfig,
    identity: Arc<AgentIdentity>,
    metrics: AgentMetrics,
    registry: Option<RegistryClient>,
    task_state: StreamStateSender,
    intent_state: StreamStateSender,
    inner: RwLock<AgentInner>,
}

impl Agent {
    /// Validate `config` and build an agent.
    ///
    /// Fails when the configuration is invalid or the configured chain
    /// address does not belong to the private key.
    pub fn new(config: AgentConfig) -> AgentResult<Self> {
        config.validate()?;
        let identity = Arc::new(AgentIdentity::from_config(&config)?);
        let metrics = AgentMetrics::new()?;
        let registry = config
            .registry_addr
            .as_deref()
            .filter(|addr| !addr.trim().is_empty())
            .map(|addr| RegistryClient::new(addr, DEFAULT_REGISTRY_TIMEOUT))
            .transpose()?;

        info!(
            subnet_id = %identity.subnet_id(),
            agent_id = %identity.agent_id(),
            chain_address = identity.chain_address_string().as_deref().unwrap_or("none"),
            "Agent created"
        );

        Ok(Self {
            config,
            identity,
            metrics,
            registry,
            task_state: stream_state_channel(),
            intent_state: stream_state_channel(),
            inner: RwLock::new(AgentInner::default()),
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    pub fn agent_id(&self) -> &str {
        self.identity.agent_id()
    }

    /// Bound chain address in checksum form.
    pub fn chain_address(&self) -> Option<String> {
        self.identity.chain_address_string()
    }

    /// Current counter values.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Metric handles and registry, for export.
    pub fn metrics_handle(&self) -> &AgentMetrics {
        &self.metrics
    }

    /// State of the task stream loop.
    pub fn task_stream_state(&self) -> watch::Receiver<StreamState> {
        self.task_state.subscribe()
    }

    /// State of the intent stream loop.
    pub fn intent_stream_state(&self) -> watch::Receiver<StreamState> {
        self.intent_state.subscribe()
    }

    pub async fn is_running(&self) -> bool {
        self.inner.read().await.running
    }

    pub async fn register_handler(&self, handler: Arc<dyn TaskHandler>) {
        self.inner.write().await.handler = Some(handler);
    }

    pub async fn register_bidding_strategy(&self, strategy: Arc<dyn BiddingStrategy>) {
        self.inner.write().await.strategy = Some(strategy);
    }

    pub async fn register_callbacks(&self, callbacks: Arc<dyn AgentCallbacks>) {
        self.inner.write().await.callbacks = CallbackBus::new(callbacks);
    }

    /// Use `matcher` instead of a gRPC client built from `matcher_addr`.
    pub async fn set_matcher_transport(&self, matcher: Arc<dyn MatcherTransport>) {
        self.inner.write().await.matcher = Some(matcher);
    }

    /// Use `validator` instead of a gRPC client built from `validator_addr`.
    pub async fn set_validator_transport(&self, validator: Arc<dyn ValidatorTransport>) {
        self.inner.write().await.validator = Some(validator);
    }

    /// Start the stream loops.
    ///
    /// Registers with the registry when one is configured, opens the task
    /// stream, and opens the intent stream when a bidding strategy is
    /// registered. A failed registration is reported through `on_error`
    /// and does not prevent the start.
    pub async fn start(&self) -> AgentResult<()> {
        let (handler, strategy, matcher, callbacks) = {
            let mut inner = self.inner.write().await;
            if inner.running {
                return Err(AgentError::AlreadyRunning);
            }
            let handler = inner.handler.clone().ok_or(AgentError::NoHandler)?;
            let matcher = self.matcher_in(&mut inner)?;
            (handler, inner.strategy.clone(), matcher, inner.callbacks.clone())
        };

        // The state lock is not held across the registry call.
        if let Some(registry) = &self.registry {
            let registration = AgentRegistration {
                id: self.agent_id().to_string(),
                capabilities: self.config.capabilities.clone(),
                endpoint: self.config.agent_endpoint.clone().unwrap_or_default(),
            };
            if let Err(e) = registry.register(&registration).await {
                warn!(error = %e, "Registry registration failed");
                callbacks.error(&AgentError::Registry(e));
            }
        }

        let mut inner = self.inner.write().await;
        if inner.running {
            return Err(AgentError::AlreadyRunning);
        }
        let cancel = CancellationToken::new();

        let executor = Arc::new(self.executor(
            handler,
            callbacks.clone(),
            Some(matcher.clone()),
            cancel.clone(),
        )?);

        if let Some(registry) = &self.registry {
            inner.heartbeat = Some(registry.spawn_heartbeat(
                self.agent_id().to_string(),
                self.config.heartbeat_interval(),
                cancel.clone(),
            ));
        }

        let mut loops = Vec::with_capacity(2);

        let tasks = StreamSupervisor::new(
            "tasks",
            self.config.reconnect_interval(),
            cancel.clone(),
            callbacks.clone(),
            self.task_state.clone(),
        );
        let task_matcher = matcher.clone();
        let agent_id = self.agent_id().to_string();
        loops.push(tokio::spawn(tasks.run(
            move |cancel| task_matcher.stream_tasks(&agent_id, cancel),
            move |task: Task| {
                let executor = executor.clone();
                async move {
                    executor.process(task).await;
                }
            },
        )));

        match strategy {
            Some(strategy) => {
                let engine = Arc::new(BiddingEngine::new(
                    matcher.clone(),
                    self.identity.clone(),
                    self.metrics.clone(),
                    callbacks.clone(),
                    self.config.bid_timeout(),
                ));
                let intents = StreamSupervisor::new(
                    "intents",
                    self.config.reconnect_interval(),
                    cancel.clone(),
                    callbacks.clone(),
                    self.intent_state.clone(),
                );
                let intent_matcher = matcher.clone();
                let subnet_id = self.identity.subnet_id().to_string();
                loops.push(tokio::spawn(intents.run(
                    move |cancel| intent_matcher.stream_intents(&subnet_id, cancel),
                    move |intent: Intent| {
                        let engine = engine.clone();
                        let strategy = strategy.clone();
                        async move {
                            engine.handle_intent(strategy.as_ref(), &intent).await;
                        }
                    },
                )));
            }
            None => info!("No bidding strategy registered, intent stream disabled"),
        }

        inner.running = true;
        inner.cancel = cancel;
        inner.loops = loops;
        drop(inner);

        callbacks.start();
        info!(agent_id = %self.agent_id(), matcher = %self.config.matcher_addr, "Agent started");
        Ok(())
    }

    /// Stop the stream loops and wait for them to exit.
    ///
    /// In-flight report deliveries are aborted. Unregisters from the
    /// registry when one is configured.
    pub async fn stop(&self) -> AgentResult<()> {
        let (cancel, loops, heartbeat, callbacks) = {
            let mut inner = self.inner.write().await;
            if !inner.running {
                return Err(AgentError::NotRunning);
            }
            inner.running = false;
            (
                inner.cancel.clone(),
                std::mem::take(&mut inner.loops),
                inner.heartbeat.take(),
                inner.callbacks.clone(),
            )
        };

        cancel.cancel();
        for handle in loops {
            if let Err(e) = handle.await {
                warn!(error = %e, "Stream loop task failed");
            }
        }
        if let Some(heartbeat) = heartbeat {
            let _ = heartbeat.await;
        }

        if let Some(registry) = &self.registry {
            if let Err(e) = registry.unregister(self.agent_id()).await {
                warn!(error = %e, "Failed to unregister from registry");
                callbacks.error(&AgentError::Registry(e));
            }
        }

        callbacks.stop();
        info!(agent_id = %self.agent_id(), "Agent stopped");
        Ok(())
    }

    /// Run one task through the registered handler and report it.
    ///
    /// Does not require a running agent and skips the matcher handshake.
    pub async fn execute_task(&self, task: Task) -> AgentResult<TaskOutcome> {
        let executor = {
            let inner = self.inner.read().await;
            let handler = inner.handler.clone().ok_or(AgentError::NoHandler)?;
            self.executor(
                handler,
                inner.callbacks.clone(),
                inner.matcher.clone(),
                self.cancel_token(&inner),
            )?
        };
        Ok(executor.execute(task).await)
    }

    /// Sign `data` with the agent key (65-byte recoverable signature).
    pub fn sign(&self, data: &[u8]) -> AgentResult<Vec<u8>> {
        Ok(self.identity.sign(data)?)
    }

    /// Validators known to the registry.
    pub async fn discover_validators(&self) -> AgentResult<Vec<ValidatorEndpoint>> {
        let registry = self.registry.as_ref().ok_or(RegistryError::NotConfigured)?;
        Ok(registry.discover_validators().await?)
    }

    /// Deliver a report to every known validator.
    ///
    /// `timeout` bounds the whole fan-out. A partial delivery returns the
    /// receipts together with the failures in [`ReportSubmission::error`].
    pub async fn submit_execution_report(
        &self,
        report: &ExecutionReport,
        timeout: Option<Duration>,
    ) -> AgentResult<ReportSubmission> {
        let cancel = {
            let inner = self.inner.read().await;
            self.cancel_token(&inner)
        };
        let dispatcher = self.dispatcher(cancel)?;
        let deadline = timeout.map(|t| Instant::now() + t);
        Ok(dispatcher.submit(report, deadline).await?)
    }

    /// Send several reports through the validator service in one call.
    pub async fn submit_execution_reports(
        &self,
        reports: &[ExecutionReport],
    ) -> AgentResult<ReportBatchAck> {
        if reports.is_empty() {
            return Err(AgentError::Invalid("no reports to submit".to_string()));
        }
        let resolved = reports
            .iter()
            .map(|report| resolve_report(&self.identity, report))
            .collect::<Result<Vec<_>, _>>()?;

        let validator = self.validator().await?;
        match validator.submit_execution_report_batch(&resolved).await {
            Ok(ack) => {
                for _ in 0..ack.success {
                    self.metrics.record_report_success();
                }
                for _ in 0..ack.failed {
                    self.metrics.record_report_failure();
                }
                info!(reports = resolved.len(), success = ack.success, failed = ack.failed, "Report batch submitted");
                Ok(ack)
            }
            Err(e) => {
                for _ in &resolved {
                    self.metrics.record_report_failure();
                }
                Err(e.into())
            }
        }
    }

    /// Submit several bids, each as `(intent_id, bid)`, in one matcher call.
    pub async fn submit_bids(&self, bids: &[(String, Bid)]) -> AgentResult<BidBatchAck> {
        let (matcher, callbacks) = {
            let mut inner = self.inner.write().await;
            (self.matcher_in(&mut inner)?, inner.callbacks.clone())
        };
        let engine = BiddingEngine::new(
            matcher,
            self.identity.clone(),
            self.metrics.clone(),
            callbacks,
            self.config.bid_timeout(),
        );
        engine.submit_batch(bids).await
    }

    /// Validator set of this subnet, from the validator service.
    pub async fn validator_set(&self) -> AgentResult<Vec<ValidatorEndpoint>> {
        let validator = self.validator().await?;
        Ok(validator.get_validator_set(self.identity.subnet_id()).await?)
    }

    fn client_config(&self, endpoint: &str) -> ClientConfig {
        let mut client =
            ClientConfig::new(endpoint.trim()).with_connect_timeout(self.config.connect_timeout());
        if self.config.tls.enabled {
            client = client.with_tls(TlsSettings {
                ca_cert_path: self.config.tls.ca_cert_path.clone(),
                domain: self.config.tls.domain.clone(),
            });
        }
        if let Some(signer) = self.identity.request_signer() {
            client = client.with_signer(signer);
        }
        client
    }

    fn matcher_in(&self, inner: &mut AgentInner) -> AgentResult<Arc<dyn MatcherTransport>> {
        if let Some(matcher) = &inner.matcher {
            return Ok(matcher.clone());
        }
        let matcher: Arc<dyn MatcherTransport> =
            Arc::new(MatcherClient::new(self.client_config(&self.config.matcher_addr))?);
        inner.matcher = Some(matcher.clone());
        Ok(matcher)
    }

    async fn validator(&self) -> AgentResult<Arc<dyn ValidatorTransport>> {
        let mut inner = self.inner.write().await;
        if let Some(validator) = &inner.validator {
            return Ok(validator.clone());
        }
        let addr = self
            .config
            .validator_addr
            .as_deref()
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
            .ok_or(AgentError::NoValidator)?;
        let validator: Arc<dyn ValidatorTransport> =
            Arc::new(ValidatorClient::new(self.client_config(addr))?);
        inner.validator = Some(validator.clone());
        Ok(validator)
    }

    fn cancel_token(&self, inner: &AgentInner) -> CancellationToken {
        if inner.running {
            inner.cancel.clone()
        } else {
            CancellationToken::new()
        }
    }

    fn dispatcher(&self, cancel: CancellationToken) -> AgentResult<ReportDispatcher> {
        let config = DispatcherConfig {
            registry: self.registry.clone(),
            fallback_addr: self.config.validator_addr.clone(),
            per_call_timeout: self.config.report_timeout(),
            cancel,
        };
        Ok(ReportDispatcher::new(config, self.identity.clone(), self.metrics.clone())?)
    }

    fn executor(
        &self,
        handler: Arc<dyn TaskHandler>,
        callbacks: CallbackBus,
        matcher: Option<Arc<dyn MatcherTransport>>,
        cancel: CancellationToken,
    ) -> AgentResult<TaskExecutor> {
        let dispatcher = self.dispatcher(cancel.clone())?;
        let config = ExecutorConfig {
            task_timeout: self.config.task_timeout(),
            max_concurrent: self.config.max_concurrent_tasks,
            require_ack: self.config.require_task_ack,
        };

        let mut executor = TaskExecutor::new(config, self.agent_id(), handler, self.metrics.clone(), cancel)
            .with_callbacks(callbacks);
        if let Some(matcher) = matcher {
            executor = executor.with_matcher(matcher);
        }
        if dispatcher.has_sources() {
            executor = executor.with_dispatcher(Arc::new(dispatcher));
        }
        Ok(executor)
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("identity", &self.identity)
            .field("matcher_addr", &self.config.matcher_addr)
            .field("metrics", &self.metrics.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use crate::handler::handler_fn;
    use subnet_types::TaskResult;

    const KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn config() -> AgentConfig {
        AgentConfig::new("s1", "a1", "127.0.0.1:1").with_capability("compute")
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let err = Agent::new(AgentConfig::new("", "a1", "127.0.0.1:1").with_capability("compute"))
            .unwrap_err();
        assert_eq!(err.to_string(), "configuration error: subnet_id is required");
    }

    #[test]
    fn test_new_rejects_address_mismatch() {
        let err = Agent::new(
            config()
                .with_private_key(KEY)
                .with_chain_address("0x0000000000000000000000000000000000000001"),
        )
        .unwrap_err();
        assert!(matches!(err, AgentError::Config(crate::error::ConfigError::AddressMismatch)));
    }

    #[tokio::test]
    async fn test_start_requires_handler() {
        let agent = Agent::new(config()).unwrap();
        assert!(matches!(agent.start().await, Err(AgentError::NoHandler)));
        assert!(!agent.is_running().await);
    }

    #[tokio::test]
    async fn test_stop_requires_running() {
        let agent = Agent::new(config()).unwrap();
        assert!(matches!(agent.stop().await, Err(AgentError::NotRunning)));
    }

    #[tokio::test]
    async fn test_sign_requires_key() {
        let agent = Agent::new(config()).unwrap();
        assert!(matches!(agent.sign(b"data"), Err(AgentError::Signing(_))));

        let agent = Agent::new(config().with_private_key(KEY)).unwrap();
        assert_eq!(agent.sign(b"data").unwrap().len(), 65);
        assert_eq!(
            agent.chain_address().as_deref(),
            Some("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266")
        );
    }

    #[tokio::test]
    async fn test_validator_calls_require_address() {
        let agent = Agent::new(config()).unwrap();
        assert!(matches!(agent.validator_set().await, Err(AgentError::NoValidator)));
        assert!(matches!(
            agent.discover_validators().await,
            Err(AgentError::Registry(RegistryError::NotConfigured))
        ));
    }

    #[tokio::test]
    async fn test_execute_task_without_start() {
        let agent = Agent::new(config()).unwrap();
        agent
            .register_handler(Arc::new(handler_fn(|task: Task, _cancel| async move {
                Ok(TaskResult::success(task.payload))
            })))
            .await;

        let task = Task {
            id: "t1".into(),
            intent_id: "i1".into(),
            task_type: "compute".into(),
            payload: b"in".to_vec(),
            metadata: Default::default(),
            deadline: chrono::Utc::now(),
            created_at: chrono::Utc::now(),
        };
        let outcome = agent.execute_task(task).await.unwrap();
        assert!(outcome.succeeded());
        assert!(outcome.report.is_none());
        assert_eq!(agent.metrics().tasks_completed, 1);
    }
}
