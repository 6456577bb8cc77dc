//! Prometheus metrics for the agent runtime

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};

use crate::error::MetricsError;

/// Point-in-time copy of the agent counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_in_flight: i64,
    pub total_bids: u64,
    pub successful_bids: u64,
    pub reports_submitted: u64,
    pub reports_failed: u64,
}

/// Counters owned by one agent instance, registered in its own registry.
#[derive(Clone)]
pub struct AgentMetrics {
    registry: Registry,
    pub tasks_completed: IntCounter,
    pub tasks_failed: IntCounter,
    pub tasks_in_flight: IntGauge,
    pub task_duration_seconds: Histogram,
    pub bids_total: IntCounter,
    pub bids_successful: IntCounter,
    pub reports_submitted: IntCounter,
    pub reports_failed: IntCounter,
}

impl AgentMetrics {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let tasks_completed = IntCounter::with_opts(Opts::new(
            "subnet_agent_tasks_completed_total",
            "Tasks whose handler returned a successful result",
        ))?;
        let tasks_failed = IntCounter::with_opts(Opts::new(
            "subnet_agent_tasks_failed_total",
            "Tasks that errored, timed out, or returned an unsuccessful result",
        ))?;
        let tasks_in_flight = IntGauge::with_opts(Opts::new(
            "subnet_agent_tasks_in_flight",
            "Tasks currently executing",
        ))?;
        let task_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "subnet_agent_task_duration_seconds",
            "Task handler execution time",
        ))?;
        let bids_total = IntCounter::with_opts(Opts::new(
            "subnet_agent_bids_total",
            "Bid submission attempts",
        ))?;
        let bids_successful = IntCounter::with_opts(Opts::new(
            "subnet_agent_bids_successful_total",
            "Bids accepted by the matcher",
        ))?;
        let reports_submitted = IntCounter::with_opts(Opts::new(
            "subnet_agent_reports_submitted_total",
            "Execution report deliveries acknowledged by a validator",
        ))?;
        let reports_failed = IntCounter::with_opts(Opts::new(
            "subnet_agent_reports_failed_total",
            "Execution report deliveries that failed",
        ))?;

        registry.register(Box::new(tasks_completed.clone()))?;
        registry.register(Box::new(tasks_failed.clone()))?;
        registry.register(Box::new(tasks_in_flight.clone()))?;
        registry.register(Box::new(task_duration_seconds.clone()))?;
        registry.register(Box::new(bids_total.clone()))?;
        registry.register(Box::new(bids_successful.clone()))?;
        registry.register(Box::new(reports_submitted.clone()))?;
        registry.register(Box::new(reports_failed.clone()))?;

        Ok(Self {
            registry,
            tasks_completed,
            tasks_failed,
            tasks_in_flight,
            task_duration_seconds,
            bids_total,
            bids_successful,
            reports_submitted,
            reports_failed,
        })
    }

    /// Count one finished task.
    pub fn record_task(&self, success: bool, elapsed_secs: f64) {
        if success {
            self.tasks_completed.inc();
        } else {
            self.tasks_failed.inc();
        }
        self.task_duration_seconds.observe(elapsed_secs);
    }

    /// Count one bid attempt.
    pub fn record_bid(&self, accepted: bool) {
        self.bids_total.inc();
        if accepted {
            self.bids_successful.inc();
        }
    }

    /// Count one acknowledged report delivery.
    pub fn record_report_success(&self) {
        self.reports_submitted.inc();
    }

    /// Count one failed report delivery.
    pub fn record_report_failure(&self) {
        self.reports_failed.inc();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tasks_completed: self.tasks_completed.get(),
            tasks_failed: self.tasks_failed.get(),
            tasks_in_flight: self.tasks_in_flight.get(),
            total_bids: self.bids_total.get(),
            successful_bids: self.bids_successful.get(),
            reports_submitted: self.reports_submitted.get(),
            reports_failed: self.reports_failed.get(),
        }
    }

    /// Registry holding this instance's metrics, for export.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all metrics in the Prometheus text format.
    pub fn encode_text(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl std::fmt::Debug for AgentMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AgentMetrics").field(&self.snapshot()).finish()
    }
}
