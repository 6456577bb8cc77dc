//! Lifecycle callbacks.
//!
//! [`AgentCallbacks`] has one method per lifecycle event, all with no-op
//! defaults. The runtime calls them through [`CallbackBus`], which contains
//! panics and logs returned errors so a misbehaving hook never aborts a
//! stream loop, a task, or a report delivery.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use subnet_types::{Bid, ExecutionReceipt, Intent, Task, TaskResult};
use tracing::{error, warn};

use crate::error::{AgentError, HandlerError};

/// Hooks invoked by the agent runtime.
///
/// Methods run synchronously on the runtime's tasks; keep them short and
/// hand heavy work to a channel.
#[allow(unused_variables)]
pub trait AgentCallbacks: Send + Sync {
    /// Agent started.
    fn on_start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Agent stopped.
    fn on_stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Task is about to execute.
    fn on_task_accepted(&self, task: &Task) {}

    /// Task was not executed because the matcher handshake failed.
    fn on_task_rejected(&self, task: &Task, reason: &str) {}

    /// Task finished, successfully or not.
    fn on_task_completed(&self, task: &Task, result: &TaskResult, error: Option<&HandlerError>) {}

    /// Matcher accepted a bid.
    fn on_bid_submitted(&self, intent: &Intent, bid: &Bid) {}

    /// Bid was rejected or could not be submitted.
    fn on_bid_failed(&self, intent_id: &str, bid_id: &str, reason: &str) {}

    /// At least one validator acknowledged a report.
    fn on_report_submitted(&self, report_id: &str, receipts: &[ExecutionReceipt]) {}

    /// No validator acknowledged a report.
    fn on_report_failed(&self, report_id: &str, reason: &str) {}

    /// Non-fatal runtime error.
    fn on_error(&self, error: &AgentError) {}
}

/// Isolating dispatcher for an optional [`AgentCallbacks`] implementation.
#[derive(Clone, Default)]
pub struct CallbackBus {
    callbacks: Option<Arc<dyn AgentCallbacks>>,
}

impl CallbackBus {
    pub fn new(callbacks: Arc<dyn AgentCallbacks>) -> Self {
        Self {
            callbacks: Some(callbacks),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_none()
    }

    fn fire(&self, event: &'static str, f: impl FnOnce(&dyn AgentCallbacks)) {
        let Some(callbacks) = self.callbacks.as_deref() else {
            return;
        };
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| f(callbacks))) {
            error!(event, panic = %panic_message(payload.as_ref()), "Callback panicked");
        }
    }

    fn fire_fallible(&self, event: &'static str, f: impl FnOnce(&dyn AgentCallbacks) -> anyhow::Result<()>) {
        self.fire(event, |callbacks| {
            if let Err(e) = f(callbacks) {
                warn!(event, error = %e, "Callback returned error");
            }
        });
    }

    pub fn start(&self) {
        self.fire_fallible("on_start", |c| c.on_start());
    }

    pub fn stop(&self) {
        self.fire_fallible("on_stop", |c| c.on_stop());
    }

    pub fn task_accepted(&self, task: &Task) {
        self.fire("on_task_accepted", |c| c.on_task_accepted(task));
    }

    pub fn task_rejected(&self, task: &Task, reason: &str) {
        self.fire("on_task_rejected", |c| c.on_task_rejected(task, reason));
    }

    pub fn task_completed(&self, task: &Task, result: &TaskResult, error: Option<&HandlerError>) {
        self.fire("on_task_completed", |c| c.on_task_completed(task, result, error));
    }

    pub fn bid_submitted(&self, intent: &Intent, bid: &Bid) {
        self.fire("on_bid_submitted", |c| c.on_bid_submitted(intent, bid));
    }

    pub fn bid_failed(&self, intent_id: &str, bid_id: &str, reason: &str) {
        self.fire("on_bid_failed", |c| c.on_bid_failed(intent_id, bid_id, reason));
    }

    pub fn report_submitted(&self, report_id: &str, receipts: &[ExecutionReceipt]) {
        self.fire("on_report_submitted", |c| c.on_report_submitted(report_id, receipts));
    }

    pub fn report_failed(&self, report_id: &str, reason: &str) {
        self.fire("on_report_failed", |c| c.on_report_failed(report_id, reason));
    }

    pub fn error(&self, error: &AgentError) {
        self.fire("on_error", |c| c.on_error(error));
    }
}

impl std::fmt::Debug for CallbackBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackBus")
            .field("registered", &self.callbacks.is_some())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
