//! Stream supervisor.
//!
//! Keeps one matcher stream open for as long as the agent runs:
//!
//! ```text
//! Connecting ─► Streaming ─► Closed | Errored ─► Backoff ─► Connecting
//!      └──────────────── cancel ───────────────────► Cancelled
//! ```
//!
//! The stream counts as `Streaming` once the server accepts it or the first
//! item arrives. Every received item is handed to its own task. The backoff
//! is fixed.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use subnet_transport::Subscription;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::callbacks::CallbackBus;
use crate::error::AgentError;

/// Default delay before reopening a stream.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// Lifecycle state of a supervised stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamState {
    /// Supervisor not started.
    Idle,
    /// Opening the stream.
    Connecting,
    /// Receiving items.
    Streaming,
    /// Server ended the stream cleanly.
    Closed,
    /// Stream ended with an error.
    Errored(String),
    /// Waiting before reconnecting.
    Backoff,
    /// Stopped by cancellation; terminal.
    Cancelled,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamState::Idle => write!(f, "Idle"),
            StreamState::Connecting => write!(f, "Connecting"),
            StreamState::Streaming => write!(f, "Streaming"),
            StreamState::Closed => write!(f, "Closed"),
            StreamState::Errored(e) => write!(f, "Errored({e})"),
            StreamState::Backoff => write!(f, "Backoff"),
            StreamState::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Shared publisher of a stream's state.
pub type StreamStateSender = Arc<watch::Sender<StreamState>>;

/// New state publisher starting at [`StreamState::Idle`].
pub fn stream_state_channel() -> StreamStateSender {
    Arc::new(watch::channel(StreamState::Idle).0)
}

/// Reconnect loop for one stream kind.
pub struct StreamSupervisor {
    kind: &'static str,
    backoff: Duration,
    cancel: CancellationToken,
    callbacks: CallbackBus,
    state: StreamStateSender,
}

impl StreamSupervisor {
    pub fn new(
        kind: &'static str,
        backoff: Duration,
        cancel: CancellationToken,
        callbacks: CallbackBus,
        state: StreamStateSender,
    ) -> Self {
        Self {
            kind,
            backoff,
            cancel,
            callbacks,
            state,
        }
    }

    /// Watch the state of this stream.
    pub fn subscribe(&self) -> watch::Receiver<StreamState> {
        self.state.subscribe()
    }

    fn set(&self, state: StreamState) {
        debug!(stream = self.kind, state = %state, "Stream state");
        self.state.send_replace(state);
    }

    /// Run until cancelled.
    ///
    /// `open` is called for every connection attempt; `dispatch` is called
    /// for every item and its future is spawned.
    pub async fn run<T, O, D, Fut>(self, mut open: O, dispatch: D)
    where
        T: Send + 'static,
        O: FnMut(CancellationToken) -> Subscription<T>,
        D: Fn(T) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        info!(stream = self.kind, "Starting stream loop");

        while !self.cancel.is_cancelled() {
            self.set(StreamState::Connecting);
            let mut subscription = open(self.cancel.clone());

            let mut awaiting_open = true;
            let mut received = 0u64;
            let ended = loop {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break None,
                    opened = &mut subscription.opened, if awaiting_open => {
                        awaiting_open = false;
                        if opened.is_ok() {
                            self.set(StreamState::Streaming);
                        }
                    }
                    item = subscription.items.recv() => match item {
                        Some(item) => {
                            if awaiting_open {
                                awaiting_open = false;
                                self.set(StreamState::Streaming);
                            }
                            received += 1;
                            tokio::spawn(dispatch(item));
                        }
                        None => break Some(subscription.take_error()),
                    },
                }
            };

            match ended {
                None => break,
                Some(None) => {
                    info!(stream = self.kind, received, "Stream closed by server");
                    self.set(StreamState::Closed);
                }
                Some(Some(e)) => {
                    warn!(stream = self.kind, received, error = %e, "Stream failed");
                    self.set(StreamState::Errored(e.to_string()));
                    self.callbacks.error(&AgentError::Transport(e));
                }
            }

            self.set(StreamState::Backoff);
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.backoff) => {}
            }
        }

        self.set(StreamState::Cancelled);
        info!(stream = self.kind, "Stream loop stopped");
    }
}
