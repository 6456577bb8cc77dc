//! Subnet agent runtime.
//!
//! Connects an agent to the subnet matcher and validators:
//!
//! ```text
//!            ┌──────────── Agent ────────────┐
//! matcher ──►│ intents ─► BiddingEngine ─────┼──► SubmitBid
//!            │ tasks ───► TaskExecutor ──────┼──► ReportDispatcher ──► validators (HTTP)
//!            └───────────────────────────────┘
//! ```
//!
//! Both streams run under a [`StreamSupervisor`] that reconnects after a
//! fixed delay. All outbound calls are signed with the agent key.

pub mod bidding;
pub mod callbacks;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod handler;
pub mod identity;
pub mod logging;
pub mod metrics;
pub mod registry;
pub mod sdk;
pub mod supervisor;

pub use bidding::{BidOutcome, BiddingEngine};
pub use callbacks::{AgentCallbacks, CallbackBus};
pub use config::{AgentConfig, BiddingConfig, IdentityConfig, LoggingConfig, TlsConfig};
pub use dispatcher::{
    execution_report_url, ReportDispatcher, ReportSubmission, EXECUTION_REPORT_PATH,
};
pub use error::{
    AgentError, AgentResult, ConfigError, EndpointFailure, FanoutError, HandlerError,
    RegistryError, ReportError,
};
pub use executor::{TaskExecutor, TaskOutcome};
pub use handler::{handler_fn, BiddingStrategy, FixedPriceStrategy, TaskHandler};
pub use identity::{ensure_chain_address_metadata, AgentIdentity};
pub use logging::init_tracing;
pub use metrics::{AgentMetrics, MetricsSnapshot};
pub use registry::RegistryClient;
pub use sdk::Agent;
pub use supervisor::{StreamState, StreamSupervisor};

pub use subnet_transport::{recover_signer, MatcherTransport, ValidatorTransport};
pub use subnet_types::*;
