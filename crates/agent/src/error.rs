//! Error types for the agent runtime.
//!
//! Configuration errors stop startup. Everything else is reported to the
//! caller or to the callback bus and the runtime keeps going.

use std::fmt;

use subnet_transport::{SigningError, TransportError};
use thiserror::Error;

/// Top-level error type for agent operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Signing failed or no key was configured.
    #[error("signing error: {0}")]
    Signing(#[from] SigningError),

    /// Matcher or validator call failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Report delivery failed.
    #[error("report error: {0}")]
    Report(#[from] ReportError),

    /// Registry call failed.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Metrics registration failed.
    #[error("metrics error: {0}")]
    Metrics(#[from] MetricsError),

    /// Logging setup failed.
    #[error("logging error: {0}")]
    Logging(String),

    /// `start` called on a running agent.
    #[error("agent already running")]
    AlreadyRunning,

    /// Operation requires a running agent.
    #[error("agent not running")]
    NotRunning,

    /// No task handler registered.
    #[error("no task handler registered")]
    NoHandler,

    /// Operation requires a matcher address or transport.
    #[error("matcher transport not configured")]
    NoMatcher,

    /// Operation requires a validator address or transport.
    #[error("validator transport not configured")]
    NoValidator,

    /// A matcher or validator call did not answer in time.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        /// Operation that timed out.
        operation: &'static str,
        /// Timeout in milliseconds.
        timeout_ms: u64,
    },

    /// A report or bid failed local validation.
    #[error("invalid input: {0}")]
    Invalid(String),
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid TOML.
    #[error("failed to parse config: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// A required field is empty.
    #[error("{0} is required")]
    Missing(&'static str),

    /// A field has an invalid value.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Field name.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// Configured chain address differs from the key's address.
    #[error("chain_address does not match derived address from private key")]
    AddressMismatch,
}

/// Errors from the report dispatcher.
#[derive(Debug, Clone, Error)]
pub enum ReportError {
    /// The report failed local validation; nothing was sent.
    #[error("invalid report: {0}")]
    Validation(String),

    /// Discovery produced no endpoints.
    #[error("no validator endpoints available")]
    NoEndpoints,

    /// Discovery failed and no fallback endpoint was usable.
    #[error("validator discovery failed: {0}")]
    Discovery(String),

    /// Every delivery failed.
    #[error("all validator submissions failed: {0}")]
    AllFailed(FanoutError),

    /// The runtime was stopped before delivery finished.
    #[error("report submission cancelled")]
    Cancelled,
}

/// One failed delivery in a fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointFailure {
    /// Endpoint URL the report was sent to.
    pub endpoint: String,
    /// Failure description.
    pub reason: String,
}

/// Aggregated delivery failures of one fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutError {
    /// Failures in endpoint order.
    pub failures: Vec<EndpointFailure>,
}

impl FanoutError {
    /// True when no delivery failed.
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of failed deliveries.
    pub fn len(&self) -> usize {
        self.failures.len()
    }
}

impl fmt::Display for FanoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} submission(s) failed: ", self.failures.len())?;
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", failure.endpoint, failure.reason)?;
        }
        Ok(())
    }
}

impl std::error::Error for FanoutError {}

/// Registry HTTP errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No registry address configured.
    #[error("registry not configured")]
    NotConfigured,

    /// HTTP request failed.
    #[error("registry request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Registry answered with a non-success status.
    #[error("registry returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },
}

/// Errors returned by task handlers.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Handler exceeded the task timeout.
    #[error("task timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout in milliseconds.
        timeout_ms: u64,
    },

    /// Handler was cancelled by shutdown.
    #[error("task cancelled")]
    Cancelled,

    /// Handler-specific failure.
    #[error("{0}")]
    Failed(#[from] anyhow::Error),
}

/// Metrics registration errors.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Prometheus registry error.
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// Result type for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

/// Result type for configuration.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for registry calls.
pub type RegistryResult<T> = Result<T, RegistryError>;
