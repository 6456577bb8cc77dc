//! Agent configuration.
//!
//! Loaded from TOML or assembled with [`AgentConfig::new`] and the `with_*`
//! methods. [`AgentConfig::validate`] runs before the agent is constructed;
//! it is the only check that can stop startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::Address;

use crate::error::{ConfigError, ConfigResult};

/// Agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Subnet and agent identifiers
    pub identity: IdentityConfig,

    /// secp256k1 private key, 64 hex chars with optional `0x` prefix
    #[serde(default)]
    pub private_key: Option<String>,

    /// On-chain address bound to this agent; derived from the key when unset
    #[serde(default)]
    pub chain_address: Option<String>,

    /// Matcher gRPC address (`host:port` or URI)
    pub matcher_addr: String,

    /// Static validator address used as a report fallback
    #[serde(default)]
    pub validator_addr: Option<String>,

    /// Registry HTTP address
    #[serde(default)]
    pub registry_addr: Option<String>,

    /// Endpoint advertised to the registry
    #[serde(default)]
    pub agent_endpoint: Option<String>,

    /// Task types this agent can execute
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Maximum concurrently executing tasks (default: 5)
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,

    /// Per-task execution timeout (default: 30s)
    #[serde(default = "default_task_timeout_ms")]
    pub task_timeout_ms: u64,

    /// Bid submission timeout (default: 5s)
    #[serde(default = "default_bid_timeout_ms")]
    pub bid_timeout_ms: u64,

    /// Per-validator report delivery timeout (default: 10s)
    #[serde(default = "default_report_timeout_ms")]
    pub report_timeout_ms: u64,

    /// Delay before reopening a closed stream (default: 5s)
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    /// Registry heartbeat interval (default: 30s)
    #[serde(default = "default_heartbeat_interval_ms")]
    pub registry_heartbeat_interval_ms: u64,

    /// gRPC connect timeout (default: 5s)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Send an explicit accept to the matcher before executing a task
    #[serde(default)]
    pub require_task_ack: bool,

    /// Bidding parameters
    #[serde(default)]
    pub bidding: BiddingConfig,

    /// TLS for gRPC channels
    #[serde(default)]
    pub tls: TlsConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Identity of this agent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Subnet identifier; also the signing chain id
    pub subnet_id: String,

    /// Agent identifier
    pub agent_id: String,
}

/// Bidding parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiddingConfig {
    /// Strategy name (default: "fixed")
    #[serde(default = "default_strategy")]
    pub strategy: String,

    /// Lowest price the agent offers (default: 100)
    #[serde(default = "default_min_bid_price")]
    pub min_bid_price: u64,

    /// Highest price the agent offers (default: 1000)
    #[serde(default = "default_max_bid_price")]
    pub max_bid_price: u64,

    /// Bid currency (default: "PIN")
    #[serde(default = "default_currency")]
    pub currency: String,
}

impl Default for BiddingConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            min_bid_price: default_min_bid_price(),
            max_bid_price: default_max_bid_price(),
            currency: default_currency(),
        }
    }
}

/// gRPC TLS settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Use TLS for gRPC channels
    #[serde(default)]
    pub enabled: bool,

    /// Extra trusted CA certificate (PEM)
    #[serde(default)]
    pub ca_cert_path: Option<PathBuf>,

    /// Expected server name
    #[serde(default)]
    pub domain: Option<String>,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is unset (default: "info")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value functions
fn default_max_concurrent_tasks() -> usize {
    5
}

fn default_task_timeout_ms() -> u64 {
    30_000
}

fn default_bid_timeout_ms() -> u64 {
    5_000
}

fn default_report_timeout_ms() -> u64 {
    10_000
}

fn default_reconnect_interval_ms() -> u64 {
    5_000
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_strategy() -> String {
    "fixed".to_string()
}

fn default_min_bid_price() -> u64 {
    100
}

fn default_max_bid_price() -> u64 {
    1000
}

fn default_currency() -> String {
    "PIN".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AgentConfig {
    /// Minimal configuration with defaults for everything else.
    pub fn new(
        subnet_id: impl Into<String>,
        agent_id: impl Into<String>,
        matcher_addr: impl Into<String>,
    ) -> Self {
        Self {
            identity: IdentityConfig {
                subnet_id: subnet_id.into(),
                agent_id: agent_id.into(),
            },
            private_key: None,
            chain_address: None,
            matcher_addr: matcher_addr.into(),
            validator_addr: None,
            registry_addr: None,
            agent_endpoint: None,
            capabilities: Vec::new(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
            task_timeout_ms: default_task_timeout_ms(),
            bid_timeout_ms: default_bid_timeout_ms(),
            report_timeout_ms: default_report_timeout_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            registry_heartbeat_interval_ms: default_heartbeat_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            require_task_ack: false,
            bidding: BiddingConfig::default(),
            tls: TlsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Load configuration from TOML file
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(contents: &str) -> ConfigResult<Self> {
        let config: AgentConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the private key.
    pub fn with_private_key(mut self, key: impl Into<String>) -> Self {
        self.private_key = Some(key.into());
        self
    }

    /// Bind an explicit chain address.
    pub fn with_chain_address(mut self, address: impl Into<String>) -> Self {
        self.chain_address = Some(address.into());
        self
    }

    /// Set the static validator fallback.
    pub fn with_validator_addr(mut self, addr: impl Into<String>) -> Self {
        self.validator_addr = Some(addr.into());
        self
    }

    /// Use a registry for validator discovery and registration.
    pub fn with_registry(mut self, registry_addr: impl Into<String>, agent_endpoint: impl Into<String>) -> Self {
        self.registry_addr = Some(registry_addr.into());
        self.agent_endpoint = Some(agent_endpoint.into());
        self
    }

    /// Add a capability.
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    /// Set the concurrency bound.
    pub fn with_max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max;
        self
    }

    /// Set the task timeout.
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the bid timeout.
    pub fn with_bid_timeout(mut self, timeout: Duration) -> Self {
        self.bid_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the per-validator report timeout.
    pub fn with_report_timeout(mut self, timeout: Duration) -> Self {
        self.report_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the stream reconnect delay.
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval_ms = duration_ms(interval);
        self
    }

    /// Require an explicit task accept before execution.
    pub fn with_task_ack(mut self, required: bool) -> Self {
        self.require_task_ack = required;
        self
    }

    /// Set bidding parameters.
    pub fn with_bidding(mut self, bidding: BiddingConfig) -> Self {
        self.bidding = bidding;
        self
    }

    /// Task timeout as a duration.
    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    /// Bid timeout as a duration.
    pub fn bid_timeout(&self) -> Duration {
        Duration::from_millis(self.bid_timeout_ms)
    }

    /// Report timeout as a duration.
    pub fn report_timeout(&self) -> Duration {
        Duration::from_millis(self.report_timeout_ms)
    }

    /// Reconnect delay as a duration.
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// Heartbeat interval as a duration.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.registry_heartbeat_interval_ms)
    }

    /// Connect timeout as a duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Private key without prefix or surrounding whitespace.
    pub fn normalized_private_key(&self) -> Option<String> {
        self.private_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(|k| {
                k.strip_prefix("0x")
                    .or_else(|| k.strip_prefix("0X"))
                    .unwrap_or(k)
                    .to_string()
            })
    }

    /// Configured chain address, parsed.
    pub fn parsed_chain_address(&self) -> ConfigResult<Option<Address>> {
        match self.chain_address.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => Address::from_str(raw)
                .map(Some)
                .map_err(|e| ConfigError::Invalid {
                    field: "chain_address",
                    reason: e.to_string(),
                }),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> ConfigResult<()> {
        if self.identity.subnet_id.trim().is_empty() {
            return Err(ConfigError::Missing("subnet_id"));
        }
        if self.identity.agent_id.trim().is_empty() {
            return Err(ConfigError::Missing("agent_id"));
        }
        if self.matcher_addr.trim().is_empty() {
            return Err(ConfigError::Missing("matcher_addr"));
        }
        if self.capabilities.iter().all(|c| c.trim().is_empty()) {
            return Err(ConfigError::Missing("capabilities"));
        }

        if let Some(key) = self.normalized_private_key() {
            if key.len() != 64 || !key.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(ConfigError::Invalid {
                    field: "private_key",
                    reason: "must be 64 hex characters".to_string(),
                });
            }
        }
        self.parsed_chain_address()?;

        let has_registry = self
            .registry_addr
            .as_deref()
            .is_some_and(|r| !r.trim().is_empty());
        let has_endpoint = self
            .agent_endpoint
            .as_deref()
            .is_some_and(|e| !e.trim().is_empty());
        if has_registry && !has_endpoint {
            return Err(ConfigError::Missing("agent_endpoint"));
        }

        if self.max_concurrent_tasks == 0 {
            return Err(ConfigError::Invalid {
                field: "max_concurrent_tasks",
                reason: "must be at least 1".to_string(),
            });
        }
        for (field, value) in [
            ("task_timeout_ms", self.task_timeout_ms),
            ("bid_timeout_ms", self.bid_timeout_ms),
            ("report_timeout_ms", self.report_timeout_ms),
            ("reconnect_interval_ms", self.reconnect_interval_ms),
            ("registry_heartbeat_interval_ms", self.registry_heartbeat_interval_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        if self.bidding.min_bid_price > self.bidding.max_bid_price {
            return Err(ConfigError::Invalid {
                field: "bidding",
                reason: format!(
                    "min_bid_price {} exceeds max_bid_price {}",
                    self.bidding.min_bid_price, self.bidding.max_bid_price
                ),
            });
        }

        Ok(())
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
