//! Agent identity: ids, signing key, and bound chain address.

use alloy_primitives::Address;
use subnet_transport::{RequestSigner, Signer, SigningError};
use subnet_types::{Metadata, CHAIN_ADDRESS_METADATA_KEY};

use crate::config::AgentConfig;
use crate::error::{ConfigError, ConfigResult};

/// Resolved identity of a running agent. Immutable after construction.
#[derive(Debug, Clone)]
pub struct AgentIdentity {
    subnet_id: String,
    agent_id: String,
    chain_address: Option<Address>,
    signer: Option<Signer>,
}

impl AgentIdentity {
    /// Resolve the identity from configuration.
    ///
    /// With both a key and an explicit chain address configured, the two
    /// must agree.
    pub fn from_config(config: &AgentConfig) -> ConfigResult<Self> {
        let signer = config
            .normalized_private_key()
            .map(|key| Signer::from_hex(&key))
            .transpose()
            .map_err(|e| ConfigError::Invalid {
                field: "private_key",
                reason: e.to_string(),
            })?;
        let configured = config.parsed_chain_address()?;

        let chain_address = match (&signer, configured) {
            (Some(signer), Some(configured)) => {
                if signer.address() != configured {
                    return Err(ConfigError::AddressMismatch);
                }
                Some(configured)
            }
            (Some(signer), None) => Some(signer.address()),
            (None, configured) => configured,
        };

        Ok(Self {
            subnet_id: config.identity.subnet_id.trim().to_string(),
            agent_id: config.identity.agent_id.trim().to_string(),
            chain_address,
            signer,
        })
    }

    /// Subnet identifier.
    pub fn subnet_id(&self) -> &str {
        &self.subnet_id
    }

    /// Agent identifier.
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Bound chain address.
    pub fn chain_address(&self) -> Option<Address> {
        self.chain_address
    }

    /// Bound chain address in checksum form.
    pub fn chain_address_string(&self) -> Option<String> {
        self.chain_address.map(|a| a.to_checksum(None))
    }

    /// Signing key, if configured.
    pub fn signer(&self) -> Option<&Signer> {
        self.signer.as_ref()
    }

    /// Request signer keyed to this subnet.
    pub fn request_signer(&self) -> Option<RequestSigner> {
        self.signer
            .clone()
            .map(|signer| RequestSigner::new(signer, self.subnet_id.clone()))
    }

    /// Sign raw bytes with the agent key.
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, SigningError> {
        let signer = self.signer.as_ref().ok_or(SigningError::NoSigner)?;
        Ok(signer.sign(data)?.to_vec())
    }

    /// Copy of `metadata` carrying this agent's chain address.
    pub fn ensure_chain_address(&self, metadata: &Metadata) -> Metadata {
        ensure_chain_address_metadata(metadata, self.chain_address.as_ref())
    }
}

/// Copy `metadata`, adding `chain_address` when an address is given.
///
/// An existing `chain_address` entry is never overwritten. With empty
/// metadata and no address the result is empty.
pub fn ensure_chain_address_metadata(metadata: &Metadata, address: Option<&Address>) -> Metadata {
    let mut out = metadata.clone();
    if let Some(address) = address {
        out.entry(CHAIN_ADDRESS_METADATA_KEY.to_string())
            .or_insert_with(|| address.to_checksum(None));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use subnet_transport::recover_signer;

    const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    fn config() -> AgentConfig {
        AgentConfig::new("subnet-1", "agent-1", "localhost:8090").with_capability("compute")
    }

    #[test]
    fn test_derives_address_from_key() {
        let identity = AgentIdentity::from_config(&config().with_private_key(KEY)).unwrap();
        assert_eq!(identity.chain_address_string().as_deref(), Some(ADDRESS));
        assert!(identity.request_signer().is_some());
    }

    #[test]
    fn test_explicit_address_normalized() {
        let identity = AgentIdentity::from_config(
            &config().with_chain_address(ADDRESS.to_lowercase()),
        )
        .unwrap();
        assert_eq!(identity.chain_address_string().as_deref(), Some(ADDRESS));
        assert!(identity.signer().is_none());
    }

    #[test]
    fn test_mismatched_address_rejected() {
        let err = AgentIdentity::from_config(
            &config()
                .with_private_key(KEY)
                .with_chain_address("0x0000000000000000000000000000000000000001"),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::AddressMismatch));
    }

    #[test]
    fn test_sign_without_key() {
        let identity = AgentIdentity::from_config(&config()).unwrap();
        assert!(matches!(identity.sign(b"data"), Err(SigningError::NoSigner)));
    }

    #[test]
    fn test_sign_with_key() {
        let identity = AgentIdentity::from_config(&config().with_private_key(KEY)).unwrap();
        let signature = identity.sign(b"data").unwrap();
        assert_eq!(signature.len(), 65);
        assert_eq!(
            recover_signer(b"data", &signature).unwrap(),
            identity.chain_address().unwrap()
        );
    }

    #[test]
    fn test_ensure_chain_address_never_overwrites() {
        let address = Address::from_str(ADDRESS).unwrap();
        let mut metadata = Metadata::new();
        metadata.insert(CHAIN_ADDRESS_METADATA_KEY.into(), "0xcustom".into());

        let out = ensure_chain_address_metadata(&metadata, Some(&address));
        assert_eq!(out.get(CHAIN_ADDRESS_METADATA_KEY).unwrap(), "0xcustom");
    }

    #[test]
    fn test_ensure_chain_address_inserts_checksum() {
        let address = Address::from_str(&ADDRESS.to_lowercase()).unwrap();
        let mut metadata = Metadata::new();
        metadata.insert("bid_id".into(), "0x01".into());

        let out = ensure_chain_address_metadata(&metadata, Some(&address));
        assert_eq!(out.get(CHAIN_ADDRESS_METADATA_KEY).unwrap(), ADDRESS);
        assert_eq!(out.get("bid_id").unwrap(), "0x01");
        assert!(!metadata.contains_key(CHAIN_ADDRESS_METADATA_KEY));
    }

    #[test]
    fn test_ensure_chain_address_noop_when_empty() {
        let out = ensure_chain_address_metadata(&Metadata::new(), None);
        assert!(out.is_empty());
    }
}
