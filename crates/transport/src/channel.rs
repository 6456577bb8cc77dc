//! Channel construction shared by the matcher and validator clients.

use std::path::PathBuf;
use std::time::Duration;

use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};
use tracing::debug;

use crate::error::{TransportError, TransportResult};
use crate::signing::RequestSigner;

/// Default connection timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// TLS settings for a client channel.
#[derive(Debug, Clone, Default)]
pub struct TlsSettings {
    /// PEM file with an extra trusted CA; native roots are always trusted.
    pub ca_cert_path: Option<PathBuf>,
    /// Server name to verify, when it differs from the endpoint host.
    pub domain: Option<String>,
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Target address, `host:port` or a full URI.
    pub endpoint: String,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// TLS settings; plaintext when `None`.
    pub tls: Option<TlsSettings>,
    /// Signs every call when set.
    pub signer: Option<RequestSigner>,
}

impl ClientConfig {
    /// Plaintext, unsigned configuration for `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            tls: None,
            signer: None,
        }
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Enable TLS.
    pub fn with_tls(mut self, tls: TlsSettings) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Sign every call with `signer`.
    pub fn with_signer(mut self, signer: RequestSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Endpoint as a URI, adding a scheme when missing.
    pub fn uri(&self) -> String {
        let endpoint = self.endpoint.trim();
        if endpoint.contains("://") {
            endpoint.to_string()
        } else if self.tls.is_some() {
            format!("https://{endpoint}")
        } else {
            format!("http://{endpoint}")
        }
    }
}

/// Build a lazily connecting channel.
///
/// No I/O happens here; connection failures surface on the first call, so
/// callers see them through the same path as any other RPC error.
pub fn connect_lazy(config: &ClientConfig) -> TransportResult<Channel> {
    let uri = config.uri();
    let mut endpoint =
        Endpoint::from_shared(uri.clone()).map_err(|e| TransportError::InvalidEndpoint {
            endpoint: config.endpoint.clone(),
            reason: e.to_string(),
        })?;
    endpoint = endpoint.connect_timeout(config.connect_timeout);

    if let Some(tls) = &config.tls {
        endpoint = endpoint.tls_config(tls_config(tls)?)?;
    }

    debug!(endpoint = %uri, tls = config.tls.is_some(), "Created lazy channel");
    Ok(endpoint.connect_lazy())
}

fn tls_config(settings: &TlsSettings) -> TransportResult<ClientTlsConfig> {
    let mut tls = ClientTlsConfig::new().with_native_roots();
    if let Some(path) = &settings.ca_cert_path {
        let pem = std::fs::read(path)
            .map_err(|e| TransportError::Tls(format!("{}: {e}", path.display())))?;
        tls = tls.ca_certificate(Certificate::from_pem(pem));
    }
    if let Some(domain) = &settings.domain {
        tls = tls.domain_name(domain.clone());
    }
    Ok(tls)
}
