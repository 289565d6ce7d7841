//! Galera agent clients over plain HTTP and over TLS

use crate::config::GaleraAgentTlsConfig;
use crate::core::Backend;
use crate::error::HealthCheckError;
use crate::health::galera::NodeHealthSnapshot;
use crate::health::HealthChecker;
use async_trait::async_trait;
use fnv::FnvHashMap;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::debug;

/// GET `url` and decode the agent's JSON body
async fn fetch_snapshot(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<NodeHealthSnapshot, HealthCheckError> {
    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            HealthCheckError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }
        } else {
            HealthCheckError::Request {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        return Err(HealthCheckError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    response
        .json::<NodeHealthSnapshot>()
        .await
        .map_err(|e| HealthCheckError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })
}

/// Queries `http://host:status_port/endpoint`
pub struct PlainHealthChecker {
    client: reqwest::Client,
    timeout: Duration,
}

impl PlainHealthChecker {
    pub fn new(timeout: Duration) -> Result<Self, HealthCheckError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HealthCheckError::Client(e.to_string()))?;

        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl HealthChecker for PlainHealthChecker {
    async fn check(&self, backend: &Backend) -> Result<NodeHealthSnapshot, HealthCheckError> {
        let url = backend.healthcheck_url("http");
        fetch_snapshot(&self.client, &url, self.timeout).await
    }
}

/// Queries `https://host:status_port/endpoint`, trusting only the configured CA.
///
/// With a server name configured, each backend gets its own client that
/// resolves the server name to that backend's status address, so the
/// certificate is checked against the server name while the request
/// still reaches the right node. The status host is resolved on every
/// check and the pinned client rebuilt when its address moves.
pub struct TlsHealthChecker {
    ca: reqwest::Certificate,
    default_client: reqwest::Client,
    server_name: Option<String>,
    pinned_clients: Mutex<FnvHashMap<String, (SocketAddr, reqwest::Client)>>,
    timeout: Duration,
}

const PEM_CERTIFICATE_TAG: &str = "-----BEGIN CERTIFICATE-----";

fn tls_client_builder(ca: &reqwest::Certificate, timeout: Duration) -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .use_rustls_tls()
        .tls_built_in_root_certs(false)
        .add_root_certificate(ca.clone())
        .timeout(timeout)
}

impl TlsHealthChecker {
    pub fn new(tls: &GaleraAgentTlsConfig, timeout: Duration) -> Result<Self, HealthCheckError> {
        if !tls.ca.contains(PEM_CERTIFICATE_TAG) {
            return Err(HealthCheckError::Client(
                "invalid CA certificate: no PEM certificate found".to_string(),
            ));
        }
        let ca = reqwest::Certificate::from_pem(tls.ca.as_bytes())
            .map_err(|e| HealthCheckError::Client(format!("invalid CA certificate: {}", e)))?;

        let default_client = tls_client_builder(&ca, timeout)
            .build()
            .map_err(|e| HealthCheckError::Client(e.to_string()))?;

        let server_name = Some(tls.server_name.trim())
            .filter(|name| !name.is_empty())
            .map(str::to_string);

        Ok(Self {
            ca,
            default_client,
            server_name,
            pinned_clients: Mutex::new(FnvHashMap::default()),
            timeout,
        })
    }

    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    /// Client that sends `server_name` to the backend's current status address
    async fn pinned_client(
        &self,
        backend: &Backend,
        server_name: &str,
    ) -> Result<reqwest::Client, HealthCheckError> {
        let unresolved = |reason: String| HealthCheckError::Request {
            url: backend.healthcheck_url("https"),
            reason,
        };
        let addr = tokio::net::lookup_host((backend.host(), backend.status_port()))
            .await
            .map_err(|e| unresolved(format!("could not resolve {}: {}", backend.host(), e)))?
            .next()
            .ok_or_else(|| unresolved(format!("no address for {}", backend.host())))?;

        if let Some((pinned_addr, client)) = self.pinned_clients.lock().get(backend.name()) {
            if *pinned_addr == addr {
                return Ok(client.clone());
            }
        }

        let client = tls_client_builder(&self.ca, self.timeout)
            .resolve(server_name, addr)
            .build()
            .map_err(|e| HealthCheckError::Client(e.to_string()))?;
        debug!(
            backend = %backend.name(),
            server_name = %server_name,
            %addr,
            "Pinned TLS server name to backend"
        );
        self.pinned_clients
            .lock()
            .insert(backend.name().to_string(), (addr, client.clone()));
        Ok(client)
    }
}

#[async_trait]
impl HealthChecker for TlsHealthChecker {
    async fn check(&self, backend: &Backend) -> Result<NodeHealthSnapshot, HealthCheckError> {
        match &self.server_name {
            Some(server_name) => {
                let client = self.pinned_client(backend, server_name).await?;
                let url = backend.healthcheck_url_via("https", server_name);
                fetch_snapshot(&client, &url, self.timeout).await
            }
            None => {
                let url = backend.healthcheck_url("https");
                fetch_snapshot(&self.default_client, &url, self.timeout).await
            }
        }
    }
}
