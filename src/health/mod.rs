/// Health checking against each node's galera agent
pub mod galera;
pub mod http;

pub use galera::{HealthPolicy, NodeHealthSnapshot, WsrepLocalState, INVALID_INDEX};
pub use http::{PlainHealthChecker, TlsHealthChecker};

use crate::config::Config;
use crate::core::Backend;
use crate::error::HealthCheckError;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Source of node health snapshots
#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// Query the node's agent once
    async fn check(&self, backend: &Backend) -> Result<NodeHealthSnapshot, HealthCheckError>;
}

/// Pick the plain or TLS checker from configuration.
///
/// Fails if the TLS client cannot be built, which is fatal at startup.
pub fn checker_from_config(config: &Config) -> Result<Arc<dyn HealthChecker>, HealthCheckError> {
    let timeout = config.proxy.healthcheck_timeout();

    if config.galera_agent_tls.enabled {
        let checker = TlsHealthChecker::new(&config.galera_agent_tls, timeout)?;
        info!(server_name = ?checker.server_name(), "Using TLS for galera agent health checks");
        Ok(Arc::new(checker))
    } else {
        Ok(Arc::new(PlainHealthChecker::new(timeout)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Connector;
    use crate::testing::{backend_config, plaintext_http_server, FakeAgent, TEST_CA_PEM};

    #[tokio::test]
    async fn test_checker_from_config_uses_plain_http_by_default() {
        let agent = FakeAgent::start().await;
        agent.respond(200, r#"{"wsrep_local_index":1,"wsrep_local_state":2}"#);

        let mut config = Config::default();
        config.proxy.backends = vec![backend_config("mysql-0", 3306, agent.port())];
        let backends = Backend::from_configs(&config.proxy.backends, &Connector::default());

        let checker = checker_from_config(&config).unwrap();
        let snapshot = checker.check(&backends[0]).await.unwrap();
        assert_eq!(snapshot.local_index, 1);
        assert_eq!(snapshot.local_state, WsrepLocalState::DonorDesynced);
        assert!(agent.requests() >= 1);
    }

    #[tokio::test]
    async fn test_checker_from_config_uses_tls_when_enabled() {
        let port = plaintext_http_server().await;
        let mut config = Config::default();
        config.proxy.backends = vec![backend_config("mysql-0", 3306, port)];
        config.galera_agent_tls.enabled = true;
        config.galera_agent_tls.ca = TEST_CA_PEM.to_string();
        let backends = Backend::from_configs(&config.proxy.backends, &Connector::default());

        let checker = checker_from_config(&config).unwrap();
        match checker.check(&backends[0]).await {
            Err(HealthCheckError::Request { url, .. }) => assert!(url.starts_with("https://")),
            other => panic!("expected a TLS request error, got {:?}", other),
        }
    }

    #[test]
    fn test_checker_from_config_rejects_bad_ca() {
        let mut config = Config::default();
        config.galera_agent_tls.enabled = true;
        config.galera_agent_tls.ca = "-----BEGIN NOTHING-----".to_string();

        assert!(matches!(checker_from_config(&config), Err(HealthCheckError::Client(_))));
    }
}
