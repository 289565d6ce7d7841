//! A single cluster node and the client sessions routed to it

use crate::config::BackendConfig;
use crate::core::connection::{splice, Connector, SpliceOutcome};
use crate::core::session::{Session, SessionRegistry};
use crate::core::TrafficClass;
use crate::error::BridgeError;
use crate::utils::{format_bytes, format_duration};
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Introspection view of a backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendJson {
    pub host: String,
    pub port: u16,
    pub status_port: u16,
    pub healthy: bool,
    pub name: String,
    #[serde(rename = "currentSessionCount")]
    pub current_session_count: usize,
}

/// Identity of a backend as shown in the cluster snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendSummary {
    pub host: String,
    pub port: u16,
    pub name: String,
}

/// One cluster node.
///
/// A backend never decides where traffic goes. It bridges the connections
/// it is handed and severs them when told to.
pub struct Backend {
    name: String,
    host: String,
    port: u16,
    status_port: u16,
    status_endpoint: String,
    healthy: AtomicBool,
    primary_sessions: SessionRegistry,
    inactive_sessions: SessionRegistry,
    connector: Connector,
}

impl Backend {
    pub fn new(config: &BackendConfig, connector: Connector) -> Self {
        Self {
            name: config.name.clone(),
            host: config.host.clone(),
            port: config.port,
            status_port: config.status_port,
            status_endpoint: config.status_endpoint.clone(),
            healthy: AtomicBool::new(false),
            primary_sessions: SessionRegistry::new(),
            inactive_sessions: SessionRegistry::new(),
            connector,
        }
    }

    /// Build one backend per configured node, keeping configuration order
    pub fn from_configs(configs: &[BackendConfig], connector: &Connector) -> Vec<Arc<Backend>> {
        configs
            .iter()
            .map(|config| Arc::new(Backend::new(config, connector.clone())))
            .collect()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn status_port(&self) -> u16 {
        self.status_port
    }

    pub fn status_endpoint(&self) -> &str {
        &self.status_endpoint
    }

    /// URL of this node's galera agent status endpoint
    pub fn healthcheck_url(&self, scheme: &str) -> String {
        self.healthcheck_url_via(scheme, &self.host)
    }

    /// Status endpoint URL addressed through another host name, e.g. a TLS server name
    pub fn healthcheck_url_via(&self, scheme: &str, host: &str) -> String {
        format!(
            "{}://{}:{}/{}",
            scheme,
            host,
            self.status_port,
            self.status_endpoint.trim_start_matches('/')
        )
    }

    /// Last verdict recorded by the active monitor
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Record a health verdict; returns true if it changed
    pub fn set_healthy(&self, healthy: bool) -> bool {
        let previous = self.healthy.swap(healthy, Ordering::AcqRel);
        if previous != healthy {
            if healthy {
                info!(backend = %self, "Previously unhealthy backend became healthy");
            } else {
                info!(backend = %self, "Previously healthy backend became unhealthy");
            }
        }
        previous != healthy
    }

    fn registry(&self, class: TrafficClass) -> &SessionRegistry {
        match class {
            TrafficClass::Primary => &self.primary_sessions,
            TrafficClass::Inactive => &self.inactive_sessions,
        }
    }

    /// Live sessions across both routers
    pub fn session_count(&self) -> usize {
        self.primary_sessions.len() + self.inactive_sessions.len()
    }

    pub fn class_session_count(&self, class: TrafficClass) -> usize {
        self.registry(class).len()
    }

    /// Register a session for a client before it is bridged.
    ///
    /// A session registered here is covered by any later sever of its
    /// class, even if its task has not started dialing yet.
    pub fn open_session(&self, class: TrafficClass, client_addr: SocketAddr) -> Session {
        self.registry(class).open(client_addr)
    }

    /// Bridge a primary client connection to this node until either side closes
    pub async fn bridge(&self, client: TcpStream) -> Result<(), BridgeError> {
        let client_addr = client.peer_addr()?;
        let session = self.open_session(TrafficClass::Primary, client_addr);
        self.bridge_session(session, client).await
    }

    /// Bridge a client whose session was already registered
    pub async fn bridge_session(
        &self,
        mut session: Session,
        mut client: TcpStream,
    ) -> Result<(), BridgeError> {
        let client_addr = session.client_addr();

        let dialed = tokio::select! {
            biased;
            _ = &mut session.sever => None,
            result = self.connector.connect(&self.host, self.port) => Some(result),
        };

        let mut upstream = match dialed {
            Some(Ok(upstream)) => upstream,
            Some(Err(e)) => {
                drop(client);
                drop(session);
                return Err(e);
            }
            None => {
                debug!(
                    backend = %self.name,
                    client = %client_addr,
                    "Session severed before upstream connection"
                );
                drop(client);
                drop(session);
                return Ok(());
            }
        };

        if let Err(e) = self.connector.configure_stream(&client) {
            warn!(client = %client_addr, error = %e, "Failed to configure client stream");
        }

        debug!(
            backend = %self.name,
            client = %client_addr,
            session = session.id(),
            "Bridging client to backend"
        );

        let outcome = splice(&mut client, &mut upstream, &mut session.sever).await;

        // Sockets go before the session guard so a waiting sever sees them closed
        drop(client);
        drop(upstream);
        drop(session);

        match outcome {
            SpliceOutcome::Completed(stats) => {
                info!(
                    backend = %self.name,
                    client = %client_addr,
                    duration =
                        %format_duration(Duration::from_millis(stats.connection_duration_ms)),
                    to_backend = %format_bytes(stats.bytes_client_to_backend),
                    to_client = %format_bytes(stats.bytes_backend_to_client),
                    "Connection closed"
                );
                Ok(())
            }
            SpliceOutcome::Severed => {
                debug!(backend = %self.name, client = %client_addr, "Connection severed");
                Ok(())
            }
            SpliceOutcome::Failed(e) => Err(BridgeError::Io(e)),
        }
    }

    /// Forcibly close every live session on this node.
    ///
    /// Does not wait for in-flight queries; it only waits for the session
    /// tasks to drop their sockets.
    pub async fn sever_connections(&self) {
        let primary = self.primary_sessions.sever_all();
        let inactive = self.inactive_sessions.sever_all();
        info!(
            backend = %self,
            severed = primary.len() + inactive.len(),
            "Severing all connections to backend"
        );
        futures::join!(primary.closed(), inactive.closed());
    }

    /// Forcibly close the live sessions that arrived through one router
    pub async fn sever_class_connections(&self, class: TrafficClass) {
        let severed = self.registry(class).sever_all();
        info!(
            backend = %self,
            class = %class,
            severed = severed.len(),
            "Severing connections to backend"
        );
        severed.closed().await;
    }

    pub fn as_json(&self) -> BackendJson {
        BackendJson {
            host: self.host.clone(),
            port: self.port,
            status_port: self.status_port,
            healthy: self.is_healthy(),
            name: self.name.clone(),
            current_session_count: self.session_count(),
        }
    }

    pub fn summary(&self) -> BackendSummary {
        BackendSummary {
            host: self.host.clone(),
            port: self.port,
            name: self.name.clone(),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.name, self.host, self.port)
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("status_port", &self.status_port)
            .field("healthy", &self.is_healthy())
            .field("sessions", &self.session_count())
            .finish()
    }
}
