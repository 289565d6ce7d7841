pub mod api;
pub mod bridge;
pub mod cluster;
pub mod config;
/// Switchboard - connection router for Galera clusters
///
/// Clients connect to one TCP port and are spliced onto a single healthy
/// cluster node. Node health comes from each node's galera agent; when the
/// chosen node stops being eligible, every session on it is severed so
/// clients reconnect to the next one. Operators can take the whole router
/// out of service with a traffic toggle.
pub mod core;
pub mod error;
pub mod health;
pub mod monitor;
pub mod status;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

use crate::api::ClusterApi;
use crate::bridge::BridgeRunner;
use crate::cluster::{ClusterState, ClusterStateHandle};
use crate::config::Config;
use crate::core::{Backend, Connector, TrafficClass};
use crate::error::SwitchboardResult;
use crate::health::HealthChecker;
use crate::monitor::{ClusterMonitor, MonitorSettings};
use crate::status::StatusLogger;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// A configured router that has not bound any sockets yet
pub struct Switchboard {
    config: Config,
    backends: Vec<Arc<Backend>>,
    checker: Arc<dyn HealthChecker>,
}

impl Switchboard {
    /// Validate configuration and build backends plus the health checker
    pub fn new(config: Config) -> SwitchboardResult<Self> {
        config.validate()?;
        let backends = Self::build_backends(&config);
        let checker = health::checker_from_config(&config)?;
        Ok(Self {
            config,
            backends,
            checker,
        })
    }

    /// Like [`new`](Self::new) but with a caller supplied health checker
    pub fn with_checker(
        config: Config,
        checker: Arc<dyn HealthChecker>,
    ) -> SwitchboardResult<Self> {
        config.validate()?;
        let backends = Self::build_backends(&config);
        Ok(Self {
            config,
            backends,
            checker,
        })
    }

    fn build_backends(config: &Config) -> Vec<Arc<Backend>> {
        let connector = Connector::new(config.proxy.dial_timeout());
        Backend::from_configs(&config.proxy.backends, &connector)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    /// Bind every listener and start all tasks.
    ///
    /// Bind failures are returned before anything is spawned.
    pub async fn start(
        self,
        shutdown: watch::Receiver<bool>,
    ) -> SwitchboardResult<RunningSwitchboard> {
        let proxy = BridgeRunner::bind(
            TrafficClass::Primary,
            &self.config.proxy_listen_addr(),
            self.config.proxy.shutdown_delay(),
        )
        .await?;

        let inactive = match self.config.inactive_listen_addr() {
            Some(addr) => {
                Some(BridgeRunner::bind(TrafficClass::Inactive, &addr, Duration::ZERO).await?)
            }
            None => None,
        };

        let (mut state, cluster) = ClusterState::new();
        let settings = MonitorSettings::from_config(&self.config.proxy);
        let mut monitor =
            ClusterMonitor::new(self.backends.clone(), Arc::clone(&self.checker), settings);

        monitor.register_backend_subscriber(proxy.active_backend_sender());
        state.register_traffic_enabled_chan(proxy.traffic_enabled_sender());

        let (state_tx, state_rx) = mpsc::unbounded_channel();
        monitor.register_backend_subscriber(state_tx);

        let status_logger = self.config.proxy.status_log_interval().map(|interval| {
            let (tx, rx) = mpsc::unbounded_channel();
            monitor.register_backend_subscriber(tx);
            StatusLogger::new(self.backends.clone(), cluster.clone(), interval, rx)
        });

        if let Some(runner) = &inactive {
            monitor.register_inactive_backend_subscriber(runner.active_backend_sender());
            state.register_traffic_enabled_chan(runner.traffic_enabled_sender());
        }

        let proxy_addr = proxy.local_addr();
        let inactive_addr = inactive.as_ref().map(BridgeRunner::local_addr);

        let mut tasks = vec![
            tokio::spawn(proxy.run(shutdown.clone())),
            tokio::spawn(state.run(state_rx, shutdown.clone())),
            tokio::spawn(monitor.run(shutdown.clone())),
        ];
        if let Some(runner) = inactive {
            tasks.push(tokio::spawn(runner.run(shutdown.clone())));
        }
        if let Some(status_logger) = status_logger {
            tasks.push(tokio::spawn(status_logger.run(shutdown.clone())));
        }

        info!(
            proxy = %proxy_addr,
            inactive = ?inactive_addr,
            backends = self.backends.len(),
            tls = self.config.galera_agent_tls.enabled,
            "Switchboard started"
        );

        Ok(RunningSwitchboard {
            proxy_addr,
            inactive_addr,
            backends: self.backends,
            api: ClusterApi::new(cluster.clone()),
            cluster,
            tasks,
        })
    }
}

/// Handle to a started router
pub struct RunningSwitchboard {
    proxy_addr: SocketAddr,
    inactive_addr: Option<SocketAddr>,
    backends: Vec<Arc<Backend>>,
    api: ClusterApi<ClusterStateHandle>,
    cluster: ClusterStateHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningSwitchboard {
    pub fn proxy_addr(&self) -> SocketAddr {
        self.proxy_addr
    }

    pub fn inactive_addr(&self) -> Option<SocketAddr> {
        self.inactive_addr
    }

    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    /// Operator surface for the traffic toggle
    pub fn api(&self) -> &ClusterApi<ClusterStateHandle> {
        &self.api
    }

    pub fn cluster(&self) -> ClusterStateHandle {
        self.cluster.clone()
    }

    /// Wait for every task to finish after shutdown has been signalled
    pub async fn wait(self) {
        for result in futures::future::join_all(self.tasks).await {
            if let Err(e) = result {
                error!(error = %e, "Switchboard task failed");
            }
        }
        info!("Switchboard stopped");
    }
}
