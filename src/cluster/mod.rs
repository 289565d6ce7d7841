//! Operator-visible cluster state
//!
//! [`ClusterState`] is owned by a single task. It folds active backend
//! changes from the monitor and traffic toggles from operators into one
//! [`ClusterSnapshot`], and re-publishes every toggle to the bridge runners.
//! Readers go through a [`ClusterStateHandle`], which never blocks on the
//! owning task to read.

use crate::core::{ActiveBackend, ActiveBackendReceiver, BackendSummary, TrafficEnabledSender};
use crate::error::{SwitchboardError, SwitchboardResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

/// Externally visible cluster state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSnapshot {
    pub active_backend: Option<BackendSummary>,
    pub traffic_enabled: bool,
    pub message: String,
    pub last_updated: DateTime<Utc>,
}

impl ClusterSnapshot {
    fn initial() -> Self {
        Self {
            active_backend: None,
            traffic_enabled: true,
            message: String::new(),
            last_updated: Utc::now(),
        }
    }
}

enum Command {
    SetTraffic {
        enabled: bool,
        message: String,
        ack: oneshot::Sender<ClusterSnapshot>,
    },
}

pub struct ClusterState {
    snapshot: ClusterSnapshot,
    traffic_subscribers: Vec<TrafficEnabledSender>,
    commands: mpsc::UnboundedReceiver<Command>,
    published: watch::Sender<ClusterSnapshot>,
}

/// Cheap, cloneable access to the cluster state
#[derive(Clone)]
pub struct ClusterStateHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<ClusterSnapshot>,
}

impl ClusterState {
    pub fn new() -> (Self, ClusterStateHandle) {
        let snapshot = ClusterSnapshot::initial();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (published_tx, published_rx) = watch::channel(snapshot.clone());

        let state = Self {
            snapshot,
            traffic_subscribers: Vec::new(),
            commands: commands_rx,
            published: published_tx,
        };
        let handle = ClusterStateHandle {
            commands: commands_tx,
            snapshot: published_rx,
        };
        (state, handle)
    }

    /// Add a queue that receives every traffic toggle.
    ///
    /// Must be called before [`run`](Self::run).
    pub fn register_traffic_enabled_chan(&mut self, subscriber: TrafficEnabledSender) {
        self.traffic_subscribers.push(subscriber);
    }

    /// Apply monitor and operator events until shutdown
    pub async fn run(
        mut self,
        mut active_backends: ActiveBackendReceiver,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                Some(command) = self.commands.recv() => self.apply(command),
                Some(active) = active_backends.recv() => self.set_active_backend(active),
                else => break,
            }
        }
        debug!("Cluster state stopped");
    }

    fn set_active_backend(&mut self, active: ActiveBackend) {
        self.snapshot.active_backend = active.as_ref().map(|backend| backend.summary());
        self.published.send_replace(self.snapshot.clone());
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::SetTraffic { enabled, message, ack } => {
                if enabled {
                    info!(message = %message, "Enabling traffic");
                } else {
                    info!(message = %message, "Disabling traffic");
                }

                self.snapshot.traffic_enabled = enabled;
                self.snapshot.message = message;
                self.snapshot.last_updated = Utc::now();

                self.traffic_subscribers
                    .retain(|subscriber| subscriber.send(enabled).is_ok());
                self.published.send_replace(self.snapshot.clone());

                // The caller may have given up waiting
                let _ = ack.send(self.snapshot.clone());
            }
        }
    }
}

impl ClusterStateHandle {
    /// Current snapshot, reflecting the most recently applied event
    pub fn as_json(&self) -> ClusterSnapshot {
        self.snapshot.borrow().clone()
    }

    pub async fn enable_traffic(&self, message: &str) -> SwitchboardResult<ClusterSnapshot> {
        self.set_traffic(true, message).await
    }

    /// Disable traffic. Does not validate `message`; that happens at the
    /// operator boundary.
    pub async fn disable_traffic(&self, message: &str) -> SwitchboardResult<ClusterSnapshot> {
        self.set_traffic(false, message).await
    }

    async fn set_traffic(
        &self,
        enabled: bool,
        message: &str,
    ) -> SwitchboardResult<ClusterSnapshot> {
        let (ack, applied) = oneshot::channel();
        self.commands
            .send(Command::SetTraffic {
                enabled,
                message: message.to_string(),
                ack,
            })
            .map_err(|_| SwitchboardError::internal("cluster state is not running"))?;

        applied
            .await
            .map_err(|_| SwitchboardError::internal("cluster state stopped before applying update"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;
    use crate::core::{Backend, Connector};
    use std::sync::Arc;
    use std::time::Duration;

    fn backend() -> Arc<Backend> {
        Arc::new(Backend::new(
            &BackendConfig {
                name: "mysql-0".to_string(),
                host: "10.0.0.10".to_string(),
                port: 3306,
                status_port: 9200,
                status_endpoint: "api/v1/status".to_string(),
            },
            Connector::default(),
        ))
    }

    struct Running {
        handle: ClusterStateHandle,
        active_tx: mpsc::UnboundedSender<ActiveBackend>,
        traffic_rx: mpsc::UnboundedReceiver<bool>,
        shutdown_tx: watch::Sender<bool>,
        task: tokio::task::JoinHandle<()>,
    }

    fn start() -> Running {
        let (mut state, handle) = ClusterState::new();
        let (traffic_tx, traffic_rx) = mpsc::unbounded_channel();
        state.register_traffic_enabled_chan(traffic_tx);
        let (active_tx, active_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(state.run(active_rx, shutdown_rx));
        Running {
            handle,
            active_tx,
            traffic_rx,
            shutdown_tx,
            task,
        }
    }

    #[tokio::test]
    async fn test_initial_snapshot() {
        let running = start();
        let snapshot = running.handle.as_json();
        assert!(snapshot.active_backend.is_none());
        assert!(snapshot.traffic_enabled);
        assert_eq!(snapshot.message, "");
    }

    #[tokio::test]
    async fn test_snapshot_json_shape() {
        let snapshot = ClusterSnapshot {
            active_backend: Some(backend().summary()),
            traffic_enabled: false,
            message: "maintenance".to_string(),
            last_updated: "2024-05-01T12:00:00Z".parse().unwrap(),
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "activeBackend": {"host": "10.0.0.10", "port": 3306, "name": "mysql-0"},
                "trafficEnabled": false,
                "message": "maintenance",
                "lastUpdated": "2024-05-01T12:00:00Z",
            })
        );

        let empty = ClusterSnapshot {
            active_backend: None,
            ..snapshot
        };
        assert!(serde_json::to_value(&empty).unwrap()["activeBackend"].is_null());
    }

    #[tokio::test]
    async fn test_traffic_toggles_are_recorded_and_republished() {
        let mut running = start();
        let before = running.handle.as_json().last_updated;

        let snapshot = running.handle.disable_traffic("galera upgrade").await.unwrap();
        assert!(!snapshot.traffic_enabled);
        assert_eq!(snapshot.message, "galera upgrade");
        assert!(snapshot.last_updated >= before);
        assert_eq!(running.handle.as_json(), snapshot);
        assert_eq!(running.traffic_rx.recv().await, Some(false));

        let snapshot = running.handle.enable_traffic("").await.unwrap();
        assert!(snapshot.traffic_enabled);
        assert_eq!(snapshot.message, "");
        assert_eq!(running.traffic_rx.recv().await, Some(true));
    }

    #[tokio::test]
    async fn test_tracks_active_backend() {
        let running = start();
        let backend = backend();

        running.active_tx.send(Some(Arc::clone(&backend))).unwrap();
        crate::testing::wait_until(|| {
            let handle = running.handle.clone();
            async move { handle.as_json().active_backend.is_some() }
        })
        .await;
        assert_eq!(running.handle.as_json().active_backend, Some(backend.summary()));

        running.active_tx.send(None).unwrap();
        crate::testing::wait_until(|| {
            let handle = running.handle.clone();
            async move { handle.as_json().active_backend.is_none() }
        })
        .await;
    }

    #[tokio::test]
    async fn test_updates_fail_after_shutdown() {
        let running = start();
        running.shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), running.task)
            .await
            .unwrap()
            .unwrap();

        let result = running.handle.enable_traffic("late").await;
        assert!(matches!(result, Err(SwitchboardError::Internal { .. })));
    }
}
