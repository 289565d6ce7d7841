//! Periodic status line summarising sessions, health and failovers

use crate::cluster::ClusterStateHandle;
use crate::core::{backend_name, same_backend, ActiveBackend, ActiveBackendReceiver, Backend};
use crate::utils::format_duration;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::info;

/// Counts changes of active backend away from a live backend
#[derive(Debug, Default)]
pub struct FailoverTracker {
    active: ActiveBackend,
    last_failover_at: Option<DateTime<Utc>>,
    last_failover_from: Option<String>,
    failover_count: u64,
}

impl FailoverTracker {
    pub fn observe(&mut self, next: ActiveBackend) {
        if !same_backend(&self.active, &next) {
            if let Some(previous) = &self.active {
                self.last_failover_at = Some(Utc::now());
                self.last_failover_from = Some(previous.name().to_string());
                self.failover_count += 1;
            }
        }
        self.active = next;
    }

    pub fn failover_count(&self) -> u64 {
        self.failover_count
    }
}

/// One status line's worth of data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub total_sessions: usize,
    pub healthy_backends: usize,
    pub total_backends: usize,
    pub active_backend: String,
    pub traffic_enabled: bool,
    pub unhealthy_backends: Vec<String>,
    pub last_failover_at: Option<DateTime<Utc>>,
    pub last_failover_from: Option<String>,
    pub failover_count: u64,
}

impl StatusReport {
    pub fn collect(
        backends: &[Arc<Backend>],
        tracker: &FailoverTracker,
        traffic_enabled: bool,
    ) -> Self {
        let mut total_sessions = 0;
        let mut unhealthy_backends = Vec::new();

        for backend in backends {
            let json = backend.as_json();
            total_sessions += json.current_session_count;
            if !json.healthy {
                unhealthy_backends.push(json.name);
            }
        }

        Self {
            total_sessions,
            healthy_backends: backends.len() - unhealthy_backends.len(),
            total_backends: backends.len(),
            active_backend: backend_name(&tracker.active).to_string(),
            traffic_enabled,
            unhealthy_backends,
            last_failover_at: tracker.last_failover_at,
            last_failover_from: tracker.last_failover_from.clone(),
            failover_count: tracker.failover_count,
        }
    }

    fn log(&self) {
        let unhealthy = self.unhealthy_backends.join(",");
        match (&self.last_failover_at, &self.last_failover_from) {
            (Some(at), Some(from)) => info!(
                total_sessions = self.total_sessions,
                healthy_backends = self.healthy_backends,
                total_backends = self.total_backends,
                active_backend = %self.active_backend,
                traffic_enabled = self.traffic_enabled,
                unhealthy_backends = %unhealthy,
                last_failover_time = %at.to_rfc3339(),
                last_failover_from = %from,
                failover_count = self.failover_count,
                "Proxy status"
            ),
            _ => info!(
                total_sessions = self.total_sessions,
                healthy_backends = self.healthy_backends,
                total_backends = self.total_backends,
                active_backend = %self.active_backend,
                traffic_enabled = self.traffic_enabled,
                unhealthy_backends = %unhealthy,
                "Proxy status"
            ),
        }
    }
}

pub struct StatusLogger {
    backends: Vec<Arc<Backend>>,
    cluster: ClusterStateHandle,
    interval: Duration,
    active_backends: ActiveBackendReceiver,
}

impl StatusLogger {
    /// `active_backends` should be subscribed to the primary monitor
    pub fn new(
        backends: Vec<Arc<Backend>>,
        cluster: ClusterStateHandle,
        interval: Duration,
        active_backends: ActiveBackendReceiver,
    ) -> Self {
        Self {
            backends,
            cluster,
            interval,
            active_backends,
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval = %format_duration(self.interval),
            backend_count = self.backends.len(),
            "Status logger starting"
        );

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tracker = FailoverTracker::default();

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                Some(active) = self.active_backends.recv() => tracker.observe(active),
                _ = ticker.tick() => {
                    let traffic_enabled = self.cluster.as_json().traffic_enabled;
                    StatusReport::collect(&self.backends, &tracker, traffic_enabled).log();
                }
            }
        }

        info!("Status logger stopped");
    }
}
