//! Health polling and active backend selection
//!
//! A [`ClusterMonitor`] polls every backend's galera agent once per
//! interval, decides which node should receive traffic and publishes the
//! decision to its subscribers only when it changes. The active selection
//! is the first healthy node in configuration order. When an inactive
//! router is subscribed, the same poll also yields the inactive selection:
//! the first healthy node the active selection is not using.

use crate::config::ProxyConfig;
use crate::core::{
    backend_name, same_backend, ActiveBackend, ActiveBackendSender, Backend, TrafficClass,
};
use crate::error::HealthCheckError;
use crate::health::{HealthChecker, HealthPolicy, NodeHealthSnapshot};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info};

/// Consecutive health check failures are logged on the first and then every Nth
const FAILURE_LOG_EVERY: u64 = 5;

/// Polling parameters shared by both monitors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub policy: HealthPolicy,
    pub poll_interval: Duration,
    pub healthcheck_timeout: Duration,
}

impl MonitorSettings {
    pub fn from_config(proxy: &ProxyConfig) -> Self {
        Self {
            policy: HealthPolicy::new(proxy.available_when_donor, proxy.available_when_read_only),
            poll_interval: proxy.poll_interval(),
            healthcheck_timeout: proxy.healthcheck_timeout(),
        }
    }
}

/// First healthy backend in configuration order
pub fn choose_active(backends: &[Arc<Backend>], healthy: &[bool]) -> ActiveBackend {
    backends
        .iter()
        .zip(healthy)
        .find(|(_, healthy)| **healthy)
        .map(|(backend, _)| Arc::clone(backend))
}

/// First healthy backend in configuration order that is not `primary`
pub fn choose_inactive(
    backends: &[Arc<Backend>],
    healthy: &[bool],
    primary: &ActiveBackend,
) -> ActiveBackend {
    backends
        .iter()
        .zip(healthy)
        .filter(|(_, healthy)| **healthy)
        .map(|(backend, _)| backend)
        .find(|backend| primary.as_ref().map_or(true, |p| !Arc::ptr_eq(backend, p)))
        .map(Arc::clone)
}

fn should_log_failure(consecutive_failures: u64) -> bool {
    consecutive_failures % FAILURE_LOG_EVERY == 1
}

fn log_selection(class: TrafficClass, chosen: &ActiveBackend, previous: &ActiveBackend) {
    match chosen {
        Some(backend) => {
            info!(monitor = %class, backend = ?backend.as_json(), "New active backend")
        }
        None => info!(
            monitor = %class,
            previous = backend_name(previous),
            "No healthy backend available"
        ),
    }
}

/// Send a selection to every queue, forgetting the closed ones
fn publish(subscribers: &mut Vec<ActiveBackendSender>, selection: &ActiveBackend) {
    subscribers.retain(|subscriber| subscriber.send(selection.clone()).is_ok());
}

pub struct ClusterMonitor {
    backends: Vec<Arc<Backend>>,
    checker: Arc<dyn HealthChecker>,
    settings: MonitorSettings,
    subscribers: Vec<ActiveBackendSender>,
    inactive_subscribers: Vec<ActiveBackendSender>,
    consecutive_failures: Vec<u64>,
}

impl ClusterMonitor {
    pub fn new(
        backends: Vec<Arc<Backend>>,
        checker: Arc<dyn HealthChecker>,
        settings: MonitorSettings,
    ) -> Self {
        let consecutive_failures = vec![0; backends.len()];
        Self {
            backends,
            checker,
            settings,
            subscribers: Vec::new(),
            inactive_subscribers: Vec::new(),
            consecutive_failures,
        }
    }

    /// Add a queue that receives every change of the active selection.
    ///
    /// Must be called before [`run`](Self::run).
    pub fn register_backend_subscriber(&mut self, subscriber: ActiveBackendSender) {
        self.subscribers.push(subscriber);
    }

    /// Add a queue that receives every change of the inactive selection.
    ///
    /// The inactive selection is only computed while such a queue exists.
    /// It is taken from the same poll as the active one, so the two never
    /// name the same backend.
    pub fn register_inactive_backend_subscriber(&mut self, subscriber: ActiveBackendSender) {
        self.inactive_subscribers.push(subscriber);
    }

    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    /// Poll until shutdown is signalled
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut active: ActiveBackend = None;
        let mut inactive: ActiveBackend = None;

        info!(
            backends = self.backends.len(),
            inactive = !self.inactive_subscribers.is_empty(),
            interval_ms = self.settings.poll_interval.as_millis() as u64,
            "Cluster monitor started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }

            let healthy = self.poll().await;

            let chosen = choose_active(&self.backends, &healthy);
            if !same_backend(&chosen, &active) {
                log_selection(TrafficClass::Primary, &chosen, &active);
                active = chosen;
                publish(&mut self.subscribers, &active);
            }

            if !self.inactive_subscribers.is_empty() {
                let chosen = choose_inactive(&self.backends, &healthy, &active);
                if !same_backend(&chosen, &inactive) {
                    log_selection(TrafficClass::Inactive, &chosen, &inactive);
                    inactive = chosen;
                    publish(&mut self.inactive_subscribers, &inactive);
                }
            }
        }

        info!("Cluster monitor stopped");
    }

    /// Query every backend concurrently and evaluate each against the policy
    async fn poll(&mut self) -> Vec<bool> {
        let checker = &self.checker;
        let limit = self.settings.healthcheck_timeout;

        let results: Vec<Result<NodeHealthSnapshot, HealthCheckError>> =
            join_all(self.backends.iter().map(|backend| async move {
                match timeout(limit, checker.check(backend)).await {
                    Ok(result) => result,
                    Err(_) => Err(HealthCheckError::Timeout {
                        timeout_ms: limit.as_millis() as u64,
                    }),
                }
            }))
            .await;

        let mut healthy = Vec::with_capacity(results.len());
        for (index, result) in results.into_iter().enumerate() {
            healthy.push(self.record(index, result));
        }
        healthy
    }

    fn record(
        &mut self,
        index: usize,
        result: Result<NodeHealthSnapshot, HealthCheckError>,
    ) -> bool {
        let backend = &self.backends[index];
        let verdict = match &result {
            Ok(snapshot) => self.settings.policy.evaluate(snapshot),
            Err(_) => false,
        };

        if verdict {
            self.consecutive_failures[index] = 0;
            debug!(backend = %backend.name(), "Healthcheck succeeded");
        } else {
            self.consecutive_failures[index] += 1;
            let failures = self.consecutive_failures[index];
            if should_log_failure(failures) {
                match &result {
                    Ok(snapshot) => error!(
                        backend = %backend,
                        consecutive_failures = failures,
                        state = %snapshot.local_state,
                        read_only = snapshot.read_only,
                        maintenance = snapshot.maintenance_enabled,
                        "Healthcheck failed on backend: backend reported as unhealthy"
                    ),
                    Err(e) => error!(
                        backend = %backend,
                        consecutive_failures = failures,
                        error = %e,
                        "Healthcheck failed on backend"
                    ),
                }
            }
        }

        backend.set_healthy(verdict);
        verdict
    }
}
