//! Operator boundary for reading and toggling cluster traffic
//!
//! Input is validated here, so a rejected update never reaches the
//! cluster state.

use crate::cluster::{ClusterSnapshot, ClusterStateHandle};
use crate::error::{ApiError, SwitchboardError, SwitchboardResult};
use async_trait::async_trait;
use tracing::{debug, warn};

/// What the operator boundary needs from the cluster state
#[async_trait]
pub trait ClusterManager: Send + Sync {
    fn as_json(&self) -> ClusterSnapshot;
    async fn enable_traffic(&self, message: &str) -> SwitchboardResult<ClusterSnapshot>;
    async fn disable_traffic(&self, message: &str) -> SwitchboardResult<ClusterSnapshot>;
}

#[async_trait]
impl ClusterManager for ClusterStateHandle {
    fn as_json(&self) -> ClusterSnapshot {
        ClusterStateHandle::as_json(self)
    }

    async fn enable_traffic(&self, message: &str) -> SwitchboardResult<ClusterSnapshot> {
        ClusterStateHandle::enable_traffic(self, message).await
    }

    async fn disable_traffic(&self, message: &str) -> SwitchboardResult<ClusterSnapshot> {
        ClusterStateHandle::disable_traffic(self, message).await
    }
}

/// A validated traffic toggle request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrafficUpdate {
    Enable { message: String },
    Disable { message: String },
}

/// Parse a boolean the way form values are usually parsed
fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

impl TrafficUpdate {
    /// Build an update from raw `trafficEnabled` and `message` form values.
    ///
    /// Disabling requires a non-empty message.
    pub fn parse(traffic_enabled: &str, message: Option<&str>) -> Result<Self, ApiError> {
        let enabled = parse_bool(traffic_enabled)
            .ok_or_else(|| ApiError::InvalidTrafficEnabled(traffic_enabled.to_string()))?;
        let message = message.unwrap_or_default().to_string();

        if enabled {
            Ok(TrafficUpdate::Enable { message })
        } else if message.is_empty() {
            Err(ApiError::MissingMessage)
        } else {
            Ok(TrafficUpdate::Disable { message })
        }
    }

    pub fn traffic_enabled(&self) -> bool {
        matches!(self, TrafficUpdate::Enable { .. })
    }
}

/// Library surface an HTTP layer would sit on
pub struct ClusterApi<M> {
    manager: M,
}

impl<M: ClusterManager> ClusterApi<M> {
    pub fn new(manager: M) -> Self {
        Self { manager }
    }

    pub fn snapshot(&self) -> ClusterSnapshot {
        self.manager.as_json()
    }

    /// Apply an already validated update
    pub async fn apply(&self, update: TrafficUpdate) -> SwitchboardResult<ClusterSnapshot> {
        debug!(update = ?update, "Applying cluster update");
        match update {
            TrafficUpdate::Enable { message } => self.manager.enable_traffic(&message).await,
            TrafficUpdate::Disable { message } => self.manager.disable_traffic(&message).await,
        }
    }

    /// Validate raw form values, then apply them.
    ///
    /// Rejected input leaves the cluster state untouched.
    pub async fn update(
        &self,
        traffic_enabled: &str,
        message: Option<&str>,
    ) -> SwitchboardResult<ClusterSnapshot> {
        let update = TrafficUpdate::parse(traffic_enabled, message).map_err(|e| {
            warn!(error = %e, traffic_enabled, "Rejected cluster update");
            SwitchboardError::Api(e)
        })?;
        self.apply(update).await
    }
}
