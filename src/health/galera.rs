//! Galera node state as reported by the galera agent

use serde::{Deserialize, Serialize};
use std::fmt;

/// `wsrep_local_index` reported by a node that is not a cluster member
pub const INVALID_INDEX: u64 = u64::MAX;

/// `wsrep_local_state` of a Galera node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u64", into = "u64")]
pub enum WsrepLocalState {
    Joining,
    DonorDesynced,
    Joined,
    Synced,
    Unrecognized(u64),
}

impl From<u64> for WsrepLocalState {
    fn from(value: u64) -> Self {
        match value {
            1 => WsrepLocalState::Joining,
            2 => WsrepLocalState::DonorDesynced,
            3 => WsrepLocalState::Joined,
            4 => WsrepLocalState::Synced,
            other => WsrepLocalState::Unrecognized(other),
        }
    }
}

impl From<WsrepLocalState> for u64 {
    fn from(state: WsrepLocalState) -> Self {
        match state {
            WsrepLocalState::Joining => 1,
            WsrepLocalState::DonorDesynced => 2,
            WsrepLocalState::Joined => 3,
            WsrepLocalState::Synced => 4,
            WsrepLocalState::Unrecognized(n) => n,
        }
    }
}

impl Default for WsrepLocalState {
    fn default() -> Self {
        WsrepLocalState::Unrecognized(0)
    }
}

impl fmt::Display for WsrepLocalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WsrepLocalState::Joining => write!(f, "Joining"),
            WsrepLocalState::DonorDesynced => write!(f, "Donor/Desynced"),
            WsrepLocalState::Joined => write!(f, "Joined"),
            WsrepLocalState::Synced => write!(f, "Synced"),
            WsrepLocalState::Unrecognized(n) => write!(f, "Unrecognized state: {}", n),
        }
    }
}

/// Which otherwise-degraded nodes may still take traffic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthPolicy {
    pub available_when_donor: bool,
    pub available_when_read_only: bool,
}

impl HealthPolicy {
    pub fn new(available_when_donor: bool, available_when_read_only: bool) -> Self {
        Self {
            available_when_donor,
            available_when_read_only,
        }
    }

    pub fn evaluate(&self, snapshot: &NodeHealthSnapshot) -> bool {
        snapshot.is_healthy(self.available_when_donor, self.available_when_read_only)
    }
}

/// One poll's view of a node, decoded from the agent's JSON body.
/// Absent fields decode as zero/false.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeHealthSnapshot {
    #[serde(rename = "wsrep_local_index")]
    pub local_index: u64,
    #[serde(rename = "wsrep_local_state")]
    pub local_state: WsrepLocalState,
    pub read_only: bool,
    pub maintenance_enabled: bool,
}

impl NodeHealthSnapshot {
    /// Stand-in for a node whose agent could not be queried
    pub fn unreachable() -> Self {
        Self {
            local_index: INVALID_INDEX,
            ..Self::default()
        }
    }

    pub fn is_healthy(&self, available_when_donor: bool, available_when_read_only: bool) -> bool {
        if self.local_index == INVALID_INDEX || self.maintenance_enabled {
            return false;
        }
        if self.read_only && !available_when_read_only {
            return false;
        }
        match self.local_state {
            WsrepLocalState::Synced => true,
            WsrepLocalState::DonorDesynced => available_when_donor,
            _ => false,
        }
    }
}
