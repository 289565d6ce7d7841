//! Core abstractions: backends, their session registries, and the upstream connector

pub mod backend;
pub mod connection;
pub mod session;

pub use backend::{Backend, BackendJson, BackendSummary};
pub use connection::{ConnectionStats, Connector};
pub use session::{Session, SessionRegistry};

use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Which router a client arrived through.
///
/// Each backend keeps a separate session registry per class, so the
/// inactive router moving off a node never severs primary sessions there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrafficClass {
    Primary,
    Inactive,
}

impl TrafficClass {
    pub fn label(self) -> &'static str {
        match self {
            TrafficClass::Primary => "active",
            TrafficClass::Inactive => "inactive",
        }
    }
}

impl fmt::Display for TrafficClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Selection published by a cluster monitor; `None` means no node is eligible
pub type ActiveBackend = Option<Arc<Backend>>;

/// Queue a monitor publishes active backend changes into
pub type ActiveBackendSender = mpsc::UnboundedSender<ActiveBackend>;
pub type ActiveBackendReceiver = mpsc::UnboundedReceiver<ActiveBackend>;

/// Queue the cluster state publishes traffic toggles into
pub type TrafficEnabledSender = mpsc::UnboundedSender<bool>;
pub type TrafficEnabledReceiver = mpsc::UnboundedReceiver<bool>;

/// Identity comparison of two selections
pub fn same_backend(a: &ActiveBackend, b: &ActiveBackend) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// Display helper for log fields
pub fn backend_name(backend: &ActiveBackend) -> &str {
    backend.as_ref().map(|b| b.name()).unwrap_or("none")
}
