//! Unified error handling for the switchboard router
//!
//! Per-connection and per-poll errors are absorbed where they happen and
//! only logged; the types here exist so that those log lines carry a precise
//! cause, and so that startup failures (bad config, unbindable listener)
//! can be reported before the process exits.

use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Main error type for switchboard operations
#[derive(Debug, Error)]
pub enum SwitchboardError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Data-plane bridging errors
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    /// Health check errors
    #[error("Health check failed: {0}")]
    HealthCheck(#[from] HealthCheckError),

    /// Operator input errors
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Internal errors (should not happen in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Errors raised while querying a node's galera agent
#[derive(Debug, Error)]
pub enum HealthCheckError {
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("could not decode response from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("health check timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("could not build health check client: {0}")]
    Client(String),
}

/// Errors raised while splicing a client onto an upstream node
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("error establishing connection to backend {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("timed out after {timeout:?} connecting to backend {addr}")]
    DialTimeout { addr: String, timeout: Duration },

    #[error("I/O error while bridging: {0}")]
    Io(#[from] io::Error),

    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
}

/// Errors raised at the operator boundary, before any state changes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("message must not be empty")]
    MissingMessage,

    #[error("failed to parse trafficEnabled: {0:?}")]
    InvalidTrafficEnabled(String),
}

/// Result type alias for switchboard operations
pub type SwitchboardResult<T> = Result<T, SwitchboardError>;

impl SwitchboardError {
    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        SwitchboardError::Internal {
            message: message.into(),
        }
    }

    /// Whether the router keeps running normally after this error
    pub fn is_recoverable(&self) -> bool {
        match self {
            SwitchboardError::HealthCheck(HealthCheckError::Client(_)) => false,
            SwitchboardError::HealthCheck(_) => true,
            SwitchboardError::Api(_) => true,
            SwitchboardError::Bridge(BridgeError::Bind { .. }) => false,
            SwitchboardError::Bridge(_) => true,
            _ => false,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            SwitchboardError::Config(_) => ErrorSeverity::Critical,
            SwitchboardError::Internal { .. } => ErrorSeverity::Error,
            SwitchboardError::Bridge(BridgeError::Bind { .. }) => ErrorSeverity::Critical,
            SwitchboardError::HealthCheck(HealthCheckError::Client(_)) => ErrorSeverity::Critical,
            SwitchboardError::Bridge(_) => ErrorSeverity::Warning,
            SwitchboardError::HealthCheck(_) => ErrorSeverity::Info,
            SwitchboardError::Api(_) => ErrorSeverity::Info,
        }
    }
}

/// Error severity levels for logging and monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical errors that require immediate attention
    Critical,
    /// Errors that affect functionality but don't crash the system
    Error,
    /// Warnings about potential issues
    Warning,
    /// Informational messages about recoverable issues
    Info,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Warning => write!(f, "WARNING"),
            ErrorSeverity::Info => write!(f, "INFO"),
        }
    }
}
