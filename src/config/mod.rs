//! Configuration management for switchboard

pub use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Main switchboard configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Routing and cluster-monitoring configuration
    pub proxy: ProxyConfig,
    /// TLS settings for talking to the galera agents
    #[serde(default)]
    pub galera_agent_tls: GaleraAgentTlsConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address every data-plane listener binds to
    pub bind_address: String,
}

/// Routing and cluster-monitoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Port clients connect to for read/write traffic
    pub port: u16,
    /// Port routed to a healthy node other than the active one; 0 disables it
    #[serde(default)]
    pub inactive_port: u16,
    /// Time the active listener lingers after a shutdown signal
    #[serde(default)]
    pub shutdown_delay_sec: u64,
    /// Per-request timeout for galera agent health checks
    pub healthcheck_timeout_ms: u64,
    /// Interval between poll cycles; defaults to a fifth of the health check timeout
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    /// Timeout for dialing an upstream node
    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,
    /// Route to a node that is serving a state transfer
    #[serde(default)]
    pub available_when_donor: bool,
    /// Route to a node that reports read_only
    #[serde(default)]
    pub available_when_read_only: bool,
    /// Interval of the periodic status log line; 0 disables it
    #[serde(default = "default_status_log_interval_sec")]
    pub status_log_interval_sec: u64,
    /// Cluster nodes in priority order
    pub backends: Vec<BackendConfig>,
}

/// One cluster node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub status_port: u16,
    pub status_endpoint: String,
}

/// TLS settings for the galera agent health endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GaleraAgentTlsConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Name the agent certificate is issued for
    #[serde(default)]
    pub server_name: String,
    /// PEM encoded CA certificate
    #[serde(default)]
    pub ca: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log format (json, text)
    pub format: String,
}

fn default_dial_timeout_ms() -> u64 {
    5000
}

fn default_status_log_interval_sec() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_address: "0.0.0.0".to_string(),
            },
            proxy: ProxyConfig {
                port: 3306,
                inactive_port: 0,
                shutdown_delay_sec: 0,
                healthcheck_timeout_ms: 5000,
                poll_interval_ms: None,
                dial_timeout_ms: default_dial_timeout_ms(),
                available_when_donor: false,
                available_when_read_only: false,
                status_log_interval_sec: default_status_log_interval_sec(),
                backends: vec![BackendConfig {
                    name: "mysql-0".to_string(),
                    host: "127.0.0.1".to_string(),
                    port: 13306,
                    status_port: 9200,
                    status_endpoint: "api/v1/status".to_string(),
                }],
            },
            galera_agent_tls: GaleraAgentTlsConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "text".to_string(),
            },
        }
    }
}

impl ProxyConfig {
    pub fn healthcheck_timeout(&self) -> Duration {
        Duration::from_millis(self.healthcheck_timeout_ms)
    }

    /// Interval between poll cycles
    pub fn poll_interval(&self) -> Duration {
        match self.poll_interval_ms {
            Some(ms) => Duration::from_millis(ms),
            None => (self.healthcheck_timeout() / 5).max(Duration::from_millis(1)),
        }
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub fn shutdown_delay(&self) -> Duration {
        Duration::from_secs(self.shutdown_delay_sec)
    }

    /// `None` when the status logger is disabled
    pub fn status_log_interval(&self) -> Option<Duration> {
        (self.status_log_interval_sec > 0)
            .then(|| Duration::from_secs(self.status_log_interval_sec))
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Address of the active data-plane listener
    pub fn proxy_listen_addr(&self) -> String {
        format!("{}:{}", self.server.bind_address, self.proxy.port)
    }

    /// Address of the inactive data-plane listener, if enabled
    pub fn inactive_listen_addr(&self) -> Option<String> {
        (self.proxy.inactive_port != 0)
            .then(|| format!("{}:{}", self.server.bind_address, self.proxy.inactive_port))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.bind_address.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "bind_address cannot be empty".to_string(),
            ));
        }

        if self.proxy.port == 0 {
            return Err(ConfigError::ValidationError(
                "proxy port must be greater than 0".to_string(),
            ));
        }

        if self.proxy.inactive_port != 0 && self.proxy.inactive_port == self.proxy.port {
            return Err(ConfigError::ValidationError(
                "inactive_port must differ from the proxy port".to_string(),
            ));
        }

        if self.proxy.healthcheck_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "healthcheck_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.proxy.poll_interval().is_zero() {
            return Err(ConfigError::ValidationError(
                "poll interval must be greater than 0".to_string(),
            ));
        }

        if self.proxy.dial_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "dial_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.proxy.backends.is_empty() {
            return Err(ConfigError::ValidationError(
                "backends cannot be empty".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for (i, backend) in self.proxy.backends.iter().enumerate() {
            let prefix = format!("proxy.backends[{}]", i);
            if backend.name.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "{}.name cannot be empty",
                    prefix
                )));
            }
            if backend.host.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "{}.host cannot be empty",
                    prefix
                )));
            }
            if backend.port == 0 || backend.status_port == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{}: port and status_port must be greater than 0",
                    prefix
                )));
            }
            if backend.status_endpoint.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "{}.status_endpoint cannot be empty",
                    prefix
                )));
            }
            if !names.insert(backend.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate backend name: {}",
                    backend.name
                )));
            }
        }

        if self.galera_agent_tls.enabled && self.galera_agent_tls.ca.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "galera_agent_tls.ca is required when TLS is enabled".to_string(),
            ));
        }

        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {}",
                    self.logging.level
                )))
            }
        }

        match self.logging.format.as_str() {
            "json" | "text" => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format: {}",
                    self.logging.format
                )))
            }
        }

        Ok(())
    }

    /// Create example configuration file for a three node cluster
    pub fn create_example_config<P: AsRef<Path>>(path: P) -> Result<(), ConfigError> {
        let backends = (0..3)
            .map(|i| BackendConfig {
                name: format!("mysql-{}", i),
                host: format!("10.0.1.{}", 10 + i),
                port: 3306,
                status_port: 9200,
                status_endpoint: "api/v1/status".to_string(),
            })
            .collect();

        let mut config = Config::default();
        config.proxy.inactive_port = 3307;
        config.proxy.shutdown_delay_sec = 5;
        config.proxy.backends = backends;

        config.save_to_file(path)
    }
}
