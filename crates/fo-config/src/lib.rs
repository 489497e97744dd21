//! Fanout Configuration System
//!
//! TOML-based configuration with environment variable overrides. The
//! environment names of the legacy deployment (`PORT`, `NAMESPACE_NAME`,
//! `ENDPOINT_NAME`) are honoured alongside the `FANOUT_*` variables.

use fo_common::{SelectionPolicy, ServiceEndpoint};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub target: TargetConfig,
    pub relay: RelayConfig,
    pub dispatch: DispatchConfig,
    pub registry: RegistryConfig,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    /// Relay listener port
    pub port: u16,
    /// Health and metrics listener port
    pub management_port: u16,
    /// Largest inbound body accepted for broadcast
    pub max_body_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            management_port: 9090,
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Default service coordinates, overridable per request with the
/// `namespace` and `endpoint` query parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub namespace: String,
    pub service: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            service: String::new(),
        }
    }
}

/// Outbound call configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Host header sent to every backend; empty means the default service name
    pub host_header: String,
    pub connect_timeout_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host_header: String::new(),
            connect_timeout_ms: 5000,
        }
    }
}

/// Worker pool and selection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Workers per broadcast
    pub pool_size: usize,
    /// Per-call deadline in milliseconds; 0 disables it
    pub call_timeout_ms: u64,
    pub selection: SelectionPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            pool_size: 10,
            call_timeout_ms: 30000,
            selection: SelectionPolicy::LastCompleted,
        }
    }
}

/// Service registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// `kubernetes` or `static`
    pub kind: String,
    pub kubernetes: KubernetesRegistryConfig,
    pub static_services: Vec<StaticServiceConfig>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            kind: "kubernetes".to_string(),
            kubernetes: KubernetesRegistryConfig::default(),
            static_services: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KubernetesRegistryConfig {
    /// API server URL; empty means kubeconfig (`KUBECONFIG` or
    /// `~/.kube/config`), then the in-cluster service account
    pub api_url: String,
    /// Bearer token for `api_url`; empty means none
    pub token: String,
    pub request_timeout_ms: u64,
}

impl Default for KubernetesRegistryConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            token: String::new(),
            request_timeout_ms: 10000,
        }
    }
}

/// A fixed service definition for the static registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticServiceConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub name: String,
    /// `host:port` or `scheme://host:port`
    #[serde(default)]
    pub endpoints: Vec<String>,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl StaticServiceConfig {
    pub fn parse_endpoints(&self) -> Result<Vec<ServiceEndpoint>, ConfigError> {
        self.endpoints
            .iter()
            .map(|raw| {
                raw.parse::<ServiceEndpoint>().map_err(|e| {
                    ConfigError::ValidationError(format!(
                        "static service {}/{}: {}",
                        self.namespace, self.name, e
                    ))
                })
            })
            .collect()
    }
}

pub const REGISTRY_KINDS: &[&str] = &["kubernetes", "static"];

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with environment variable override
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !REGISTRY_KINDS.contains(&self.registry.kind.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "unknown registry kind '{}' (expected one of {})",
                self.registry.kind,
                REGISTRY_KINDS.join(", ")
            )));
        }
        if self.http.port == self.http.management_port {
            return Err(ConfigError::ValidationError(format!(
                "relay and management listeners share port {}",
                self.http.port
            )));
        }
        for service in &self.registry.static_services {
            service.parse_endpoints()?;
        }
        Ok(())
    }

    /// Host header for outbound calls, `None` when neither the relay override
    /// nor the default service name is set.
    pub fn host_header(&self) -> Option<String> {
        [&self.relay.host_header, &self.target.service]
            .into_iter()
            .find(|value| !value.is_empty())
            .cloned()
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        match self.dispatch.call_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.relay.connect_timeout_ms)
    }

    pub fn registry_timeout(&self) -> Duration {
        Duration::from_millis(self.registry.kubernetes.request_timeout_ms)
    }

    /// Generate an example TOML configuration
    pub fn example_toml() -> String {
        r#"# Fanout Relay Configuration
# Environment variables override these settings

[http]
host = "0.0.0.0"
port = 8080              # PORT / FANOUT_HTTP_PORT
management_port = 9090   # health + Prometheus metrics
max_body_bytes = 10485760

[target]
namespace = "default"    # NAMESPACE_NAME
service = "my-service"   # ENDPOINT_NAME

[relay]
host_header = ""         # empty = target.service
connect_timeout_ms = 5000

[dispatch]
pool_size = 10
call_timeout_ms = 30000  # 0 = no deadline
selection = "last_completed"  # last_completed, first_success, all

[registry]
kind = "kubernetes"      # kubernetes, static

[registry.kubernetes]
api_url = ""             # empty = $KUBECONFIG or ~/.kube/config, else in-cluster
token = ""
request_timeout_ms = 10000

# [[registry.static_services]]
# namespace = "default"
# name = "my-service"
# endpoints = ["10.0.0.1:8080", "10.0.0.2:8080"]
"#
        .to_string()
    }
}
