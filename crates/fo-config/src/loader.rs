//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "fanout.toml",
    "config.toml",
    "./config/fanout.toml",
    "/etc/fanout/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    search_standard_paths: bool,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            config_path: None,
            search_standard_paths: true,
        }
    }

    /// Create a loader with a specific config file path. Standard paths are
    /// not searched when the file is missing.
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
            search_standard_paths: false,
        }
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        self.load_with(|key| env::var(key).ok())
    }

    /// Same as [`load`](Self::load) with an explicit variable lookup.
    pub fn load_with<F>(&self, lookup: F) -> Result<AppConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Start from the config file if one is found, defaults otherwise
        let mut config = match self.find_config_file(&lookup) {
            Some(path) => {
                info!(?path, "Loading configuration from file");
                AppConfig::from_file(&path)?
            }
            None => AppConfig::default(),
        };

        // Apply environment variable overrides
        apply_overrides(&mut config, &lookup);

        // Validate the merged result, not the file alone
        config.validate()?;

        Ok(config)
    }

    fn find_config_file<F>(&self, lookup: &F) -> Option<PathBuf>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Explicit path: use it or nothing
        if let Some(path) = &self.config_path {
            return path.exists().then(|| path.clone());
        }

        // FANOUT_CONFIG environment variable
        if let Some(path) = lookup("FANOUT_CONFIG").map(PathBuf::from) {
            if path.exists() {
                return Some(path);
            }
            warn!(?path, "FANOUT_CONFIG points to a missing file, ignoring");
        }

        if !self.search_standard_paths {
            return None;
        }

        // Standard locations, first match wins
        CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_into<T: FromStr>(target: &mut T, key: &str, value: Option<String>) {
    let Some(value) = value else { return };
    match value.trim().parse() {
        Ok(parsed) => *target = parsed,
        Err(_) => warn!(key, value = %value, "Ignoring unparseable environment override"),
    }
}

/// Apply environment variable overrides
fn apply_overrides<F>(config: &mut AppConfig, lookup: &F)
where
    F: Fn(&str) -> Option<String>,
{
    // HTTP (PORT kept for the legacy deployment, FANOUT_HTTP_PORT wins)
    parse_into(&mut config.http.port, "PORT", lookup("PORT"));
    parse_into(&mut config.http.port, "FANOUT_HTTP_PORT", lookup("FANOUT_HTTP_PORT"));
    if let Some(val) = lookup("FANOUT_HTTP_HOST") {
        config.http.host = val;
    }
    parse_into(
        &mut config.http.management_port,
        "FANOUT_MANAGEMENT_PORT",
        lookup("FANOUT_MANAGEMENT_PORT"),
    );
    parse_into(
        &mut config.http.max_body_bytes,
        "FANOUT_MAX_BODY_BYTES",
        lookup("FANOUT_MAX_BODY_BYTES"),
    );

    // Target
    if let Some(val) = lookup("NAMESPACE_NAME").filter(|v| !v.is_empty()) {
        config.target.namespace = val;
    }
    if let Some(val) = lookup("ENDPOINT_NAME").filter(|v| !v.is_empty()) {
        config.target.service = val;
    }

    // Relay
    if let Some(val) = lookup("FANOUT_HOST_HEADER") {
        config.relay.host_header = val;
    }
    parse_into(
        &mut config.relay.connect_timeout_ms,
        "FANOUT_CONNECT_TIMEOUT_MS",
        lookup("FANOUT_CONNECT_TIMEOUT_MS"),
    );

    // Dispatch
    parse_into(&mut config.dispatch.pool_size, "FANOUT_POOL_SIZE", lookup("FANOUT_POOL_SIZE"));
    parse_into(
        &mut config.dispatch.call_timeout_ms,
        "FANOUT_CALL_TIMEOUT_MS",
        lookup("FANOUT_CALL_TIMEOUT_MS"),
    );
    parse_into(&mut config.dispatch.selection, "FANOUT_SELECTION", lookup("FANOUT_SELECTION"));

    // Registry
    if let Some(val) = lookup("FANOUT_REGISTRY") {
        config.registry.kind = val.trim().to_ascii_lowercase();
    }
    if let Some(val) = lookup("FANOUT_KUBE_API_URL") {
        config.registry.kubernetes.api_url = val;
    }
    if let Some(val) = lookup("FANOUT_KUBE_TOKEN") {
        config.registry.kubernetes.token = val;
    }
    parse_into(
        &mut config.registry.kubernetes.request_timeout_ms,
        "FANOUT_KUBE_TIMEOUT_MS",
        lookup("FANOUT_KUBE_TIMEOUT_MS"),
    );
}
