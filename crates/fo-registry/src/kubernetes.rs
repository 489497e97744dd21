//! Kubernetes Endpoints resolver
//!
//! Reads `GET /api/v1/namespaces/{namespace}/endpoints/{name}` from the API
//! server and expands every subset into one endpoint per (ready address, port)
//! pair. Addresses listed under `notReadyAddresses` are skipped; that is the
//! only readiness filtering the relay applies.
//!
//! Outside a cluster, settings come from a kubeconfig (see
//! [`KubernetesConfig::infer`]), or `api_url` can point at `kubectl proxy`
//! (for example `http://127.0.0.1:8001`) or at the API server with a token.

use async_trait::async_trait;
use fo_common::ServiceEndpoint;
use reqwest::{header, Certificate, Client, Identity, StatusCode};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{validate_target, Registry, RegistryError, Result};

/// Mounted service-account material inside a pod
pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

const ERROR_BODY_EXCERPT: usize = 256;

/// Connection settings for the API server
#[derive(Clone)]
pub struct KubernetesConfig {
    pub api_url: String,
    pub token: Option<String>,
    /// PEM bundle trusted in addition to the system roots
    pub ca_cert_pem: Option<Vec<u8>>,
    /// Client certificate followed by its private key, PEM
    pub client_identity_pem: Option<Vec<u8>>,
    pub accept_invalid_certs: bool,
    pub request_timeout: Duration,
}

impl std::fmt::Debug for KubernetesConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubernetesConfig")
            .field("api_url", &self.api_url)
            .field("has_token", &self.token.is_some())
            .field("has_ca_cert", &self.ca_cert_pem.is_some())
            .field("has_client_identity", &self.client_identity_pem.is_some())
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl KubernetesConfig {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: None,
            ca_cert_pem: None,
            client_identity_pem: None,
            accept_invalid_certs: false,
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.token = (!token.is_empty()).then_some(token);
        self
    }

    pub fn with_ca_cert_pem(mut self, pem: Vec<u8>) -> Self {
        self.ca_cert_pem = Some(pem);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// In-cluster configuration from the pod's service account.
    pub fn in_cluster() -> Result<Self> {
        Self::in_cluster_from(Path::new(SERVICE_ACCOUNT_DIR), |key| std::env::var(key).ok())
    }

    /// In-cluster configuration from an explicit service-account directory
    /// and variable lookup.
    pub fn in_cluster_from<F>(dir: &Path, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("KUBERNETES_SERVICE_HOST")
            .filter(|h| !h.is_empty())
            .ok_or_else(|| {
                RegistryError::Config(
                    "KUBERNETES_SERVICE_HOST is not set; not running inside a cluster \
                     (configure registry.kubernetes.api_url instead)"
                        .to_string(),
                )
            })?;
        let port = lookup("KUBERNETES_SERVICE_PORT")
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "443".to_string());

        let token_path = dir.join("token");
        let token = std::fs::read_to_string(&token_path).map_err(|e| {
            RegistryError::Config(format!("cannot read {}: {}", token_path.display(), e))
        })?;

        let ca_path = dir.join("ca.crt");
        let ca_cert_pem = std::fs::read(&ca_path).map_err(|e| {
            RegistryError::Config(format!("cannot read {}: {}", ca_path.display(), e))
        })?;

        let api_url = if host.contains(':') {
            format!("https://[{}]:{}", host, port)
        } else {
            format!("https://{}:{}", host, port)
        };

        Ok(Self::new(api_url)
            .with_token(token.trim())
            .with_ca_cert_pem(ca_cert_pem))
    }
}

/// core/v1 Endpoints, reduced to the fields the relay reads.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoints {
    #[serde(default)]
    pub subsets: Option<Vec<EndpointSubset>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSubset {
    #[serde(default)]
    pub addresses: Option<Vec<EndpointAddress>>,
    #[serde(default)]
    pub not_ready_addresses: Option<Vec<EndpointAddress>>,
    #[serde(default)]
    pub ports: Option<Vec<EndpointPort>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointAddress {
    pub ip: String,
    #[serde(default)]
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointPort {
    #[serde(default)]
    pub name: Option<String>,
    pub port: u16,
    #[serde(default)]
    pub protocol: Option<String>,
}

impl Endpoints {
    /// Every ready address crossed with every port of its subset.
    pub fn service_endpoints(&self) -> Vec<ServiceEndpoint> {
        self.subsets
            .iter()
            .flatten()
            .flat_map(|subset| {
                let ports = subset.ports.as_deref().unwrap_or_default();
                subset
                    .addresses
                    .iter()
                    .flatten()
                    .flat_map(move |address| {
                        ports
                            .iter()
                            .map(move |port| ServiceEndpoint::new(address.ip.clone(), port.port))
                    })
            })
            .collect()
    }
}

/// Registry backed by the Kubernetes API server
pub struct KubernetesRegistry {
    client: Client,
    config: KubernetesConfig,
}

impl KubernetesRegistry {
    pub fn new(config: KubernetesConfig) -> Result<Self> {
        let mut builder = Client::builder().timeout(config.request_timeout);

        if let Some(pem) = &config.ca_cert_pem {
            for cert in Certificate::from_pem_bundle(pem)
                .map_err(|e| RegistryError::Config(format!("invalid CA certificate: {}", e)))?
            {
                builder = builder.add_root_certificate(cert);
            }
        }

        if let Some(pem) = &config.client_identity_pem {
            let identity = Identity::from_pem(pem)
                .map_err(|e| RegistryError::Config(format!("invalid client certificate: {}", e)))?;
            builder = builder.identity(identity);
        }

        if config.accept_invalid_certs {
            warn!(api_url = %config.api_url, "TLS verification disabled for the Kubernetes API");
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder
            .build()
            .map_err(|e| RegistryError::Config(format!("cannot build HTTP client: {}", e)))?;

        info!(
            api_url = %config.api_url,
            authenticated = config.token.is_some(),
            timeout_ms = config.request_timeout.as_millis() as u64,
            "Kubernetes registry initialized"
        );

        Ok(Self { client, config })
    }

    /// Build from the pod's service account.
    pub fn in_cluster() -> Result<Self> {
        Self::new(KubernetesConfig::in_cluster()?)
    }

    pub fn api_url(&self) -> &str {
        &self.config.api_url
    }

    fn endpoints_url(&self, namespace: &str, name: &str) -> String {
        format!(
            "{}/api/v1/namespaces/{}/endpoints/{}",
            self.config.api_url,
            urlencoding::encode(namespace),
            urlencoding::encode(name)
        )
    }
}

#[async_trait]
impl Registry for KubernetesRegistry {
    fn kind(&self) -> &str {
        "kubernetes"
    }

    async fn resolve(&self, namespace: &str, name: &str) -> Result<Vec<ServiceEndpoint>> {
        validate_target(namespace, name)?;

        let url = self.endpoints_url(namespace, name);
        debug!(namespace, name, url = %url, "Getting endpoints");

        let mut request = self
            .client
            .get(&url)
            .header(header::ACCEPT, "application/json");
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            warn!(namespace, name, error = %e, "Kubernetes API request failed");
            RegistryError::Unavailable(format!("{}: {}", url, e))
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(namespace, name, "Endpoints not found");
            return Err(RegistryError::not_found(namespace, name));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(ERROR_BODY_EXCERPT).collect();
            warn!(namespace, name, status = status.as_u16(), "Kubernetes API returned an error");
            return Err(RegistryError::Unavailable(format!(
                "HTTP {} from {}: {}",
                status.as_u16(),
                url,
                excerpt
            )));
        }

        let endpoints: Endpoints = response
            .json()
            .await
            .map_err(|e| RegistryError::InvalidResponse(e.to_string()))?;

        let resolved = endpoints.service_endpoints();
        debug!(namespace, name, count = resolved.len(), "Resolved endpoints");
        Ok(resolved)
    }
}
