//! Relay - one outbound HTTP call per dispatch job
//!
//! - Method and body copied verbatim from the inbound request
//! - Target host/port taken from the job's endpoint
//! - `Host` header overridden to the logical service name
//! - Inbound `Content-Type` replayed
//! - Optional per-call deadline

use async_trait::async_trait;
use bytes::Bytes;
use fo_common::DispatchJob;
use reqwest::{header, Client};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::RelayError;

/// What a backend answered
#[derive(Debug, Clone)]
pub struct RelayResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// Executes exactly one downstream call.
///
/// Shared by every worker of every broadcast, so implementations must be
/// safe to call concurrently.
#[async_trait]
pub trait Relay: Send + Sync {
    async fn relay(&self, job: &DispatchJob) -> Result<RelayResponse, RelayError>;
}

/// Configuration for [`HttpRelay`]
#[derive(Debug, Clone)]
pub struct HttpRelayConfig {
    /// Deadline for a whole call; `None` waits indefinitely
    pub call_timeout: Option<Duration>,
    pub connect_timeout: Duration,
    /// Value of the `Host` header on every outbound call
    pub host_header: Option<String>,
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpRelayConfig {
    fn default() -> Self {
        Self {
            call_timeout: Some(Duration::from_secs(30)),
            connect_timeout: Duration::from_secs(5),
            host_header: None,
            pool_max_idle_per_host: 10,
        }
    }
}

/// reqwest-backed relay
pub struct HttpRelay {
    client: Client,
    config: HttpRelayConfig,
    host_header: Option<header::HeaderValue>,
}

impl HttpRelay {
    pub fn new() -> Result<Self, RelayError> {
        Self::with_config(HttpRelayConfig::default())
    }

    pub fn with_config(config: HttpRelayConfig) -> Result<Self, RelayError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build()
            .map_err(|e| RelayError::Client(e.to_string()))?;

        let host_header = config
            .host_header
            .as_deref()
            .filter(|h| !h.is_empty())
            .map(header::HeaderValue::from_str)
            .transpose()
            .map_err(|e| RelayError::Client(format!("invalid host header: {}", e)))?;

        info!(
            call_timeout_ms = config.call_timeout.map(|t| t.as_millis() as u64),
            connect_timeout_ms = config.connect_timeout.as_millis() as u64,
            host_header = config.host_header.as_deref().unwrap_or(""),
            "HttpRelay initialized"
        );

        Ok(Self {
            client,
            config,
            host_header,
        })
    }

    pub fn config(&self) -> &HttpRelayConfig {
        &self.config
    }

    fn classify(&self, job: &DispatchJob, e: reqwest::Error) -> RelayError {
        let url = job.url.clone();
        if e.is_timeout() {
            RelayError::Timeout { url }
        } else if e.is_connect() {
            RelayError::Connect {
                url,
                message: e.to_string(),
            }
        } else {
            RelayError::Request {
                url,
                message: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl Relay for HttpRelay {
    async fn relay(&self, job: &DispatchJob) -> Result<RelayResponse, RelayError> {
        let started = Instant::now();
        debug!(index = job.index, url = %job.url, method = %job.method(), "Relaying request");

        let mut request = self
            .client
            .request(job.method().clone(), &job.url)
            .body(job.body().clone());

        if let Some(host) = &self.host_header {
            request = request.header(header::HOST, host.clone());
        }
        if let Some(content_type) = job.content_type() {
            request = request.header(header::CONTENT_TYPE, content_type);
        }
        if let Some(timeout) = self.config.call_timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|e| {
            let err = self.classify(job, e);
            warn!(index = job.index, url = %job.url, error = %err, "Relay request failed");
            err
        })?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response.bytes().await.map_err(|e| {
            let err = if e.is_timeout() {
                RelayError::Timeout {
                    url: job.url.clone(),
                }
            } else {
                RelayError::Body {
                    url: job.url.clone(),
                    message: e.to_string(),
                }
            };
            warn!(index = job.index, url = %job.url, error = %err, "Reading relay response failed");
            err
        })?;

        debug!(
            index = job.index,
            url = %job.url,
            status,
            bytes = body.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Relay response received"
        );

        Ok(RelayResponse {
            status,
            content_type,
            body,
        })
    }
}
