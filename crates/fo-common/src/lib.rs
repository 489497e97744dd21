use bytes::Bytes;
use http::Method;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod logging;

const DEFAULT_SCHEME: &str = "http";

// ============================================================================
// Service Endpoints
// ============================================================================

/// One reachable instance of a target service.
///
/// Produced fresh by the registry on every inbound request; nothing in the
/// relay caches these.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    #[serde(default = "default_scheme")]
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

fn default_scheme() -> String {
    DEFAULT_SCHEME.to_string()
}

impl ServiceEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: default_scheme(),
            host: host.into(),
            port,
        }
    }

    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Base URL without a trailing slash, e.g. `http://10.0.0.7:8080`.
    /// IPv6 literals are bracketed.
    pub fn base_url(&self) -> String {
        if self.host.contains(':') {
            format!("{}://[{}]:{}", self.scheme, self.host, self.port)
        } else {
            format!("{}://{}:{}", self.scheme, self.host, self.port)
        }
    }
}

impl fmt::Display for ServiceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base_url())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EndpointParseError {
    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Missing port in endpoint: {0}")]
    MissingPort(String),

    #[error("Invalid port in endpoint: {0}")]
    InvalidPort(String),

    #[error("Empty host in endpoint: {0}")]
    EmptyHost(String),
}

impl FromStr for ServiceEndpoint {
    type Err = EndpointParseError;

    /// Accepts `host:port`, `[v6]:port` or `scheme://host:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_end_matches('/');
        let (scheme, rest) = match trimmed.split_once("://") {
            Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
            None => (default_scheme(), trimmed),
        };

        if scheme != "http" && scheme != "https" {
            return Err(EndpointParseError::UnsupportedScheme(scheme));
        }

        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| EndpointParseError::MissingPort(s.to_string()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(EndpointParseError::EmptyHost(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| EndpointParseError::InvalidPort(s.to_string()))?;

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
        })
    }
}

// ============================================================================
// Broadcast Request / Jobs / Results
// ============================================================================

/// The inbound request, captured once and shared read-only by every job.
#[derive(Debug, Clone)]
pub struct BroadcastRequest {
    pub method: Method,
    /// Path component only; the query string is not forwarded.
    pub path: String,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl BroadcastRequest {
    pub fn new(method: Method, path: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            method,
            path: path.into(),
            content_type: None,
            body: body.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// One downstream call of a broadcast.
///
/// Exactly one job exists per resolved endpoint. Jobs are moved through the
/// pool queues and never cloned, so a job cannot be executed twice.
#[derive(Debug)]
pub struct DispatchJob {
    /// Position of the endpoint in the resolved set
    pub index: usize,
    pub endpoint: ServiceEndpoint,
    /// Endpoint base URL + original request path
    pub url: String,
    request: Arc<BroadcastRequest>,
}

impl DispatchJob {
    pub fn new(index: usize, endpoint: ServiceEndpoint, request: Arc<BroadcastRequest>) -> Self {
        let url = format!("{}{}", endpoint.base_url(), request.path);
        Self {
            index,
            endpoint,
            url,
            request,
        }
    }

    pub fn method(&self) -> &Method {
        &self.request.method
    }

    pub fn body(&self) -> &Bytes {
        &self.request.body
    }

    pub fn content_type(&self) -> Option<&str> {
        self.request.content_type.as_deref()
    }
}

/// Why a downstream call produced no body.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobFailure {
    #[error("Downstream call timed out")]
    Timeout,

    #[error("Downstream call cancelled")]
    Cancelled,

    #[error("{0}")]
    Transport(String),
}

impl JobFailure {
    pub fn label(&self) -> &'static str {
        match self {
            JobFailure::Timeout => "timeout",
            JobFailure::Cancelled => "cancelled",
            JobFailure::Transport(_) => "error",
        }
    }
}

/// Outcome of executing exactly one [`DispatchJob`].
#[derive(Debug, Clone)]
pub struct JobResult {
    pub index: usize,
    pub url: String,
    /// Downstream status code, when a response was received
    pub status: Option<u16>,
    pub content_type: Option<String>,
    /// Response body; always empty for failed jobs
    pub body: Bytes,
    pub failure: Option<JobFailure>,
    pub elapsed: Duration,
    /// Order in which the dispatcher received this result (0-based)
    pub completion: usize,
}

impl JobResult {
    pub fn completed(
        job: &DispatchJob,
        status: u16,
        content_type: Option<String>,
        body: Bytes,
        elapsed: Duration,
    ) -> Self {
        Self {
            index: job.index,
            url: job.url.clone(),
            status: Some(status),
            content_type,
            body,
            failure: None,
            elapsed,
            completion: 0,
        }
    }

    pub fn failed(job: &DispatchJob, failure: JobFailure, elapsed: Duration) -> Self {
        Self {
            index: job.index,
            url: job.url.clone(),
            status: None,
            content_type: None,
            body: Bytes::new(),
            failure: Some(failure),
            elapsed,
            completion: 0,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }

    /// Call completed and the backend answered with a 2xx status.
    pub fn is_success(&self) -> bool {
        self.failure.is_none() && self.status.is_some_and(|s| (200..300).contains(&s))
    }

    pub fn label(&self) -> &'static str {
        match &self.failure {
            Some(failure) => failure.label(),
            None => "success",
        }
    }
}

/// The single response handed back to the caller of a broadcast.
#[derive(Debug, Clone)]
pub struct BroadcastOutcome {
    pub body: Bytes,
    pub status: Option<u16>,
    pub content_type: Option<String>,
    /// Endpoint index of the selected result
    pub selected: usize,
    pub url: String,
    /// Number of results collected (always equal to the number of jobs)
    pub total: usize,
    pub failed: usize,
}

impl BroadcastOutcome {
    pub fn from_result(result: JobResult, total: usize, failed: usize) -> Self {
        Self {
            body: result.body,
            status: result.status,
            content_type: result.content_type,
            selected: result.index,
            url: result.url,
            total,
            failed,
        }
    }
}

// ============================================================================
// Selection Policy
// ============================================================================

/// Rule used to reduce the completed results of a broadcast to one response.
///
/// `LastCompleted` reproduces the legacy behaviour: whichever call finished
/// last in real time wins. With backends answering at nearly the same time
/// the winner is not deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    #[default]
    LastCompleted,
    /// Earliest successful (2xx) result; falls back to `LastCompleted`
    FirstSuccess,
    /// Every call must succeed; the last result is returned
    All,
}

impl SelectionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionPolicy::LastCompleted => "last_completed",
            SelectionPolicy::FirstSuccess => "first_success",
            SelectionPolicy::All => "all",
        }
    }
}

impl fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown selection policy: {0} (expected last_completed, first_success or all)")]
pub struct UnknownSelectionPolicy(pub String);

impl FromStr for SelectionPolicy {
    type Err = UnknownSelectionPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "last_completed" | "last" => Ok(SelectionPolicy::LastCompleted),
            "first_success" | "first" => Ok(SelectionPolicy::FirstSuccess),
            "all" => Ok(SelectionPolicy::All),
            _ => Err(UnknownSelectionPolicy(s.to_string())),
        }
    }
}
