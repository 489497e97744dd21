use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use fo_registry::RegistryError;
use thiserror::Error;

/// Failure of a single outbound call
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Connection to {url} failed: {message}")]
    Connect { url: String, message: String },

    #[error("Request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("Reading response from {url} failed: {message}")]
    Body { url: String, message: String },

    #[error("Cannot build HTTP client: {0}")]
    Client(String),
}

impl RelayError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RelayError::Timeout { .. })
    }
}

/// Failure of a broadcast as a whole
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("No endpoints to dispatch to")]
    NoEndpoints,

    #[error("Worker pool closed before accepting job {0}")]
    PoolClosed(usize),

    #[error("Worker pool stopped after {received} of {expected} results")]
    Incomplete { expected: usize, received: usize },

    #[error("{failed} of {total} downstream calls failed")]
    PartialFailure { failed: usize, total: usize },
}

/// Request-level error returned by the relay handler
#[derive(Error, Debug)]
pub enum FanoutError {
    #[error("Invalid query string: {0}")]
    InvalidQuery(String),

    #[error("{0}")]
    Resolution(#[from] RegistryError),

    #[error("Failed to read request body: {0}")]
    BodyRead(String),

    #[error("no instances available for {namespace}/{service}")]
    NoInstances { namespace: String, service: String },

    #[error("{0}")]
    Dispatch(#[from] DispatchError),
}

impl FanoutError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            FanoutError::InvalidQuery(_)
            | FanoutError::Resolution(_)
            | FanoutError::BodyRead(_) => StatusCode::BAD_REQUEST,
            FanoutError::NoInstances { .. } | FanoutError::Dispatch(DispatchError::NoEndpoints) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            FanoutError::Dispatch(DispatchError::PartialFailure { .. }) => StatusCode::BAD_GATEWAY,
            FanoutError::Dispatch(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Outcome label for `fanout_broadcasts_total`
    pub fn outcome(&self) -> &'static str {
        match self {
            FanoutError::InvalidQuery(_) => "query_error",
            FanoutError::Resolution(_) => "resolution_error",
            FanoutError::BodyRead(_) => "body_error",
            FanoutError::NoInstances { .. } | FanoutError::Dispatch(DispatchError::NoEndpoints) => {
                "no_endpoints"
            }
            FanoutError::Dispatch(DispatchError::PartialFailure { .. }) => "partial_failure",
            FanoutError::Dispatch(_) => "dispatch_error",
        }
    }
}

impl IntoResponse for FanoutError {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.to_string(),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let err = FanoutError::from(RegistryError::not_found("default", "echo"));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.outcome(), "resolution_error");

        let err = FanoutError::BodyRead("length limit exceeded".to_string());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let err = FanoutError::InvalidQuery("bad escape".to_string());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.outcome(), "query_error");

        let err = FanoutError::NoInstances {
            namespace: "default".to_string(),
            service: "echo".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.to_string(), "no instances available for default/echo");

        let err = FanoutError::from(DispatchError::PartialFailure { failed: 1, total: 3 });
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.to_string(), "1 of 3 downstream calls failed");

        let err = FanoutError::from(DispatchError::Incomplete { expected: 3, received: 2 });
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_resolution_error_text_is_passed_through() {
        let err = FanoutError::from(RegistryError::not_found("default", "missing"));
        assert_eq!(
            err.to_string(),
            RegistryError::not_found("default", "missing").to_string()
        );
    }
}
