use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("endpoints \"{name}\" not found in namespace \"{namespace}\"")]
    NotFound { namespace: String, name: String },

    #[error("Registry unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid registry response: {0}")]
    InvalidResponse(String),

    #[error("Invalid service target: {0}")]
    InvalidTarget(String),

    #[error("Registry configuration error: {0}")]
    Config(String),
}

impl RegistryError {
    pub fn not_found(namespace: &str, name: &str) -> Self {
        RegistryError::NotFound {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// Metric/log label for the error class
    pub fn label(&self) -> &'static str {
        match self {
            RegistryError::NotFound { .. } => "not_found",
            RegistryError::Unavailable(_) => "unavailable",
            RegistryError::InvalidResponse(_) => "invalid_response",
            RegistryError::InvalidTarget(_) => "invalid_target",
            RegistryError::Config(_) => "config",
        }
    }
}
