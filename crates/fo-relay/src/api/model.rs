use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Per-request override of the target service
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TargetQuery {
    /// Namespace of the target service; `None` means the configured default
    pub namespace: Option<String>,
    /// Name of the target service; `None` means the configured default
    pub endpoint: Option<String>,
}

impl TargetQuery {
    /// First non-empty `namespace` and `endpoint`, in query order. Every other
    /// parameter is ignored.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut query = Self::default();
        for (key, value) in pairs {
            if value.is_empty() {
                continue;
            }
            let slot = match key.as_str() {
                "namespace" => &mut query.namespace,
                "endpoint" => &mut query.endpoint,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value);
            }
        }
        query
    }
}

/// Kubernetes probe response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProbeResponse {
    /// Probe status: LIVE, READY
    pub status: String,
}
