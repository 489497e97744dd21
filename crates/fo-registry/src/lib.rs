//! Service Registry
//!
//! Resolves a logical service, identified by namespace and name, into the
//! endpoints currently serving it. The relay resolves on every inbound request;
//! implementations do not cache, retry or watch.
//!
//! - [`KubernetesRegistry`]: reads the core/v1 `Endpoints` object of a service
//! - [`StaticRegistry`]: fixed in-memory table, for development and tests

use async_trait::async_trait;
use fo_common::ServiceEndpoint;

pub mod error;
pub mod kubeconfig;
pub mod kubernetes;
pub mod static_registry;

pub use error::RegistryError;
pub use kubeconfig::Kubeconfig;
pub use kubernetes::{KubernetesConfig, KubernetesRegistry};
pub use static_registry::StaticRegistry;

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Maps (namespace, service name) to the addresses of its live instances.
///
/// One instance is constructed at startup and shared by every request, so
/// implementations must tolerate concurrent `resolve` calls.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Short name used in logs and health output
    fn kind(&self) -> &str;

    /// Resolve the current endpoints of a service, in registry order.
    ///
    /// An empty vector is a valid answer ("no instances"); a service the
    /// registry has no record of is [`RegistryError::NotFound`].
    async fn resolve(&self, namespace: &str, name: &str) -> Result<Vec<ServiceEndpoint>>;
}

/// Reject coordinates that cannot name a single object.
pub(crate) fn validate_target(namespace: &str, name: &str) -> Result<()> {
    for (label, value) in [("namespace", namespace), ("service name", name)] {
        if value.is_empty() {
            return Err(RegistryError::InvalidTarget(format!("{} is empty", label)));
        }
        if value.contains('/') {
            return Err(RegistryError::InvalidTarget(format!(
                "{} '{}' contains '/'",
                label, value
            )));
        }
    }
    Ok(())
}
