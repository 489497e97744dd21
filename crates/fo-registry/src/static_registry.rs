//! In-memory registry with a fixed service table

use async_trait::async_trait;
use fo_common::ServiceEndpoint;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::{validate_target, Registry, RegistryError, Result};

type ServiceKey = (String, String);

/// Registry answering from a table populated at startup.
///
/// A service registered with an empty endpoint list resolves to zero
/// instances; a service never registered is `NotFound`.
#[derive(Default)]
pub struct StaticRegistry {
    services: RwLock<HashMap<ServiceKey, Vec<ServiceEndpoint>>>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service(
        self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        endpoints: Vec<ServiceEndpoint>,
    ) -> Self {
        self.set_service(namespace, name, endpoints);
        self
    }

    /// Replace the endpoints of a service.
    pub fn set_service(
        &self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        endpoints: Vec<ServiceEndpoint>,
    ) {
        self.services
            .write()
            .insert((namespace.into(), name.into()), endpoints);
    }

    pub fn remove_service(&self, namespace: &str, name: &str) -> Option<Vec<ServiceEndpoint>> {
        self.services
            .write()
            .remove(&(namespace.to_string(), name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }
}

#[async_trait]
impl Registry for StaticRegistry {
    fn kind(&self) -> &str {
        "static"
    }

    async fn resolve(&self, namespace: &str, name: &str) -> Result<Vec<ServiceEndpoint>> {
        validate_target(namespace, name)?;
        self.services
            .read()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| RegistryError::not_found(namespace, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_registered_service() {
        let registry = StaticRegistry::new().with_service(
            "default",
            "echo",
            vec![
                ServiceEndpoint::new("10.0.0.1", 8080),
                ServiceEndpoint::new("10.0.0.2", 8080),
            ],
        );

        let endpoints = registry.resolve("default", "echo").await.unwrap();
        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[0].host, "10.0.0.1");
        assert_eq!(registry.kind(), "static");
    }

    #[tokio::test]
    async fn test_unknown_service_not_found() {
        let registry = StaticRegistry::new().with_service("default", "echo", vec![]);

        assert!(matches!(
            registry.resolve("other", "echo").await,
            Err(RegistryError::NotFound { .. })
        ));
        assert!(registry.resolve("default", "echo").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_and_remove() {
        let registry = StaticRegistry::new();
        assert!(registry.is_empty());

        registry.set_service("ns", "svc", vec![ServiceEndpoint::new("a", 1)]);
        registry.set_service("ns", "svc", vec![ServiceEndpoint::new("b", 2)]);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve("ns", "svc").await.unwrap()[0].host, "b");

        assert!(registry.remove_service("ns", "svc").is_some());
        assert!(registry.resolve("ns", "svc").await.is_err());
    }
}
