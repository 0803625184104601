//! Service resolution against the registry

use crate::{
    client::RegistryClient,
    config::ResolverConfig,
    discovery::default_diff,
    error::{Error, Result},
    models::*,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Turns service names into live endpoint sets
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Cache key describing the target of a call
    fn target(&self, endpoint: &EndpointInfo) -> String;

    /// Resolve a description into the currently live endpoints
    async fn resolve(&self, description: &str) -> Result<ResolutionResult>;

    /// Difference between two results of the same cache key
    fn diff(
        &self,
        cache_key: &str,
        previous: &ResolutionResult,
        next: &ResolutionResult,
    ) -> (Change, bool);

    /// Stable name of this resolver
    fn name(&self) -> String;
}

/// Resolver backed by a ServiceComb-style registry
pub struct ServiceCombResolver {
    client: Arc<dyn RegistryClient>,
    config: ResolverConfig,
}

impl ServiceCombResolver {
    /// Create a resolver
    pub fn new(client: Arc<dyn RegistryClient>, config: ResolverConfig) -> Self {
        Self { client, config }
    }

    /// The active configuration
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    fn query(&self, description: &str) -> InstanceQuery {
        InstanceQuery {
            consumer_id: self.config.consumer_id.clone(),
            app_id: self.config.app_id.clone(),
            service_name: description.to_string(),
            version_rule: self.config.version_rule.clone(),
        }
    }
}

#[async_trait]
impl Resolver for ServiceCombResolver {
    fn target(&self, endpoint: &EndpointInfo) -> String {
        endpoint.service_name.clone()
    }

    async fn resolve(&self, description: &str) -> Result<ResolutionResult> {
        let records = self
            .client
            .find_instances(&self.query(description))
            .await
            .map_err(|source| Error::Resolution {
                service: description.to_string(),
                source,
            })?;

        let found = records.len();
        let instances: Vec<ResolvedInstance> = records
            .into_iter()
            .filter(|r| r.status == InstanceStatus::Up)
            .flat_map(|r| {
                let properties: std::collections::BTreeMap<String, String> =
                    r.properties.into_iter().collect();
                let weight = self.config.weight;
                r.endpoints.into_iter().map(move |address| ResolvedInstance {
                    network: TCP_NETWORK.to_string(),
                    address,
                    weight,
                    properties: properties.clone(),
                })
            })
            .collect();

        debug!(
            "Resolved {}: {} instances found, {} endpoints up",
            description,
            found,
            instances.len()
        );

        if instances.is_empty() {
            return Err(Error::NoAvailableInstance(description.to_string()));
        }

        Ok(ResolutionResult {
            cacheable: true,
            cache_key: description.to_string(),
            instances,
        })
    }

    fn diff(
        &self,
        cache_key: &str,
        previous: &ResolutionResult,
        next: &ResolutionResult,
    ) -> (Change, bool) {
        default_diff(cache_key, previous, next)
    }

    fn name(&self) -> String {
        format!("sc-resolver:{}:{}", self.config.app_id, self.config.version_rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryRegistry;
    use crate::client::ClientError;
    use std::collections::HashMap;

    async fn seed(
        registry: &MemoryRegistry,
        instances: &[(Vec<&str>, InstanceStatus)],
    ) -> Vec<String> {
        let service_id = registry
            .register_service(&ServiceDescriptor {
                name: "demo".to_string(),
                app_id: "DEFAULT".to_string(),
                version: "1.0.0".to_string(),
                host_name: "host".to_string(),
            })
            .await
            .unwrap();

        let mut ids = Vec::new();
        for (endpoints, status) in instances {
            let id = registry
                .register_instance(&InstanceRegistration {
                    service_id: service_id.clone(),
                    endpoints: endpoints.iter().map(|e| e.to_string()).collect(),
                    host_name: "host".to_string(),
                    status: *status,
                    health_check: HealthCheck::default(),
                    properties: HashMap::from([("zone".to_string(), "a".to_string())]),
                })
                .await
                .unwrap();
            ids.push(id);
        }
        ids
    }

    fn resolver(registry: Arc<MemoryRegistry>) -> ServiceCombResolver {
        ServiceCombResolver::new(registry, ResolverConfig::default())
    }

    #[test]
    fn test_target_and_name() {
        let resolver = resolver(Arc::new(MemoryRegistry::new()));
        assert_eq!(resolver.target(&EndpointInfo::new("demo")), "demo");
        assert_eq!(resolver.name(), "sc-resolver:DEFAULT:latest");
    }

    #[smol_potat::test]
    async fn test_resolve_filters_down_instances() {
        let registry = Arc::new(MemoryRegistry::new());
        seed(
            &registry,
            &[
                (vec!["10.0.0.1:80"], InstanceStatus::Up),
                (vec!["10.0.0.2:80", "10.0.0.2:81"], InstanceStatus::Up),
                (vec!["10.0.0.3:80"], InstanceStatus::Down),
            ],
        )
        .await;

        let result = resolver(registry).resolve("demo").await.unwrap();
        assert!(result.cacheable);
        assert_eq!(result.cache_key, "demo");

        let addresses: Vec<&str> = result.instances.iter().map(|i| i.address.as_str()).collect();
        assert_eq!(addresses.len(), 3);
        assert!(addresses.contains(&"10.0.0.1:80"));
        assert!(addresses.contains(&"10.0.0.2:80"));
        assert!(addresses.contains(&"10.0.0.2:81"));
        assert!(!addresses.contains(&"10.0.0.3:80"));

        for instance in &result.instances {
            assert_eq!(instance.network, "tcp");
            assert_eq!(instance.weight, 10);
            assert_eq!(instance.properties.get("zone").map(String::as_str), Some("a"));
        }
    }

    #[smol_potat::test]
    async fn test_resolve_empty_is_no_available_instance() {
        let registry = Arc::new(MemoryRegistry::new());
        let result = resolver(registry.clone()).resolve("demo").await;
        assert!(matches!(result, Err(Error::NoAvailableInstance(ref name)) if name == "demo"));

        seed(&registry, &[(vec!["10.0.0.1:80"], InstanceStatus::Down)]).await;
        let result = resolver(registry).resolve("demo").await;
        assert!(matches!(result, Err(Error::NoAvailableInstance(_))));
    }

    #[smol_potat::test]
    async fn test_resolve_uses_configured_weight() {
        let registry = Arc::new(MemoryRegistry::new());
        seed(&registry, &[(vec!["10.0.0.1:80"], InstanceStatus::Up)]).await;

        let resolver = ServiceCombResolver::new(
            registry,
            ResolverConfig {
                weight: 50,
                ..Default::default()
            },
        );
        let result = resolver.resolve("demo").await.unwrap();
        assert_eq!(result.instances[0].weight, 50);
    }

    struct UnreachableRegistry;

    #[async_trait]
    impl RegistryClient for UnreachableRegistry {
        async fn register_service(
            &self,
            _: &ServiceDescriptor,
        ) -> std::result::Result<String, ClientError> {
            Err(ClientError::Transport("connection refused".to_string()))
        }

        async fn register_instance(
            &self,
            _: &InstanceRegistration,
        ) -> std::result::Result<String, ClientError> {
            Err(ClientError::Transport("connection refused".to_string()))
        }

        async fn heartbeat(&self, _: &str, _: &str) -> std::result::Result<bool, ClientError> {
            Err(ClientError::Transport("connection refused".to_string()))
        }

        async fn find_instances(
            &self,
            _: &InstanceQuery,
        ) -> std::result::Result<Vec<InstanceRecord>, ClientError> {
            Err(ClientError::Transport("connection refused".to_string()))
        }

        async fn get_service_id(
            &self,
            _: &str,
            _: &str,
            _: &str,
        ) -> std::result::Result<String, ClientError> {
            Err(ClientError::Transport("connection refused".to_string()))
        }

        async fn unregister_service(&self, _: &str) -> std::result::Result<(), ClientError> {
            Err(ClientError::Transport("connection refused".to_string()))
        }

        async fn unregister_instance(
            &self,
            _: &str,
            _: &str,
        ) -> std::result::Result<(), ClientError> {
            Err(ClientError::Transport("connection refused".to_string()))
        }
    }

    #[smol_potat::test]
    async fn test_backend_failure_is_resolution_error() {
        let resolver =
            ServiceCombResolver::new(Arc::new(UnreachableRegistry), ResolverConfig::default());
        let err = resolver.resolve("demo").await.unwrap_err();
        assert!(matches!(err, Error::Resolution { ref service, .. } if service == "demo"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[smol_potat::test]
    async fn test_diff_between_resolutions() {
        let registry = Arc::new(MemoryRegistry::new());
        let ids = seed(&registry, &[(vec!["10.0.0.1:80"], InstanceStatus::Up)]).await;
        let resolver = resolver(registry.clone());

        let first = resolver.resolve("demo").await.unwrap();
        let (_, has_change) = resolver.diff("demo", &first, &first);
        assert!(!has_change);

        seed(&registry, &[(vec!["10.0.0.2:80"], InstanceStatus::Up)]).await;
        registry.set_status(&ids[0], InstanceStatus::Down);
        let second = resolver.resolve("demo").await.unwrap();

        let (change, has_change) = resolver.diff("demo", &first, &second);
        assert!(has_change);
        assert_eq!(change.added.len(), 1);
        assert_eq!(change.added[0].address, "10.0.0.2:80");
        assert_eq!(change.removed.len(), 1);
        assert_eq!(change.removed[0].address, "10.0.0.1:80");
        assert!(change.updated.is_empty());
    }
}
