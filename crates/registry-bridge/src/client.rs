//! The registry client capability consumed by the registrar and resolver
//!
//! Implementations own the wire protocol to the backend registry. The core
//! only relies on the operations below and treats every failure as opaque.

use crate::models::{InstanceQuery, InstanceRecord, InstanceRegistration, ServiceDescriptor};
use async_trait::async_trait;
use thiserror::Error;

/// Failure reported by a registry client
#[derive(Error, Debug)]
pub enum ClientError {
    /// The request never got an answer
    #[error("transport failure: {0}")]
    Transport(String),

    /// The registry answered with an error
    #[error("registry rejected request: {0}")]
    Rejected(String),

    /// The addressed service or instance does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Any other client-specific failure
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Operations a backend registry must offer
///
/// Implementations must be safe for concurrent use; the resolver calls
/// `find_instances` from many tasks at once.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Create the service if missing and return its id
    ///
    /// Must be idempotent: registering an existing descriptor returns the
    /// existing id.
    async fn register_service(
        &self,
        descriptor: &ServiceDescriptor,
    ) -> Result<String, ClientError>;

    /// Register an instance and return its id
    async fn register_instance(
        &self,
        registration: &InstanceRegistration,
    ) -> Result<String, ClientError>;

    /// Send one heartbeat; `Ok(false)` means the registry refused it
    async fn heartbeat(&self, service_id: &str, instance_id: &str) -> Result<bool, ClientError>;

    /// List the instances matching a query
    async fn find_instances(
        &self,
        query: &InstanceQuery,
    ) -> Result<Vec<InstanceRecord>, ClientError>;

    /// Look up a service id
    async fn get_service_id(
        &self,
        app_id: &str,
        service_name: &str,
        version_rule: &str,
    ) -> Result<String, ClientError>;

    /// Remove a service and all of its instances
    async fn unregister_service(&self, service_id: &str) -> Result<(), ClientError>;

    /// Remove one instance
    async fn unregister_instance(
        &self,
        service_id: &str,
        instance_id: &str,
    ) -> Result<(), ClientError>;
}
