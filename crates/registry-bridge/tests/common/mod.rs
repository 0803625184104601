//! Common test utilities for registry bridge integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use registry_bridge::{
    ClientError, InstanceQuery, InstanceRecord, InstanceRegistration, MemoryRegistry,
    RegistryClient, ServiceDescriptor,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Heartbeat interval used by tests that wait for beats
pub const BEAT: Duration = Duration::from_secs(1);

/// Loopback address on `port`
pub fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// Memory registry that counts calls and can be told to fail
#[derive(Default)]
pub struct FlakyRegistry {
    pub inner: MemoryRegistry,
    pub calls: AtomicUsize,
    pub heartbeats: AtomicUsize,
    pub unregister_instances: AtomicUsize,
    pub unregister_services: AtomicUsize,
    pub fail_heartbeats: AtomicBool,
    pub fail_register_instance: AtomicBool,
}

impl FlakyRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn endpoints(&self) -> Vec<String> {
        let mut endpoints: Vec<String> = self
            .inner
            .all_instances()
            .into_iter()
            .flat_map(|r| r.endpoints)
            .collect();
        endpoints.sort();
        endpoints
    }

    fn called(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RegistryClient for FlakyRegistry {
    async fn register_service(
        &self,
        descriptor: &ServiceDescriptor,
    ) -> Result<String, ClientError> {
        self.called();
        self.inner.register_service(descriptor).await
    }

    async fn register_instance(
        &self,
        registration: &InstanceRegistration,
    ) -> Result<String, ClientError> {
        self.called();
        if self.fail_register_instance.load(Ordering::SeqCst) {
            return Err(ClientError::Rejected("instance quota exceeded".to_string()));
        }
        self.inner.register_instance(registration).await
    }

    async fn heartbeat(&self, service_id: &str, instance_id: &str) -> Result<bool, ClientError> {
        self.called();
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        if self.fail_heartbeats.load(Ordering::SeqCst) {
            return Err(ClientError::Transport("connection reset".to_string()));
        }
        self.inner.heartbeat(service_id, instance_id).await
    }

    async fn find_instances(
        &self,
        query: &InstanceQuery,
    ) -> Result<Vec<InstanceRecord>, ClientError> {
        self.called();
        self.inner.find_instances(query).await
    }

    async fn get_service_id(
        &self,
        app_id: &str,
        service_name: &str,
        version_rule: &str,
    ) -> Result<String, ClientError> {
        self.called();
        self.inner.get_service_id(app_id, service_name, version_rule).await
    }

    async fn unregister_service(&self, service_id: &str) -> Result<(), ClientError> {
        self.called();
        self.unregister_services.fetch_add(1, Ordering::SeqCst);
        self.inner.unregister_service(service_id).await
    }

    async fn unregister_instance(
        &self,
        service_id: &str,
        instance_id: &str,
    ) -> Result<(), ClientError> {
        self.called();
        self.unregister_instances.fetch_add(1, Ordering::SeqCst);
        self.inner.unregister_instance(service_id, instance_id).await
    }
}
