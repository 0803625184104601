//! In-memory registry client

use super::VersionRule;
use crate::client::{ClientError, RegistryClient};
use crate::models::*;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;
use uuid::Uuid;

#[derive(Default)]
struct State {
    /// Service id -> descriptor
    services: HashMap<String, ServiceDescriptor>,
    /// Service id -> instances
    instances: HashMap<String, Vec<InstanceRecord>>,
    /// Instance id -> accepted heartbeats
    heartbeats: HashMap<String, u64>,
}

impl State {
    fn matching_service_ids(&self, app_id: &str, name: &str, version_rule: &str) -> Vec<String> {
        let Some(rule) = VersionRule::parse(version_rule) else {
            return Vec::new();
        };

        let family: Vec<(&String, &ServiceDescriptor)> = self
            .services
            .iter()
            .filter(|(_, d)| d.app_id == app_id && d.name == name)
            .collect();
        let selected = rule.select(family.iter().map(|(_, d)| d.version.as_str()));

        family
            .iter()
            .filter(|(_, d)| selected.contains(&d.version.as_str()))
            .map(|(id, _)| (*id).clone())
            .collect()
    }
}

/// Registry client that keeps everything in process memory
///
/// Useful for embedding a registry in tests or single-process deployments.
/// Instances never expire on their own.
pub struct MemoryRegistry {
    state: RwLock<State>,
}

impl MemoryRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of heartbeats accepted for an instance
    pub fn heartbeat_count(&self, instance_id: &str) -> u64 {
        self.read().heartbeats.get(instance_id).copied().unwrap_or(0)
    }

    /// Change the status of an instance; returns false if it is unknown
    pub fn set_status(&self, instance_id: &str, status: InstanceStatus) -> bool {
        let mut state = self.write();
        let record = state
            .instances
            .values_mut()
            .flat_map(|records| records.iter_mut())
            .find(|r| r.instance_id == instance_id);

        match record {
            Some(record) => {
                record.status = status;
                true
            }
            None => false,
        }
    }

    /// Every instance of every service
    pub fn all_instances(&self) -> Vec<InstanceRecord> {
        self.read().instances.values().flatten().cloned().collect()
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RegistryClient for MemoryRegistry {
    async fn register_service(
        &self,
        descriptor: &ServiceDescriptor,
    ) -> Result<String, ClientError> {
        let mut state = self.write();

        let existing = state.services.iter().find(|(_, d)| {
            d.app_id == descriptor.app_id
                && d.name == descriptor.name
                && d.version == descriptor.version
        });
        if let Some((id, _)) = existing {
            return Ok(id.clone());
        }

        let id = Uuid::new_v4().to_string();
        debug!("Created service {} v{} as {}", descriptor.name, descriptor.version, id);
        state.services.insert(id.clone(), descriptor.clone());
        state.instances.insert(id.clone(), Vec::new());
        Ok(id)
    }

    async fn register_instance(
        &self,
        registration: &InstanceRegistration,
    ) -> Result<String, ClientError> {
        let mut state = self.write();
        let instances = state
            .instances
            .get_mut(&registration.service_id)
            .ok_or_else(|| ClientError::NotFound(format!("service {}", registration.service_id)))?;

        let id = Uuid::new_v4().to_string();
        instances.push(InstanceRecord::from_registration(id.clone(), registration));
        Ok(id)
    }

    async fn heartbeat(&self, service_id: &str, instance_id: &str) -> Result<bool, ClientError> {
        let mut state = self.write();
        let known = state
            .instances
            .get(service_id)
            .is_some_and(|records| records.iter().any(|r| r.instance_id == instance_id));

        if known {
            *state.heartbeats.entry(instance_id.to_string()).or_default() += 1;
        }
        Ok(known)
    }

    async fn find_instances(
        &self,
        query: &InstanceQuery,
    ) -> Result<Vec<InstanceRecord>, ClientError> {
        let state = self.read();
        let ids =
            state.matching_service_ids(&query.app_id, &query.service_name, &query.version_rule);

        Ok(ids
            .iter()
            .filter_map(|id| state.instances.get(id))
            .flatten()
            .cloned()
            .collect())
    }

    async fn get_service_id(
        &self,
        app_id: &str,
        service_name: &str,
        version_rule: &str,
    ) -> Result<String, ClientError> {
        let state = self.read();
        let ids = state.matching_service_ids(app_id, service_name, version_rule);

        // Prefer the newest matching version
        ids.into_iter()
            .max_by_key(|id| {
                state
                    .services
                    .get(id)
                    .and_then(|d| super::Version::parse(&d.version))
            })
            .ok_or_else(|| {
                ClientError::NotFound(format!(
                    "service {}/{} ({})",
                    app_id, service_name, version_rule
                ))
            })
    }

    async fn unregister_service(&self, service_id: &str) -> Result<(), ClientError> {
        let mut state = self.write();
        state
            .services
            .remove(service_id)
            .ok_or_else(|| ClientError::NotFound(format!("service {}", service_id)))?;

        for record in state.instances.remove(service_id).unwrap_or_default() {
            state.heartbeats.remove(&record.instance_id);
        }
        Ok(())
    }

    async fn unregister_instance(
        &self,
        service_id: &str,
        instance_id: &str,
    ) -> Result<(), ClientError> {
        let mut state = self.write();
        let instances = state
            .instances
            .get_mut(service_id)
            .ok_or_else(|| ClientError::NotFound(format!("service {}", service_id)))?;

        let before = instances.len();
        instances.retain(|r| r.instance_id != instance_id);
        if instances.len() == before {
            return Err(ClientError::NotFound(format!("instance {}", instance_id)));
        }

        state.heartbeats.remove(instance_id);
        Ok(())
    }
}
