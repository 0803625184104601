//! Registration lifecycle of local service instances
//!
//! A registrar advertises one instance per `register` call: it makes sure the
//! service exists, registers the instance, and in push mode starts a
//! [`LivenessTask`] that keeps the instance alive. Each advertised address
//! moves through [`RegistrationState`]; the table of advertisements is the
//! only shared state and is never locked across an `.await`.

use crate::{
    client::{ClientError, RegistryClient},
    config::{KeepAliveMode, RegistrarConfig},
    error::{Error, Result},
    liveness::{LivenessExit, LivenessHandle, LivenessTask},
    models::*,
    runtime::Spawner,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, info, warn};

/// Advertises local instances to a registry
#[async_trait]
pub trait Registrar: Send + Sync {
    /// Advertise the instance described by `info`
    async fn register(&self, info: &ServiceInfo) -> Result<()>;

    /// Withdraw one instance, or the whole service when `info` has no address
    async fn deregister(&self, info: &ServiceInfo) -> Result<()>;
}

/// Snapshot of one advertisement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisedInstance {
    /// Service name
    pub service_name: String,
    /// Advertised endpoint
    pub endpoint: String,
    /// Registry service id, once known
    pub service_id: Option<String>,
    /// Registry instance id, once known
    pub instance_id: Option<String>,
    /// Lifecycle state
    pub state: RegistrationState,
    /// Whether a liveness task is attached
    pub heartbeating: bool,
}

/// (service name, endpoint)
type Key = (String, String);

struct Advertisement {
    service_id: Option<String>,
    instance_id: Option<String>,
    state: RegistrationState,
    liveness: Option<LivenessHandle>,
}

/// Advertisements of one registrar
#[derive(Default)]
struct AdvertisementTable {
    entries: Mutex<HashMap<Key, Advertisement>>,
}

impl AdvertisementTable {
    fn lock(&self) -> MutexGuard<'_, HashMap<Key, Advertisement>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `key` for a new registration
    fn begin_registration(&self, key: &Key) -> Result<()> {
        let mut entries = self.lock();
        if entries.contains_key(key) {
            return Err(Error::AlreadyRegistered {
                service: key.0.clone(),
                address: key.1.clone(),
            });
        }
        entries.insert(
            key.clone(),
            Advertisement {
                service_id: None,
                instance_id: None,
                state: RegistrationState::Registering,
                liveness: None,
            },
        );
        Ok(())
    }

    /// Registering -> Advertised
    fn complete_registration(
        &self,
        key: &Key,
        service_id: &str,
        instance_id: &str,
        liveness: Option<LivenessHandle>,
    ) {
        let mut entries = self.lock();
        if let Some(entry) = entries.get_mut(key) {
            if Self::transition(key, entry, RegistrationState::Advertised) {
                entry.service_id = Some(service_id.to_string());
                entry.instance_id = Some(instance_id.to_string());
                entry.liveness = liveness;
            }
        }
    }

    /// Registering -> Unregistered after a failed registration call
    fn abort_registration(&self, key: &Key) {
        let mut entries = self.lock();
        let registering = entries
            .get(key)
            .is_some_and(|e| e.state == RegistrationState::Registering);
        if registering {
            entries.remove(key);
        }
    }

    /// Advertised -> HeartbeatFailed, only for the instance the task owns
    fn mark_heartbeat_failed(&self, key: &Key, instance_id: &str) {
        let mut entries = self.lock();
        if let Some(entry) = entries.get_mut(key) {
            if entry.instance_id.as_deref() == Some(instance_id) {
                Self::transition(key, entry, RegistrationState::HeartbeatFailed);
            }
        }
    }

    /// HeartbeatFailed -> Unregistered once the task has cleaned up
    fn finish_heartbeat_failure(&self, key: &Key, instance_id: &str) {
        let mut entries = self.lock();
        let failed = entries.get(key).is_some_and(|e| {
            e.state == RegistrationState::HeartbeatFailed
                && e.instance_id.as_deref() == Some(instance_id)
        });
        if failed {
            entries.remove(key);
        }
    }

    /// Stop heartbeats for the matching advertisements and mark them as
    /// Deregistering
    fn begin_deregistration(&self, matches: impl Fn(&Key) -> bool) -> Vec<Key> {
        let mut entries = self.lock();
        let mut withdrawn = Vec::new();
        for (key, entry) in entries.iter_mut().filter(|(k, _)| matches(*k)) {
            if let Some(handle) = entry.liveness.take() {
                handle.cancel();
            }
            if Self::transition(key, entry, RegistrationState::Deregistering) {
                withdrawn.push(key.clone());
            }
        }
        withdrawn
    }

    /// Deregistering -> Unregistered
    fn finish_deregistration(&self, keys: &[Key]) {
        let mut entries = self.lock();
        for key in keys {
            let deregistering = entries
                .get(key)
                .is_some_and(|e| e.state == RegistrationState::Deregistering);
            if deregistering {
                entries.remove(key);
            }
        }
    }

    /// Service id learned by an earlier registration
    fn cached_service_id(&self, service_name: &str) -> Option<String> {
        self.lock()
            .iter()
            .filter(|((service, _), _)| service == service_name)
            .find_map(|(_, entry)| entry.service_id.clone())
    }

    /// Cancel every liveness task and forget the advertisements it kept alive
    ///
    /// Passive advertisements stay, since the registry keeps them alive.
    fn release_heartbeating(&self) -> usize {
        let mut entries = self.lock();
        let mut cancelled = 0;
        entries.retain(|_, entry| match entry.liveness.take() {
            Some(handle) => {
                handle.cancel();
                cancelled += 1;
                false
            }
            None => true,
        });
        cancelled
    }

    fn state(&self, key: &Key) -> RegistrationState {
        self.lock()
            .get(key)
            .map(|e| e.state)
            .unwrap_or(RegistrationState::Unregistered)
    }

    fn snapshot(&self) -> Vec<AdvertisedInstance> {
        self.lock()
            .iter()
            .map(|((service, endpoint), entry)| AdvertisedInstance {
                service_name: service.clone(),
                endpoint: endpoint.clone(),
                service_id: entry.service_id.clone(),
                instance_id: entry.instance_id.clone(),
                state: entry.state,
                heartbeating: entry.liveness.is_some(),
            })
            .collect()
    }

    fn transition(key: &Key, entry: &mut Advertisement, to: RegistrationState) -> bool {
        if entry.state.can_transition_to(to) {
            debug!("{} at {}: {:?} -> {:?}", key.0, key.1, entry.state, to);
            entry.state = to;
            true
        } else {
            debug!(
                "{} at {}: ignoring transition {:?} -> {:?}",
                key.0, key.1, entry.state, to
            );
            false
        }
    }
}

/// Registrar backed by a ServiceComb-style registry
///
/// Dropping the registrar cancels its liveness tasks without deregistering;
/// the registry then expires the instances after the missed-beat allowance.
pub struct ServiceCombRegistrar {
    client: Arc<dyn RegistryClient>,
    config: RegistrarConfig,
    spawner: Arc<dyn Spawner>,
    table: Arc<AdvertisementTable>,
}

impl ServiceCombRegistrar {
    /// Create a registrar; liveness tasks run on `spawner`
    pub fn new(
        client: Arc<dyn RegistryClient>,
        config: RegistrarConfig,
        spawner: Arc<dyn Spawner>,
    ) -> Self {
        Self {
            client,
            config,
            spawner,
            table: Arc::new(AdvertisementTable::default()),
        }
    }

    /// The active configuration
    pub fn config(&self) -> &RegistrarConfig {
        &self.config
    }

    /// Lifecycle state of `address` under `service_name`
    pub fn state(&self, service_name: &str, address: &SocketAddr) -> RegistrationState {
        self.table
            .state(&(service_name.to_string(), address.to_string()))
    }

    /// Everything this registrar currently tracks
    pub fn advertised(&self) -> Vec<AdvertisedInstance> {
        self.table.snapshot()
    }

    /// Stop every liveness task without deregistering anything
    ///
    /// Deregistration stays the caller's job on shutdown. The stopped
    /// addresses are forgotten and may be registered again.
    pub fn shutdown(&self) {
        let cancelled = self.table.release_heartbeating();
        info!("Registrar shut down, {} liveness tasks cancelled", cancelled);
    }

    fn descriptor(&self, service_name: &str) -> ServiceDescriptor {
        ServiceDescriptor {
            name: service_name.to_string(),
            app_id: self.config.app_id.clone(),
            version: self.config.version_rule.clone(),
            host_name: self.config.host_name.clone(),
        }
    }

    /// Register service then instance; returns (service id, instance id)
    async fn advertise(&self, info: &ServiceInfo, endpoint: &str) -> Result<(String, String)> {
        let service = info.service_name.as_str();
        let registration_error = |operation: &'static str| {
            move |source: ClientError| Error::Registration {
                operation,
                service: service.to_string(),
                source,
            }
        };

        let service_id = self
            .client
            .register_service(&self.descriptor(service))
            .await
            .map_err(registration_error("register service"))?;

        let registration = InstanceRegistration {
            service_id: service_id.clone(),
            endpoints: vec![endpoint.to_string()],
            host_name: self.config.host_name.clone(),
            status: InstanceStatus::Up,
            health_check: self.config.health_check(),
            properties: info.tags.clone(),
        };
        let instance_id = self
            .client
            .register_instance(&registration)
            .await
            .map_err(registration_error("register instance"))?;

        Ok((service_id, instance_id))
    }

    fn start_liveness(
        &self,
        key: &Key,
        service_id: &str,
        instance_id: &str,
    ) -> (LivenessHandle, LivenessTask) {
        let (task, handle) = LivenessTask::new(
            self.client.clone(),
            key.0.clone(),
            service_id,
            instance_id,
            self.config.heartbeat_interval(),
        );

        let table: Weak<AdvertisementTable> = Arc::downgrade(&self.table);
        let hook_key = key.clone();
        let hook_instance = instance_id.to_string();
        let task = task.on_failure(move || {
            if let Some(table) = table.upgrade() {
                table.mark_heartbeat_failed(&hook_key, &hook_instance);
            }
        });
        (handle, task)
    }

    fn spawn_liveness(&self, key: Key, instance_id: String, task: LivenessTask) {
        let table = Arc::downgrade(&self.table);
        self.spawner.spawn(Box::pin(async move {
            if task.run().await == LivenessExit::HeartbeatFailed {
                if let Some(table) = table.upgrade() {
                    table.finish_heartbeat_failure(&key, &instance_id);
                }
            }
        }));
    }
}

fn validate_service_name(info: &ServiceInfo) -> Result<&str> {
    if info.service_name.trim().is_empty() {
        return Err(Error::Validation("service name can not be empty".to_string()));
    }
    Ok(&info.service_name)
}

#[async_trait]
impl Registrar for ServiceCombRegistrar {
    async fn register(&self, info: &ServiceInfo) -> Result<()> {
        let service = validate_service_name(info)?;
        let endpoint = info
            .endpoint()
            .ok_or_else(|| Error::Validation("address can not be empty".to_string()))?;

        let key = (service.to_string(), endpoint.clone());
        self.table.begin_registration(&key)?;

        let (service_id, instance_id) = match self.advertise(info, &endpoint).await {
            Ok(ids) => ids,
            Err(e) => {
                self.table.abort_registration(&key);
                return Err(e);
            }
        };

        match self.config.keep_alive {
            KeepAliveMode::Push => {
                let (handle, task) = self.start_liveness(&key, &service_id, &instance_id);
                self.table
                    .complete_registration(&key, &service_id, &instance_id, Some(handle));
                self.spawn_liveness(key, instance_id.clone(), task);
            }
            KeepAliveMode::Passive => {
                self.table
                    .complete_registration(&key, &service_id, &instance_id, None);
            }
        }

        if let Some(started) = info.start_time {
            debug!("{} at {} started at {}", service, endpoint, started);
        }
        info!(
            "Registered {} at {} (service {}, instance {}, keep-alive {:?})",
            service, endpoint, service_id, instance_id, self.config.keep_alive
        );
        Ok(())
    }

    async fn deregister(&self, info: &ServiceInfo) -> Result<()> {
        let service = validate_service_name(info)?;
        let deregistration_error = |operation: &'static str| {
            move |source: ClientError| Error::Deregistration {
                operation,
                service: service.to_string(),
                source,
            }
        };

        let Some(endpoint) = info.endpoint() else {
            let service_id = match self.table.cached_service_id(service) {
                Some(id) => id,
                None => self
                    .client
                    .get_service_id(&self.config.app_id, service, &self.config.version_rule)
                    .await
                    .map_err(deregistration_error("look up service id"))?,
            };

            let withdrawn = self.table.begin_deregistration(|(s, _)| s == service);
            let result = self.client.unregister_service(&service_id).await;
            // Heartbeats already stopped, so the local entries go either way
            self.table.finish_deregistration(&withdrawn);
            result.map_err(deregistration_error("unregister service"))?;

            info!("Deregistered service {} ({})", service, service_id);
            return Ok(());
        };

        let key = (service.to_string(), endpoint.clone());
        let withdrawn = self.table.begin_deregistration(|k| *k == key);

        let query = InstanceQuery {
            consumer_id: String::new(),
            app_id: self.config.app_id.clone(),
            service_name: service.to_string(),
            version_rule: self.config.version_rule.clone(),
        };
        let instances = match self.client.find_instances(&query).await {
            Ok(instances) => instances,
            Err(e) => {
                self.table.finish_deregistration(&withdrawn);
                return Err(deregistration_error("find instances")(e));
            }
        };

        let Some(instance) = instances.iter().find(|i| i.has_endpoint(&endpoint)) else {
            self.table.finish_deregistration(&withdrawn);
            debug!("No instance of {} at {}, nothing to deregister", service, endpoint);
            return Ok(());
        };

        let result = self
            .client
            .unregister_instance(&instance.service_id, &instance.instance_id)
            .await;
        self.table.finish_deregistration(&withdrawn);
        result.map_err(deregistration_error("unregister instance"))?;

        info!(
            "Deregistered {} at {} (instance {})",
            service, endpoint, instance.instance_id
        );
        Ok(())
    }
}

impl Drop for ServiceCombRegistrar {
    fn drop(&mut self) {
        let cancelled = self.table.release_heartbeating();
        if cancelled > 0 {
            warn!(
                "Registrar dropped with {} live instances; heartbeats stopped",
                cancelled
            );
        }
    }
}
