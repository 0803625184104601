//! Data models shared by the registrar, the resolver and registry clients

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;

/// Network reported for every resolved instance
pub const TCP_NETWORK: &str = "tcp";

/// A logical service family in the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Service name
    pub name: String,
    /// Application the service belongs to
    pub app_id: String,
    /// Version the service is registered under
    pub version: String,
    /// Host name advertised with the service
    pub host_name: String,
}

/// Instance status as reported by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    /// Accepting traffic
    Up,
    /// Not accepting traffic
    Down,
    /// Still starting
    Starting,
    /// Taken out of rotation by an operator
    OutOfService,
    /// Status not reported
    Unknown,
}

/// How the registry learns that an instance is alive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthCheckMode {
    /// The instance sends heartbeats itself
    Push,
    /// The registry probes the instance
    Pull,
}

/// Health-check policy attached to an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Push or pull
    pub mode: HealthCheckMode,
    /// Seconds between heartbeats
    pub interval_secs: u32,
    /// Missed beats tolerated before the registry drops the instance
    pub times: u32,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            mode: HealthCheckMode::Push,
            interval_secs: 30,
            times: 3,
        }
    }
}

/// Request body for registering one instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRegistration {
    /// Owning service id
    pub service_id: String,
    /// Advertised endpoints
    pub endpoints: Vec<String>,
    /// Host name of the instance
    pub host_name: String,
    /// Initial status
    pub status: InstanceStatus,
    /// Health-check policy
    pub health_check: HealthCheck,
    /// Free-form instance properties
    pub properties: HashMap<String, String>,
}

/// An instance as stored in the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Owning service id
    pub service_id: String,
    /// Registry-assigned instance id
    pub instance_id: String,
    /// Advertised endpoints, in registration order
    pub endpoints: Vec<String>,
    /// Host name of the instance
    pub host_name: String,
    /// Current status
    pub status: InstanceStatus,
    /// Free-form instance properties
    pub properties: HashMap<String, String>,
    /// Health-check policy
    pub health_check: HealthCheck,
}

impl InstanceRecord {
    /// Build the stored record for a registration request
    pub fn from_registration(instance_id: String, registration: &InstanceRegistration) -> Self {
        Self {
            service_id: registration.service_id.clone(),
            instance_id,
            endpoints: registration.endpoints.clone(),
            host_name: registration.host_name.clone(),
            status: registration.status,
            properties: registration.properties.clone(),
            health_check: registration.health_check,
        }
    }

    /// Whether the instance advertises the given endpoint (exact match)
    pub fn has_endpoint(&self, endpoint: &str) -> bool {
        self.endpoints.iter().any(|e| e == endpoint)
    }
}

/// Instance lookup parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceQuery {
    /// Id of the consuming service, empty when anonymous
    pub consumer_id: String,
    /// Application id
    pub app_id: String,
    /// Service name
    pub service_name: String,
    /// Version rule (`"1.0.0"`, `"latest"`, `"1.0.0+"`)
    pub version_rule: String,
}

/// What a hosting process asks the registrar to advertise
#[derive(Debug, Clone, Default)]
pub struct ServiceInfo {
    /// Logical service name
    pub service_name: String,
    /// Local listen address; `None` targets the whole service on deregistration
    pub address: Option<SocketAddr>,
    /// Tags, advertised as instance properties
    pub tags: HashMap<String, String>,
    /// Requested weight. The registry has no weight field, so resolvers
    /// apply their own configured weight.
    pub weight: u32,
    /// When the hosting process started
    pub start_time: Option<DateTime<Utc>>,
}

impl ServiceInfo {
    /// Create info for a service listening on `address`
    pub fn new(service_name: impl Into<String>, address: SocketAddr) -> Self {
        Self {
            service_name: service_name.into(),
            address: Some(address),
            ..Default::default()
        }
    }

    /// Add a tag
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// The endpoint string advertised for this info, if it has an address
    pub fn endpoint(&self) -> Option<String> {
        self.address.map(|addr| addr.to_string())
    }
}

/// The calling side of an RPC, as seen by the resolver
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointInfo {
    /// Target service name
    pub service_name: String,
    /// Method being called, if known
    pub method: Option<String>,
    /// Caller-supplied tags
    pub tags: HashMap<String, String>,
}

impl EndpointInfo {
    /// Endpoint info for a service
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }
}

/// One dialable endpoint produced by resolution
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedInstance {
    /// Network, always `"tcp"`
    pub network: String,
    /// Endpoint address as advertised
    pub address: String,
    /// Load-balancing weight
    pub weight: u32,
    /// Properties of the owning instance
    pub properties: BTreeMap<String, String>,
}

impl ResolvedInstance {
    /// Create a TCP instance
    pub fn tcp(address: impl Into<String>, weight: u32) -> Self {
        Self {
            network: TCP_NETWORK.to_string(),
            address: address.into(),
            weight,
            properties: BTreeMap::new(),
        }
    }

    /// Add a property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Result of one resolution
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResolutionResult {
    /// Whether callers may cache the result
    pub cacheable: bool,
    /// Key under which the result is cached
    pub cache_key: String,
    /// Resolved endpoints
    pub instances: Vec<ResolvedInstance>,
}

/// Delta between two resolutions of the same cache key
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Change {
    /// Cache key both results belong to
    pub cache_key: String,
    /// Instances only in the newer result
    pub added: Vec<ResolvedInstance>,
    /// Same address, different weight or properties (newer value)
    pub updated: Vec<ResolvedInstance>,
    /// Instances only in the older result
    pub removed: Vec<ResolvedInstance>,
    /// The newer result
    pub result: ResolutionResult,
}

impl Change {
    /// True when nothing was added, updated or removed
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Lifecycle of one advertised address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationState {
    /// Not known to the registry
    Unregistered,
    /// Registration calls in flight
    Registering,
    /// Discoverable; the liveness task (if any) is running
    Advertised,
    /// Deregistration calls in flight
    Deregistering,
    /// The liveness task gave up and is cleaning up
    HeartbeatFailed,
}

impl RegistrationState {
    /// Check if a state transition is valid
    pub fn can_transition_to(self, to: RegistrationState) -> bool {
        use RegistrationState::*;

        matches!(
            (self, to),
            (Unregistered, Registering)
                | (Registering, Advertised)
                // A failed registration call rolls back
                | (Registering, Unregistered)
                | (Advertised, Deregistering)
                | (Advertised, HeartbeatFailed)
                | (Deregistering, Unregistered)
                | (HeartbeatFailed, Unregistered)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        use RegistrationState::*;

        // Valid transitions
        assert!(Unregistered.can_transition_to(Registering));
        assert!(Registering.can_transition_to(Advertised));
        assert!(Registering.can_transition_to(Unregistered));
        assert!(Advertised.can_transition_to(Deregistering));
        assert!(Advertised.can_transition_to(HeartbeatFailed));
        assert!(Deregistering.can_transition_to(Unregistered));
        assert!(HeartbeatFailed.can_transition_to(Unregistered));

        // Invalid transitions
        assert!(!Unregistered.can_transition_to(Advertised));
        assert!(!Registering.can_transition_to(HeartbeatFailed));
        assert!(!HeartbeatFailed.can_transition_to(Advertised));
        assert!(!Deregistering.can_transition_to(Advertised));
    }

    #[test]
    fn test_instance_status_wire_form() {
        assert_eq!(serde_json::to_string(&InstanceStatus::Up).unwrap(), "\"UP\"");
        assert_eq!(
            serde_json::to_string(&InstanceStatus::OutOfService).unwrap(),
            "\"OUT_OF_SERVICE\""
        );
        let status: InstanceStatus = serde_json::from_str("\"DOWN\"").unwrap();
        assert_eq!(status, InstanceStatus::Down);
    }

    #[test]
    fn test_service_info_endpoint() {
        let info =
            ServiceInfo::new("demo", "127.0.0.1:3000".parse().unwrap()).with_tag("zone", "a");
        assert_eq!(info.endpoint().as_deref(), Some("127.0.0.1:3000"));
        assert_eq!(info.tags.get("zone").map(String::as_str), Some("a"));

        let bare = ServiceInfo {
            service_name: "demo".to_string(),
            ..Default::default()
        };
        assert!(bare.endpoint().is_none());
    }

    #[test]
    fn test_health_check_defaults() {
        let check = HealthCheck::default();
        assert_eq!(check.mode, HealthCheckMode::Push);
        assert_eq!(check.interval_secs, 30);
        assert_eq!(check.times, 3);
    }
}
