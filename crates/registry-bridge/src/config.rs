//! Configuration structures for the registrar and resolver

use crate::error::Result;
use crate::models::{HealthCheck, HealthCheckMode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Application id used when none is configured
pub const DEFAULT_APP_ID: &str = "DEFAULT";

/// How a registered instance proves it is alive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeepAliveMode {
    /// A local liveness task sends heartbeats
    #[default]
    Push,
    /// The registry monitors the instance; nothing runs locally
    Passive,
}

/// Bridge configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Registrar configuration
    pub registrar: RegistrarConfig,
    /// Resolver configuration
    pub resolver: ResolverConfig,
}

/// Registrar configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrarConfig {
    /// Application the service is registered under
    pub app_id: String,
    /// Version the service is registered under, also used for lookups
    pub version_rule: String,
    /// Host name advertised with each instance
    pub host_name: String,
    /// Seconds between heartbeats
    pub heartbeat_interval_secs: u32,
    /// Missed heartbeats the registry tolerates
    pub missed_heartbeats: u32,
    /// Push heartbeats locally or rely on registry-side monitoring
    pub keep_alive: KeepAliveMode,
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self {
            app_id: DEFAULT_APP_ID.to_string(),
            version_rule: "1.0.0".to_string(),
            host_name: String::new(),
            heartbeat_interval_secs: 30,
            missed_heartbeats: 3,
            keep_alive: KeepAliveMode::Push,
        }
    }
}

impl RegistrarConfig {
    /// Health-check policy sent with each instance
    pub fn health_check(&self) -> HealthCheck {
        let defaults = HealthCheck::default();
        HealthCheck {
            mode: match self.keep_alive {
                KeepAliveMode::Push => HealthCheckMode::Push,
                KeepAliveMode::Passive => HealthCheckMode::Pull,
            },
            // Zero falls back to the registry defaults
            interval_secs: if self.heartbeat_interval_secs > 0 {
                self.heartbeat_interval_secs
            } else {
                defaults.interval_secs
            },
            times: if self.missed_heartbeats > 0 {
                self.missed_heartbeats
            } else {
                defaults.times
            },
        }
    }

    /// Period of the liveness task
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.health_check().interval_secs))
    }
}

/// Resolver configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Application to look services up in
    pub app_id: String,
    /// Version rule for lookups
    pub version_rule: String,
    /// Id of the consuming service, empty when anonymous
    pub consumer_id: String,
    /// Weight given to every resolved endpoint
    pub weight: u32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            app_id: DEFAULT_APP_ID.to_string(),
            version_rule: "latest".to_string(),
            consumer_id: String::new(),
            weight: 10,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from file
    pub async fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use async_fs::File;
        use futures::io::AsyncReadExt;

        let mut file = File::open(path.as_ref()).await?;
        let mut contents = String::new();
        file.read_to_string(&mut contents).await?;

        // YAML by extension, JSON otherwise
        match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(&contents)?),
            _ => Ok(serde_json::from_str(&contents)?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.registrar.app_id, "DEFAULT");
        assert_eq!(config.registrar.version_rule, "1.0.0");
        assert_eq!(config.registrar.keep_alive, KeepAliveMode::Push);
        assert_eq!(config.registrar.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.resolver.version_rule, "latest");
        assert_eq!(config.resolver.weight, 10);
    }

    #[test]
    fn test_health_check_policy() {
        let passive = RegistrarConfig {
            keep_alive: KeepAliveMode::Passive,
            heartbeat_interval_secs: 0,
            missed_heartbeats: 5,
            ..Default::default()
        };
        let check = passive.health_check();
        assert_eq!(check.mode, HealthCheckMode::Pull);
        assert_eq!(check.interval_secs, 30);
        assert_eq!(check.times, 5);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "registrar:\n  app_id: shop\n  keep_alive: passive\n";
        let config: BridgeConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.registrar.app_id, "shop");
        assert_eq!(config.registrar.keep_alive, KeepAliveMode::Passive);
        assert_eq!(config.registrar.version_rule, "1.0.0");
        assert_eq!(config.resolver, ResolverConfig::default());
    }

    #[smol_potat::test]
    async fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();

        let yaml_path = dir.path().join("bridge.yaml");
        let mut yaml = std::fs::File::create(&yaml_path).unwrap();
        writeln!(yaml, "resolver:\n  consumer_id: gateway\n  weight: 20").unwrap();
        let config = BridgeConfig::from_file(&yaml_path).await.unwrap();
        assert_eq!(config.resolver.consumer_id, "gateway");
        assert_eq!(config.resolver.weight, 20);

        let json_path = dir.path().join("bridge.json");
        std::fs::write(&json_path, r#"{"registrar": {"heartbeat_interval_secs": 5}}"#).unwrap();
        let config = BridgeConfig::from_file(&json_path).await.unwrap();
        assert_eq!(config.registrar.heartbeat_interval_secs, 5);

        let missing = BridgeConfig::from_file(dir.path().join("missing.json")).await;
        assert!(matches!(missing, Err(crate::Error::Io(_))));
    }
}
