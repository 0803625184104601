//! Runtime-agnostic registration and discovery against a ServiceComb-style registry
//!
//! This crate lets a process advertise its own service instances to a shared
//! registry and resolve the live instances of the services it calls.
//!
//! # Architecture
//!
//! - [`ServiceCombRegistrar`] registers instances and, in push mode, keeps
//!   each one alive with a [`LivenessTask`] that runs on a caller-supplied
//!   [`Spawner`]
//! - [`ServiceCombResolver`] turns a service name into the `Up` endpoints the
//!   registry knows about, and [`default_diff`] reports what changed between
//!   two resolutions
//! - Both talk to the registry through the [`RegistryClient`] trait;
//!   [`MemoryRegistry`] is an in-process implementation
//!
//! No executor is named anywhere in the core. Pick one with the `smol`
//! (default) or `tokio` feature.
//!
//! # Example
//!
//! ```no_run
//! use registry_bridge::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> registry_bridge::Result<()> {
//! let registry = Arc::new(MemoryRegistry::new());
//! let registrar = ServiceCombRegistrar::new(
//!     registry.clone(),
//!     RegistrarConfig::default(),
//!     Arc::new(SmolSpawner),
//! );
//!
//! registrar
//!     .register(&ServiceInfo::new("orders", "127.0.0.1:8080".parse().unwrap()))
//!     .await?;
//!
//! let resolver = ServiceCombResolver::new(registry, ResolverConfig::default());
//! let found = resolver.resolve("orders").await?;
//! assert_eq!(found.instances.len(), 1);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod backend;
pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod liveness;
pub mod models;
pub mod registrar;
pub mod resolver;
pub mod runtime;

pub use backend::MemoryRegistry;
pub use client::{ClientError, RegistryClient};
pub use config::{BridgeConfig, KeepAliveMode, RegistrarConfig, ResolverConfig};
pub use discovery::default_diff;
pub use error::{Error, Result};
pub use liveness::{LivenessExit, LivenessHandle, LivenessTask};
pub use models::*;
pub use registrar::{AdvertisedInstance, Registrar, ServiceCombRegistrar};
pub use resolver::{Resolver, ServiceCombResolver};
#[cfg(feature = "smol")]
pub use runtime::SmolSpawner;
#[cfg(feature = "tokio")]
pub use runtime::TokioSpawner;
pub use runtime::{Spawner, sleep};

/// Re-export key types for convenience
pub mod prelude {
    #[cfg(feature = "smol")]
    pub use crate::SmolSpawner;
    pub use crate::{
        Error, MemoryRegistry, Registrar, RegistrarConfig, RegistryClient, Resolver,
        ResolverConfig, Result, ServiceCombRegistrar, ServiceCombResolver, ServiceInfo, Spawner,
    };
}
