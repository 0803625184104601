//! Error types for the registry bridge

use crate::client::ClientError;
use thiserror::Error;

/// Registry bridge error type
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input; the caller must fix the call
    #[error("Invalid service info: {0}")]
    Validation(String),

    /// The address is already advertised by this registrar
    #[error("Service {service} is already advertised at {address}")]
    AlreadyRegistered {
        /// Service name
        service: String,
        /// Advertised address
        address: String,
    },

    /// A backend call failed while registering
    #[error("Failed to {operation} for service {service}: {source}")]
    Registration {
        /// Operation that failed (e.g. "register service")
        operation: &'static str,
        /// Service name
        service: String,
        /// Backend cause
        #[source]
        source: ClientError,
    },

    /// A backend call failed while deregistering
    #[error("Failed to {operation} for service {service}: {source}")]
    Deregistration {
        /// Operation that failed (e.g. "unregister instance")
        operation: &'static str,
        /// Service name
        service: String,
        /// Backend cause
        #[source]
        source: ClientError,
    },

    /// The backend query failed during resolution
    #[error("Failed to resolve {service}: {source}")]
    Resolution {
        /// Queried service name
        service: String,
        /// Backend cause
        #[source]
        source: ClientError,
    },

    /// The backend answered but no instance is up
    #[error("No instance remains for {0}")]
    NoAvailableInstance(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization error
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
