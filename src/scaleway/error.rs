//! Error types for the Scaleway backend.

use crate::config::ConfigError;
use scaleway_rs::ScalewayError;
use thiserror::Error;

/// Errors raised by the Scaleway backend.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ScalewayBackendError {
    /// Raised when the high-level configuration is incomplete.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised when the requested image label cannot be resolved.
    #[error("image '{label}' (arch {arch}) not found in zone {zone}")]
    ImageNotFound {
        /// Image label passed by the caller.
        label: String,
        /// Architecture requested by the caller.
        arch: String,
        /// Zone used for the lookup.
        zone: String,
    },
    /// Raised when the server type is not available in the selected zone.
    #[error("instance type '{instance_type}' not available in zone {zone}")]
    InstanceTypeUnavailable {
        /// Requested commercial type.
        instance_type: String,
        /// Target zone.
        zone: String,
    },
    /// Raised when an instance cannot be powered on.
    #[error("instance {instance_id} in state {state} cannot be powered on")]
    PowerOnNotAllowed {
        /// Provider instance identifier.
        instance_id: String,
        /// Current state reported by the provider.
        state: String,
    },
    /// Raised when the API answers with an error status.
    #[error("{operation} failed with HTTP {status}: {message}")]
    Api {
        /// Operation being performed.
        operation: &'static str,
        /// HTTP status code.
        status: u16,
        /// Message returned by the API.
        message: String,
    },
    /// Raised when a referenced resource vanished mid-operation.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Resource kind.
        kind: &'static str,
        /// Resource identifier.
        id: String,
    },
    /// Raised for capabilities Scaleway does not offer.
    #[error("{operation} is not supported by Scaleway")]
    Unsupported {
        /// Capability that was requested.
        operation: &'static str,
    },
    /// Raised when a local SSH keypair cannot be generated.
    #[error("failed to generate SSH key {name}: {message}")]
    KeyGeneration {
        /// Keypair name.
        name: String,
        /// Underlying failure.
        message: String,
    },
    /// Wrapper for transport and decoding failures.
    #[error("provider error: {message}")]
    Provider {
        /// Message returned by the provider SDK or HTTP client.
        message: String,
    },
}

impl From<ScalewayError> for ScalewayBackendError {
    fn from(value: ScalewayError) -> Self {
        Self::Provider {
            message: value.to_string(),
        }
    }
}

impl From<ConfigError> for ScalewayBackendError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}
