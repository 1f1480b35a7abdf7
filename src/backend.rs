//! Cloud backend abstraction for managing named demo instances.
//!
//! The lifecycle core only depends on the capability surface described by
//! [`CloudBackend`]; provider wire formats stay inside the implementations.

use std::collections::BTreeMap;
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;

use thiserror::Error;

/// Tag key used to discover instances by name.
pub const NAME_TAG: &str = "Name";

/// Coarse lifecycle state reported for an instance.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InstanceState {
    /// Created but not yet running.
    Pending,
    /// Booted and reachable through the provider network.
    Running,
    /// Terminated or no longer visible.
    Terminated,
    /// Any state the backend cannot classify.
    Unknown,
}

impl InstanceState {
    /// Returns `true` while the instance may still reach [`Self::Running`].
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Lower-case label used in progress messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Terminated => "terminated",
            Self::Unknown => "unknown",
        }
    }
}

/// A compute instance identified by its `Name` tag.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NamedInstance {
    /// Provider specific identifier.
    pub id: String,
    /// Last state reported by the provider.
    pub state: InstanceState,
    /// Public address, once assigned.
    pub address: Option<IpAddr>,
    /// Key/value tags attached to the instance.
    pub tags: BTreeMap<String, String>,
}

impl NamedInstance {
    /// Returns the instance name, accepting a lower-case `name` tag too.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.tags
            .get(NAME_TAG)
            .or_else(|| self.tags.get("name"))
            .map(String::as_str)
    }

    /// Returns `true` when the instance carries the given name.
    #[must_use]
    pub fn is_named(&self, name: &str) -> bool {
        self.name() == Some(name)
    }

    /// Returns `true` when the instance is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == InstanceState::Running
    }
}

/// Named firewall policy applied to new instances.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SecurityPolicy {
    /// Provider identifier.
    pub id: String,
    /// Policy name (matches the instance name when created by this crate).
    pub name: String,
}

/// Public-key record registered with the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyPairRecord {
    /// Keypair name.
    pub name: String,
    /// Fingerprint of the registered key, when reported.
    pub fingerprint: Option<String>,
}

/// Freshly created keypair. The private key is only ever available here.
#[derive(Clone, Eq, PartialEq)]
pub struct KeyMaterial {
    /// Keypair name.
    pub name: String,
    /// PEM/OpenSSH encoded private key.
    pub private_key: String,
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("name", &self.name)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Fully resolved parameters for a provider creation call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LaunchSpec {
    /// Image identifier or label.
    pub image: String,
    /// Commercial type or flavour.
    pub instance_type: String,
    /// Name of the registered keypair used for SSH access.
    pub key_name: String,
    /// Security policy applied to the instance.
    pub security_policy: SecurityPolicy,
}

/// Spot request lifecycle states.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SpotState {
    /// Waiting for the market to fulfil the bid.
    Open,
    /// Fulfilled; an instance is assigned.
    Active,
    /// Closed by the provider.
    Closed,
    /// Cancelled by a caller.
    Cancelled,
    /// Rejected by the provider.
    Failed,
}

impl SpotState {
    /// Returns `true` for requests that can still launch capacity.
    #[must_use]
    pub const fn is_outstanding(self) -> bool {
        matches!(self, Self::Open | Self::Active)
    }

    /// Lower-case label used in messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Active => "active",
            Self::Closed => "closed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

/// A spot-bid request as reported by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SpotRequest {
    /// Provider identifier.
    pub id: String,
    /// Current state.
    pub state: SpotState,
    /// Instance assigned once the request is active.
    pub instance_id: Option<String>,
    /// Instance name the request was placed for.
    pub name: Option<String>,
}

/// Parameters of a `connect` call.
#[derive(Clone, Debug, PartialEq)]
pub struct LaunchRequest {
    /// Name tag to reuse or create.
    pub name: String,
    /// Image identifier or label used when a new instance is created.
    pub image: String,
    /// Instance type used when a new instance is created.
    pub instance_type: String,
    /// TCP ports opened when the security policy is created.
    pub ports: Vec<u16>,
    /// Spot bid price; absent or non-positive means on-demand.
    pub bid_price: Option<f64>,
}

impl LaunchRequest {
    /// Starts a builder for a [`LaunchRequest`].
    #[must_use]
    pub fn builder() -> LaunchRequestBuilder {
        LaunchRequestBuilder::new()
    }

    /// Returns the bid price when spot provisioning is requested.
    #[must_use]
    pub fn spot_bid(&self) -> Option<f64> {
        self.bid_price.filter(|price| *price > 0.0)
    }

    /// Validates the request.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Validation`] when a string field is empty.
    pub fn validate(&self) -> Result<(), BackendError> {
        if self.name.is_empty() {
            return Err(BackendError::Validation("name".to_owned()));
        }
        if self.image.is_empty() {
            return Err(BackendError::Validation("image".to_owned()));
        }
        if self.instance_type.is_empty() {
            return Err(BackendError::Validation("instance_type".to_owned()));
        }
        Ok(())
    }
}

/// Builder for [`LaunchRequest`] trimming string inputs on build.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LaunchRequestBuilder {
    name: String,
    image: String,
    instance_type: String,
    ports: Vec<u16>,
    bid_price: Option<f64>,
}

impl LaunchRequestBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the instance name.
    #[must_use]
    pub fn name(mut self, value: impl Into<String>) -> Self {
        self.name = value.into();
        self
    }

    /// Sets the image.
    #[must_use]
    pub fn image(mut self, value: impl Into<String>) -> Self {
        self.image = value.into();
        self
    }

    /// Sets the instance type.
    #[must_use]
    pub fn instance_type(mut self, value: impl Into<String>) -> Self {
        self.instance_type = value.into();
        self
    }

    /// Sets the ports opened on a newly created security policy.
    #[must_use]
    pub fn ports(mut self, value: impl IntoIterator<Item = u16>) -> Self {
        self.ports = value.into_iter().collect();
        self
    }

    /// Sets the optional spot bid price.
    #[must_use]
    pub const fn bid_price(mut self, value: Option<f64>) -> Self {
        self.bid_price = value;
        self
    }

    /// Builds and validates the request.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Validation`] when a required field is empty.
    pub fn build(self) -> Result<LaunchRequest, BackendError> {
        let mut ports = self.ports;
        ports.dedup();
        let request = LaunchRequest {
            name: self.name.trim().to_owned(),
            image: self.image.trim().to_owned(),
            instance_type: self.instance_type.trim().to_owned(),
            ports,
            bid_price: self.bid_price,
        };
        request.validate()?;
        Ok(request)
    }
}

/// Errors raised by backend-agnostic validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum BackendError {
    /// Raised when a request is missing a required field.
    #[error("missing or empty field: {0}")]
    Validation(String),
}

/// Future returned by backend operations.
pub type BackendFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Capability surface of a cloud provider.
pub trait CloudBackend {
    /// Provider specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Lists every instance visible to the configured account.
    fn list_instances(&self) -> BackendFuture<'_, Vec<NamedInstance>, Self::Error>;

    /// Fetches a single instance, returning `None` once it no longer exists.
    fn describe_instance<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> BackendFuture<'a, Option<NamedInstance>, Self::Error>;

    /// Creates on-demand capacity and returns every instance the call produced.
    fn run_instances<'a>(
        &'a self,
        spec: &'a LaunchSpec,
    ) -> BackendFuture<'a, Vec<NamedInstance>, Self::Error>;

    /// Adds or replaces a tag on an instance.
    fn tag_instance<'a>(
        &'a self,
        instance_id: &'a str,
        key: &'a str,
        value: &'a str,
    ) -> BackendFuture<'a, (), Self::Error>;

    /// Terminates an instance.
    fn terminate_instance<'a>(&'a self, instance_id: &'a str)
    -> BackendFuture<'a, (), Self::Error>;

    /// Looks up a security policy by name.
    fn find_security_policy<'a>(
        &'a self,
        name: &'a str,
    ) -> BackendFuture<'a, Option<SecurityPolicy>, Self::Error>;

    /// Creates an empty security policy.
    fn create_security_policy<'a>(
        &'a self,
        name: &'a str,
        description: &'a str,
    ) -> BackendFuture<'a, SecurityPolicy, Self::Error>;

    /// Opens `port` over TCP to all sources.
    fn authorize_ingress<'a>(
        &'a self,
        policy: &'a SecurityPolicy,
        port: u16,
    ) -> BackendFuture<'a, (), Self::Error>;

    /// Looks up a registered keypair by name.
    fn find_key_pair<'a>(
        &'a self,
        name: &'a str,
    ) -> BackendFuture<'a, Option<KeyPairRecord>, Self::Error>;

    /// Creates and registers a new keypair, returning its private material.
    fn create_key_pair<'a>(&'a self, name: &'a str) -> BackendFuture<'a, KeyMaterial, Self::Error>;

    /// Places a spot bid for one instance named `name`.
    fn request_spot<'a>(
        &'a self,
        spec: &'a LaunchSpec,
        bid_price: f64,
        name: &'a str,
    ) -> BackendFuture<'a, SpotRequest, Self::Error>;

    /// Fetches the current state of a spot request.
    fn describe_spot_request<'a>(
        &'a self,
        request_id: &'a str,
    ) -> BackendFuture<'a, SpotRequest, Self::Error>;

    /// Lists every spot request visible to the account.
    fn list_spot_requests(&self) -> BackendFuture<'_, Vec<SpotRequest>, Self::Error>;

    /// Cancels the given spot requests in a single call.
    fn cancel_spot_requests<'a>(
        &'a self,
        request_ids: &'a [String],
    ) -> BackendFuture<'a, (), Self::Error>;
}
