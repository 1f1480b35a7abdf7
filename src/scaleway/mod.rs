//! Scaleway implementation of the cloud backend.
//!
//! Instances, security groups, and tags go through the Instance API. SSH keys
//! are generated locally and registered with the IAM API, which Scaleway
//! injects into every new instance of the project. Scaleway has no spot
//! market, so spot operations report [`ScalewayBackendError::Unsupported`].

mod error;
mod lifecycle;
mod types;

use scaleway_rs::ScalewayApi;

use crate::backend::{
    BackendFuture, CloudBackend, KeyMaterial, KeyPairRecord, LaunchSpec, NamedInstance,
    SecurityPolicy, SpotRequest,
};
use crate::config::ScalewayConfig;
use types::Zone;

pub use error::ScalewayBackendError;

const DEFAULT_KEYGEN_BIN: &str = "ssh-keygen";

/// Backend that manages instances through the Scaleway APIs.
#[derive(Clone)]
pub struct ScalewayBackend {
    api: ScalewayApi,
    config: ScalewayConfig,
    zone: Zone,
    keygen_bin: String,
}

impl ScalewayBackend {
    /// Constructs a new backend from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ScalewayBackendError::Config`] when the provided configuration
    /// fails validation.
    pub fn new(config: ScalewayConfig) -> Result<Self, ScalewayBackendError> {
        config.validate()?;
        Ok(Self {
            api: ScalewayApi::new(&config.secret_key),
            zone: Zone::from(config.default_zone.as_str()),
            config,
            keygen_bin: DEFAULT_KEYGEN_BIN.to_owned(),
        })
    }

    /// Returns the zone every call targets.
    #[must_use]
    pub fn zone(&self) -> &str {
        self.zone.as_str()
    }
}

impl CloudBackend for ScalewayBackend {
    type Error = ScalewayBackendError;

    fn list_instances(&self) -> BackendFuture<'_, Vec<NamedInstance>, Self::Error> {
        Box::pin(async move { self.list_servers().await })
    }

    fn describe_instance<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> BackendFuture<'a, Option<NamedInstance>, Self::Error> {
        Box::pin(async move { self.fetch_server(instance_id).await })
    }

    fn run_instances<'a>(
        &'a self,
        spec: &'a LaunchSpec,
    ) -> BackendFuture<'a, Vec<NamedInstance>, Self::Error> {
        Box::pin(async move {
            let image_id = self.resolve_image_id(&spec.image).await?;
            let instance = self.create_server(spec, &image_id).await?;
            Ok(vec![instance])
        })
    }

    fn tag_instance<'a>(
        &'a self,
        instance_id: &'a str,
        key: &'a str,
        value: &'a str,
    ) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move { self.set_server_tag(instance_id, key, value).await })
    }

    fn terminate_instance<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.api
                .perform_instance_action_async(self.zone.as_str(), instance_id, "terminate")
                .await?;
            Ok(())
        })
    }

    fn find_security_policy<'a>(
        &'a self,
        name: &'a str,
    ) -> BackendFuture<'a, Option<SecurityPolicy>, Self::Error> {
        Box::pin(async move { self.find_security_group(name).await })
    }

    fn create_security_policy<'a>(
        &'a self,
        name: &'a str,
        description: &'a str,
    ) -> BackendFuture<'a, SecurityPolicy, Self::Error> {
        Box::pin(async move { self.create_security_group(name, description).await })
    }

    fn authorize_ingress<'a>(
        &'a self,
        policy: &'a SecurityPolicy,
        port: u16,
    ) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move { self.add_inbound_rule(policy, port).await })
    }

    fn find_key_pair<'a>(
        &'a self,
        name: &'a str,
    ) -> BackendFuture<'a, Option<KeyPairRecord>, Self::Error> {
        Box::pin(async move { self.find_ssh_key(name).await })
    }

    fn create_key_pair<'a>(&'a self, name: &'a str) -> BackendFuture<'a, KeyMaterial, Self::Error> {
        Box::pin(async move { self.register_new_ssh_key(name).await })
    }

    fn request_spot<'a>(
        &'a self,
        _spec: &'a LaunchSpec,
        _bid_price: f64,
        _name: &'a str,
    ) -> BackendFuture<'a, SpotRequest, Self::Error> {
        Box::pin(async move {
            Err(ScalewayBackendError::Unsupported {
                operation: "spot instances",
            })
        })
    }

    fn describe_spot_request<'a>(
        &'a self,
        _request_id: &'a str,
    ) -> BackendFuture<'a, SpotRequest, Self::Error> {
        Box::pin(async move {
            Err(ScalewayBackendError::Unsupported {
                operation: "spot instances",
            })
        })
    }

    fn list_spot_requests(&self) -> BackendFuture<'_, Vec<SpotRequest>, Self::Error> {
        Box::pin(async move { Ok(Vec::new()) })
    }

    fn cancel_spot_requests<'a>(
        &'a self,
        request_ids: &'a [String],
    ) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move {
            if request_ids.is_empty() {
                return Ok(());
            }
            Err(ScalewayBackendError::Unsupported {
                operation: "spot instances",
            })
        })
    }
}
