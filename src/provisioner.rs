//! Instance provisioning: security policy, on-demand or spot creation,
//! naming, and the wait for the running state.

use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::backend::{
    BackendError, CloudBackend, InstanceState, LaunchRequest, LaunchSpec, NAME_TAG, NamedInstance,
    SecurityPolicy, SpotState,
};

/// Fixed-interval polling budget.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollPolicy {
    /// Delay between consecutive attempts.
    pub interval: Duration,
    /// Maximum number of attempts.
    pub max_attempts: u32,
}

impl PollPolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Attempts actually made; at least one.
    #[must_use]
    pub const fn attempts(self) -> u32 {
        if self.max_attempts == 0 {
            1
        } else {
            self.max_attempts
        }
    }
}

/// Timing used while provisioning.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ProvisionPolicy {
    /// Spot request polling; 30 attempts 20 s apart by default.
    pub spot: PollPolicy,
    /// Running-state polling; `max_attempts` counts retries after the first
    /// look, so the default makes 11 observations 10 s apart.
    pub running: PollPolicy,
    /// Pause between creation and tagging so the id becomes visible.
    pub tag_delay: Duration,
}

impl Default for ProvisionPolicy {
    fn default() -> Self {
        Self {
            spot: PollPolicy::new(Duration::from_secs(20), 30),
            running: PollPolicy::new(Duration::from_secs(10), 10),
            tag_delay: Duration::from_millis(500),
        }
    }
}

impl ProvisionPolicy {
    /// Policy without any waiting, for tests and dry runs against doubles.
    #[must_use]
    pub const fn immediate() -> Self {
        Self {
            spot: PollPolicy::new(Duration::ZERO, 30),
            running: PollPolicy::new(Duration::ZERO, 10),
            tag_delay: Duration::ZERO,
        }
    }
}

/// Errors raised while creating an instance.
#[derive(Debug, Error)]
pub enum ProvisionError<E>
where
    E: std::error::Error + 'static,
{
    /// The provider did not produce a usable instance.
    #[error("provisioning failed: {message}")]
    Provisioning {
        /// Description of what went wrong.
        message: String,
    },
    /// The spot request did not yield an instance and was cancelled.
    #[error("spot request for {name} ended in state {state}; the request was cancelled")]
    SpotProvisioningFailed {
        /// Instance name.
        name: String,
        /// Last reported request state.
        state: String,
    },
    /// The launch request was malformed.
    #[error(transparent)]
    Validation(#[from] BackendError),
    /// Provider failure.
    #[error("provider error: {0}")]
    Provider(#[source] E),
}

/// Creates instances through a [`CloudBackend`].
#[derive(Debug)]
pub struct Provisioner<'a, B> {
    backend: &'a B,
    policy: ProvisionPolicy,
}

impl<'a, B: CloudBackend> Provisioner<'a, B> {
    /// Creates a provisioner borrowing `backend`.
    #[must_use]
    pub const fn new(backend: &'a B, policy: ProvisionPolicy) -> Self {
        Self { backend, policy }
    }

    /// Creates, names, and waits for a new instance.
    ///
    /// A positive bid goes through the spot market; anything else creates an
    /// on-demand instance. If the instance is still pending once the running
    /// budget is spent, the last reported state is returned.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::SpotProvisioningFailed`] when the spot
    /// request does not become active, [`ProvisionError::Provisioning`] when
    /// the provider returns an unexpected number of instances or the instance
    /// settles in a state other than running, and [`ProvisionError::Provider`]
    /// for backend failures.
    pub async fn create_instance(
        &self,
        request: &LaunchRequest,
        key_name: &str,
    ) -> Result<NamedInstance, ProvisionError<B::Error>> {
        request.validate()?;
        let security_policy = self.ensure_security_policy(request).await?;
        let spec = LaunchSpec {
            image: request.image.clone(),
            instance_type: request.instance_type.clone(),
            key_name: key_name.to_owned(),
            security_policy,
        };

        let instance_id = match request.spot_bid() {
            Some(bid) => self.launch_spot(&spec, bid, &request.name).await?,
            None => self.launch_on_demand(&spec).await?,
        };

        sleep(self.policy.tag_delay).await;
        self.backend
            .tag_instance(&instance_id, NAME_TAG, &request.name)
            .await
            .map_err(ProvisionError::Provider)?;

        self.wait_for_running(&instance_id).await
    }

    async fn ensure_security_policy(
        &self,
        request: &LaunchRequest,
    ) -> Result<SecurityPolicy, ProvisionError<B::Error>> {
        let existing = self
            .backend
            .find_security_policy(&request.name)
            .await
            .map_err(ProvisionError::Provider)?;
        if let Some(policy) = existing {
            return Ok(policy);
        }

        info!("Creating security group {}", request.name);
        let description = format!("Inbound access for {}", request.name);
        let policy = self
            .backend
            .create_security_policy(&request.name, &description)
            .await
            .map_err(ProvisionError::Provider)?;
        for port in &request.ports {
            self.backend
                .authorize_ingress(&policy, *port)
                .await
                .map_err(ProvisionError::Provider)?;
        }
        Ok(policy)
    }

    async fn launch_on_demand(&self, spec: &LaunchSpec) -> Result<String, ProvisionError<B::Error>> {
        info!("Creating on-demand instance");
        let mut instances = self
            .backend
            .run_instances(spec)
            .await
            .map_err(ProvisionError::Provider)?;
        match (instances.pop(), instances.is_empty()) {
            (Some(instance), true) => Ok(instance.id),
            (None, _) => Err(ProvisionError::Provisioning {
                message: String::from("the provider returned no instance"),
            }),
            (Some(_), false) => Err(ProvisionError::Provisioning {
                message: format!(
                    "expected exactly one instance, the provider returned {}",
                    instances.len() + 1
                ),
            }),
        }
    }

    async fn launch_spot(
        &self,
        spec: &LaunchSpec,
        bid: f64,
        name: &str,
    ) -> Result<String, ProvisionError<B::Error>> {
        info!("Creating spot request with bid price {bid}");
        let request = self
            .backend
            .request_spot(spec, bid, name)
            .await
            .map_err(ProvisionError::Provider)?;

        let budget = self.policy.spot;
        let mut last_state = request.state;
        for attempt in 1..=budget.attempts() {
            let current = match self.backend.describe_spot_request(&request.id).await {
                Ok(current) => current,
                Err(err) => {
                    warn!("Could not read spot request {}; cancelling it", request.id);
                    return Err(self.cancel_after_failure(&request.id, err).await);
                }
            };
            last_state = current.state;
            match (current.state, current.instance_id) {
                (SpotState::Active, Some(instance_id)) => {
                    info!("Spot request {} fulfilled by {instance_id}", request.id);
                    return Ok(instance_id);
                }
                (SpotState::Open | SpotState::Active, _) => {
                    info!(
                        "Waiting for spot request {} (attempt {attempt}/{})",
                        request.id,
                        budget.attempts()
                    );
                }
                (state, _) => {
                    warn!("Spot request {} is {}", request.id, state.as_str());
                    return Err(self.cancel_spot(&request.id, name, state).await);
                }
            }
            if attempt < budget.attempts() {
                sleep(budget.interval).await;
            }
        }

        warn!("Spot request {} was not fulfilled in time", request.id);
        Err(self.cancel_spot(&request.id, name, last_state).await)
    }

    async fn cancel_spot(
        &self,
        request_id: &str,
        name: &str,
        state: SpotState,
    ) -> ProvisionError<B::Error> {
        let ids = [request_id.to_owned()];
        if let Err(err) = self.backend.cancel_spot_requests(&ids).await {
            return ProvisionError::Provider(err);
        }
        ProvisionError::SpotProvisioningFailed {
            name: name.to_owned(),
            state: state.as_str().to_owned(),
        }
    }

    async fn cancel_after_failure(
        &self,
        request_id: &str,
        err: B::Error,
    ) -> ProvisionError<B::Error> {
        let ids = [request_id.to_owned()];
        if let Err(cancel_err) = self.backend.cancel_spot_requests(&ids).await {
            warn!("Cancelling spot request {request_id} failed: {cancel_err}");
        }
        ProvisionError::Provider(err)
    }

    async fn wait_for_running(
        &self,
        instance_id: &str,
    ) -> Result<NamedInstance, ProvisionError<B::Error>> {
        let budget = self.policy.running;
        let mut last = None;
        for retry in 0..=budget.max_attempts {
            if retry > 0 {
                sleep(budget.interval).await;
            }
            let instance = self
                .backend
                .describe_instance(instance_id)
                .await
                .map_err(ProvisionError::Provider)?
                .ok_or_else(|| ProvisionError::Provisioning {
                    message: format!("instance {instance_id} disappeared after creation"),
                })?;
            match instance.state {
                InstanceState::Running => return Ok(instance),
                InstanceState::Pending => {
                    info!(
                        "Waiting for {instance_id} to start (retry {retry}/{})",
                        budget.max_attempts
                    );
                }
                state => {
                    return Err(ProvisionError::Provisioning {
                        message: format!(
                            "instance {instance_id} is {} instead of running",
                            state.as_str()
                        ),
                    });
                }
            }
            last = Some(instance);
        }

        warn!("Instance {instance_id} is still pending; continuing anyway");
        last.ok_or_else(|| ProvisionError::Provisioning {
            message: format!("instance {instance_id} was never described"),
        })
    }
}
