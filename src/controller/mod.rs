//! Lifecycle control for the single named demo instance.
//!
//! The controller reconciles a desired instance name against the provider:
//! it reuses the running instance carrying that name or provisions a new one,
//! binds a remote session to it, and probes the session before handing out
//! remote commands. Termination cancels outstanding spot requests first.

use std::net::IpAddr;
use std::time::Duration;

use camino::Utf8Path;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::backend::{CloudBackend, LaunchRequest, NamedInstance};
use crate::keystore::{KeyStore, KeyStoreError};
use crate::provisioner::{PollPolicy, ProvisionError, ProvisionPolicy, Provisioner};
use crate::remote::{ChannelError, CommandRunner, RemoteChannel, RemoteCommandOutput, RemoteSession};

/// Command used to check that the bound host accepts SSH sessions.
pub const PROBE_COMMAND: &str = "echo \"connection check\"";

/// Errors surfaced by the lifecycle controller.
#[derive(Debug, Error)]
pub enum ControllerError<E>
where
    E: std::error::Error + 'static,
{
    /// More than one running instance carries the requested name.
    #[error("{name} is ambiguous: running instances {ids}", ids = instance_ids.join(", "))]
    AmbiguousInstance {
        /// Requested instance name.
        name: String,
        /// Ids of every matching running instance.
        instance_ids: Vec<String>,
    },
    /// The readiness probe never succeeded.
    #[error("{host} did not accept SSH after {attempts} attempts")]
    SshUnreachable {
        /// Address that was probed.
        host: IpAddr,
        /// Number of probe attempts made.
        attempts: u32,
    },
    /// A remote operation was requested without a bound instance.
    #[error("no instance is connected")]
    NotConnected,
    /// Keypair preparation failed.
    #[error(transparent)]
    KeyStore(KeyStoreError<E>),
    /// Instance creation failed.
    #[error(transparent)]
    Provision(ProvisionError<E>),
    /// A remote command or transfer failed.
    #[error(transparent)]
    Remote(#[from] ChannelError),
    /// Provider failure.
    #[error("provider error: {0}")]
    Provider(#[source] E),
}

/// Whether the controller currently holds a remote session.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum Binding {
    /// No instance is bound.
    #[default]
    Unbound,
    /// Remote operations target this session.
    Bound(RemoteSession),
}

/// Timing used by the controller.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ControllerPolicy {
    /// Provisioning budgets.
    pub provision: ProvisionPolicy,
    /// Readiness probe budget; 6 attempts 10 s apart by default.
    pub probe: PollPolicy,
}

impl Default for ControllerPolicy {
    fn default() -> Self {
        Self {
            provision: ProvisionPolicy::default(),
            probe: PollPolicy::new(Duration::from_secs(10), 6),
        }
    }
}

impl ControllerPolicy {
    /// Policy without any waiting.
    #[must_use]
    pub const fn immediate() -> Self {
        Self {
            provision: ProvisionPolicy::immediate(),
            probe: PollPolicy::new(Duration::ZERO, 6),
        }
    }
}

/// Drives one named instance and the remote session bound to it.
#[derive(Debug)]
pub struct LifecycleController<B, R: CommandRunner> {
    backend: B,
    channel: RemoteChannel<R>,
    keystore: KeyStore,
    policy: ControllerPolicy,
    binding: Binding,
}

impl<B, R> LifecycleController<B, R>
where
    B: CloudBackend,
    R: CommandRunner,
{
    /// Creates an unbound controller.
    #[must_use]
    pub fn new(backend: B, channel: RemoteChannel<R>, keystore: KeyStore) -> Self {
        Self {
            backend,
            channel,
            keystore,
            policy: ControllerPolicy::default(),
            binding: Binding::Unbound,
        }
    }

    /// Overrides the polling budgets.
    #[must_use]
    pub const fn with_policy(mut self, policy: ControllerPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Returns the backend.
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Returns the remote channel.
    #[must_use]
    pub const fn channel(&self) -> &RemoteChannel<R> {
        &self.channel
    }

    /// Returns the current binding.
    #[must_use]
    pub const fn binding(&self) -> &Binding {
        &self.binding
    }

    /// Returns the bound session.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::NotConnected`] while unbound.
    pub const fn session(&self) -> Result<&RemoteSession, ControllerError<B::Error>> {
        match &self.binding {
            Binding::Bound(session) => Ok(session),
            Binding::Unbound => Err(ControllerError::NotConnected),
        }
    }

    /// Issues a cheap provider query so credential problems surface early.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Provider`] when the query fails.
    pub async fn check_backend(&self) -> Result<(), ControllerError<B::Error>> {
        self.backend
            .list_instances()
            .await
            .map(|_| ())
            .map_err(ControllerError::Provider)
    }

    /// Reuses or provisions the instance named in `request`, binds it, and
    /// probes the remote session.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::KeyStore`] when the keypair is inconsistent,
    /// [`ControllerError::AmbiguousInstance`] when several running instances
    /// share the name, [`ControllerError::Provision`] when creation fails or
    /// the instance has no public address, and
    /// [`ControllerError::SshUnreachable`] when the probe never succeeds. The
    /// controller is unbound after any failure.
    pub async fn connect(
        &mut self,
        request: &LaunchRequest,
    ) -> Result<NamedInstance, ControllerError<B::Error>> {
        self.binding = Binding::Unbound;
        let keypair = self
            .keystore
            .ensure(&self.backend)
            .await
            .map_err(ControllerError::KeyStore)?;

        let instance = if let Some(existing) = self.find_running(&request.name).await? {
            info!("Reusing instance {} ({})", existing.id, request.name);
            existing
        } else {
            info!("Creating instance {}", request.name);
            Provisioner::new(&self.backend, self.policy.provision)
                .create_instance(request, &keypair.name)
                .await
                .map_err(ControllerError::Provision)?
        };

        let host = instance.address.ok_or_else(|| {
            ControllerError::Provision(ProvisionError::Provisioning {
                message: format!("instance {} has no public address", instance.id),
            })
        })?;
        let session = self
            .channel
            .session_for(instance.id.clone(), host, &keypair.key_file);
        self.probe(&session).await?;
        info!("Connected to {} at {host}", instance.id);
        self.binding = Binding::Bound(session);
        Ok(instance)
    }

    /// Cancels outstanding spot requests and terminates an instance.
    ///
    /// With a name, the running instance carrying it is terminated; when none
    /// exists the call succeeds without doing anything. Without a name, the
    /// bound instance is terminated. Returns the id of the terminated
    /// instance, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::NotConnected`] when no name is given and
    /// nothing is bound, [`ControllerError::AmbiguousInstance`] when the name
    /// matches several running instances, and [`ControllerError::Provider`]
    /// for backend failures.
    pub async fn terminate(
        &mut self,
        name: Option<&str>,
    ) -> Result<Option<String>, ControllerError<B::Error>> {
        self.cancel_outstanding_spot_requests(name).await?;

        let target = match name {
            Some(wanted) => match self.find_running(wanted).await? {
                Some(instance) => instance.id,
                None => {
                    info!("No running instance named {wanted}");
                    return Ok(None);
                }
            },
            None => self.session()?.instance_id.clone(),
        };

        info!("Terminating instance {target}");
        self.backend
            .terminate_instance(&target)
            .await
            .map_err(ControllerError::Provider)?;

        if matches!(&self.binding, Binding::Bound(session) if session.instance_id == target) {
            self.binding = Binding::Unbound;
        }
        Ok(Some(target))
    }

    /// Runs `command` on the bound instance.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::NotConnected`] while unbound or
    /// [`ControllerError::Remote`] when the command fails.
    pub fn cmd(
        &self,
        command: &str,
        fail_on_nonzero: bool,
    ) -> Result<RemoteCommandOutput, ControllerError<B::Error>> {
        let session = self.session()?;
        Ok(self.channel.run_command(session, command, fail_on_nonzero)?)
    }

    /// Uploads `local` to `remote` on the bound instance.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::NotConnected`] while unbound or
    /// [`ControllerError::Remote`] when the transfer fails.
    pub fn put(
        &self,
        local: &Utf8Path,
        remote: &str,
        use_delta_sync: bool,
    ) -> Result<(), ControllerError<B::Error>> {
        let session = self.session()?;
        Ok(self
            .channel
            .upload_file(session, local, remote, use_delta_sync)?)
    }

    /// Uploads and runs a script on the bound instance. Blocks until the
    /// script exits.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::NotConnected`] while unbound or
    /// [`ControllerError::Remote`] when any step fails.
    pub fn exec_script(
        &self,
        local: &Utf8Path,
        arguments: Option<&str>,
        sudo: bool,
        working_directory: Option<&str>,
    ) -> Result<RemoteCommandOutput, ControllerError<B::Error>> {
        let session = self.session()?;
        Ok(self
            .channel
            .run_script(session, local, arguments, sudo, working_directory)?)
    }

    async fn find_running(
        &self,
        name: &str,
    ) -> Result<Option<NamedInstance>, ControllerError<B::Error>> {
        let mut matches: Vec<NamedInstance> = self
            .backend
            .list_instances()
            .await
            .map_err(ControllerError::Provider)?
            .into_iter()
            .filter(|instance| instance.is_named(name) && instance.is_running())
            .collect();

        if matches.len() > 1 {
            return Err(ControllerError::AmbiguousInstance {
                name: name.to_owned(),
                instance_ids: matches.into_iter().map(|instance| instance.id).collect(),
            });
        }
        Ok(matches.pop())
    }

    /// Cancels open or active spot requests placed for `name`, or all of
    /// them when no name is given.
    async fn cancel_outstanding_spot_requests(
        &self,
        name: Option<&str>,
    ) -> Result<(), ControllerError<B::Error>> {
        let outstanding: Vec<String> = self
            .backend
            .list_spot_requests()
            .await
            .map_err(ControllerError::Provider)?
            .into_iter()
            .filter(|request| request.state.is_outstanding())
            .filter(|request| name.is_none_or(|wanted| request.name.as_deref() == Some(wanted)))
            .map(|request| request.id)
            .collect();

        if outstanding.is_empty() {
            return Ok(());
        }
        info!("Cancelling spot requests {}", outstanding.join(", "));
        self.backend
            .cancel_spot_requests(&outstanding)
            .await
            .map_err(ControllerError::Provider)
    }

    async fn probe(&self, session: &RemoteSession) -> Result<(), ControllerError<B::Error>> {
        let budget = self.policy.probe;
        let attempts = budget.attempts();
        for attempt in 1..=attempts {
            let output = self.channel.run_command(session, PROBE_COMMAND, false)?;
            if output.is_success() {
                return Ok(());
            }
            warn!(
                "SSH to {} not ready (attempt {attempt}/{attempts})",
                session.host
            );
            if attempt < attempts {
                sleep(budget.interval).await;
            }
        }
        Err(ControllerError::SshUnreachable {
            host: session.host,
            attempts,
        })
    }
}

#[cfg(test)]
mod tests;
