//! End-to-end demo deployment on top of the lifecycle controller.
//!
//! A deployment connects the named instance, prepares a working directory
//! owned by the SSH user, uploads the packages and the optional Connect
//! credential file, then runs the setup script from that directory with the
//! package file names as its arguments.

use std::fmt;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use shell_escape::unix::escape;
use thiserror::Error;
use tracing::info;

use crate::backend::{CloudBackend, LaunchRequest};
use crate::controller::{ControllerError, LifecycleController};
use crate::remote::{CommandRunner, join_remote_path};

/// Remote file name of the Connect credential file.
pub const CLID_REMOTE_NAME: &str = "instance.clid";

/// Errors raised by a deployment.
#[derive(Debug, Error)]
pub enum DeployError<E>
where
    E: std::error::Error + 'static,
{
    /// A local file named by the plan does not exist.
    #[error("{kind} not found: {path}")]
    MissingArtifact {
        /// What the file was supposed to be.
        kind: &'static str,
        /// Path given on the command line.
        path: Utf8PathBuf,
    },
    /// A lifecycle step failed.
    #[error(transparent)]
    Controller(#[from] ControllerError<E>),
}

/// Local inputs of a deployment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeploymentPlan {
    /// Directory name used under the remote user's home.
    pub application_name: String,
    /// Archives uploaded into the working directory.
    pub packages: Vec<Utf8PathBuf>,
    /// Optional Connect credential file.
    pub instance_clid: Option<Utf8PathBuf>,
    /// Setup payload run on the instance.
    pub deployment_script: Utf8PathBuf,
}

impl DeploymentPlan {
    /// Checks that every local file exists.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::MissingArtifact`] for the first missing file.
    pub fn check_artifacts<E: std::error::Error>(&self) -> Result<(), DeployError<E>> {
        require_file("deployment script", &self.deployment_script)?;
        for package in &self.packages {
            require_file("package", package)?;
        }
        if let Some(clid) = &self.instance_clid {
            require_file("instance.clid file", clid)?;
        }
        Ok(())
    }

    /// Space-joined package file names passed to the setup script.
    #[must_use]
    pub fn script_arguments(&self) -> String {
        self.packages
            .iter()
            .filter_map(|package| package.file_name())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn require_file<E: std::error::Error>(
    kind: &'static str,
    path: &Utf8Path,
) -> Result<(), DeployError<E>> {
    if path.exists() {
        return Ok(());
    }
    Err(DeployError::MissingArtifact {
        kind,
        path: path.to_path_buf(),
    })
}

/// Returns the remote working directory for `user`, with a trailing slash.
#[must_use]
pub fn working_directory(user: &str, application_name: &str) -> String {
    if user == "root" {
        format!("/root/{application_name}/")
    } else {
        format!("/home/{user}/{application_name}/")
    }
}

/// Outcome of a successful deployment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeploymentReport {
    /// Instance the demo runs on.
    pub instance_id: String,
    /// Public address of the instance.
    pub address: IpAddr,
    /// URL of the demo.
    pub url: String,
    /// Wall-clock time spent deploying.
    pub elapsed: Duration,
}

impl fmt::Display for DeploymentReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let seconds = self.elapsed.as_secs();
        write!(
            f,
            "Successfully deployed demo at: {} in {}min {}s",
            self.url,
            seconds.div_euclid(60),
            seconds.rem_euclid(60)
        )
    }
}

/// Runs deployments through an owned [`LifecycleController`].
#[derive(Debug)]
pub struct Deployer<B, R: CommandRunner> {
    controller: LifecycleController<B, R>,
}

impl<B, R> Deployer<B, R>
where
    B: CloudBackend,
    R: CommandRunner,
{
    /// Wraps `controller`.
    #[must_use]
    pub const fn new(controller: LifecycleController<B, R>) -> Self {
        Self { controller }
    }

    /// Returns the wrapped controller.
    #[must_use]
    pub const fn controller(&self) -> &LifecycleController<B, R> {
        &self.controller
    }

    /// Connects the instance described by `launch` and deploys `plan` on it.
    ///
    /// Local files are checked before anything is provisioned.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::MissingArtifact`] when a local file is absent
    /// and [`DeployError::Controller`] when connecting or any remote step
    /// fails.
    pub async fn deploy(
        &mut self,
        launch: &LaunchRequest,
        plan: &DeploymentPlan,
    ) -> Result<DeploymentReport, DeployError<B::Error>> {
        let started = Instant::now();
        plan.check_artifacts()?;

        let instance = self.controller.connect(launch).await?;
        let user = self.controller.channel().config().ssh_user.clone();
        let work_dir = working_directory(&user, &plan.application_name);
        let escaped_dir = escape(work_dir.as_str().into());
        let escaped_user = escape(user.as_str().into());

        info!("Preparing {work_dir}");
        self.controller
            .cmd(&format!("sudo mkdir -p {escaped_dir}"), true)?;
        self.controller.cmd(
            &format!("sudo chown -R {escaped_user}:{escaped_user} {escaped_dir}"),
            true,
        )?;

        for package in &plan.packages {
            let file_name = package.file_name().unwrap_or(package.as_str());
            self.controller
                .put(package, &join_remote_path(&work_dir, file_name), true)?;
        }

        if let Some(clid) = &plan.instance_clid {
            self.controller
                .put(clid, &join_remote_path(&work_dir, CLID_REMOTE_NAME), true)?;
        }

        info!("Running {}", plan.deployment_script);
        let arguments = plan.script_arguments();
        self.controller.exec_script(
            &plan.deployment_script,
            Some(arguments.as_str()),
            true,
            Some(work_dir.as_str()),
        )?;

        let address = self.controller.session()?.host;
        Ok(DeploymentReport {
            instance_id: instance.id,
            address,
            url: demo_url(address),
            elapsed: started.elapsed(),
        })
    }
}

fn demo_url(address: IpAddr) -> String {
    match address {
        IpAddr::V4(addr) => format!("http://{addr}/"),
        IpAddr::V6(addr) => format!("http://[{addr}]/"),
    }
}
