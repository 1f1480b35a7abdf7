//! Core library for the demo-deployer tool.
//!
//! The crate provisions a single named cloud instance (on demand or from a
//! spot bid), keeps the SSH key pair used to reach it consistent between the
//! provider and the local keys folder, and drives the instance over `ssh`,
//! `rsync`, and `scp` to deploy a demo. The Scaleway backend implements the
//! provider side; `test_support` provides in-memory doubles.

pub mod backend;
pub mod config;
pub mod controller;
pub mod credentials;
pub mod deploy;
pub mod keystore;
pub mod provisioner;
pub mod remote;
pub mod scaleway;
pub mod test_support;

pub use backend::{
    BackendError, CloudBackend, InstanceState, LaunchRequest, LaunchRequestBuilder, NamedInstance,
};
pub use config::{ConfigError, ScalewayConfig};
pub use controller::{Binding, ControllerError, ControllerPolicy, LifecycleController};
pub use credentials::{CredentialOverrides, CredentialsError, load_credentials};
pub use deploy::{DeployError, Deployer, DeploymentPlan, DeploymentReport};
pub use keystore::{KeyStore, KeyStoreError};
pub use provisioner::{PollPolicy, ProvisionError, ProvisionPolicy, Provisioner};
pub use remote::{
    ChannelError, CommandOutput, CommandRunner, ProcessCommandRunner, RemoteChannel,
    RemoteCommandOutput, RemoteSession, SshConfig, StreamingCommandRunner, expand_tilde,
};
pub use scaleway::{ScalewayBackend, ScalewayBackendError};
