//! SSH transport configuration and remote channel errors.
//!
//! [`SshConfig`] is loaded via `ortho-config`, which merges defaults,
//! configuration files, and environment variables.

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Default remote user. Scaleway images log in as `root`.
pub const DEFAULT_SSH_USER: &str = "root";

/// Default SSH port.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// SSH, rsync, and scp settings loaded via `ortho-config`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "DEMO_DEPLOYER_SSH",
    discovery(
        app_name = "demo-deployer",
        env_var = "DEMO_DEPLOYER_CONFIG_PATH",
        config_file_name = "demo-deployer.toml",
        dotfile_name = ".demo-deployer.toml",
        project_file_name = "demo-deployer.toml"
    )
)]
pub struct SshConfig {
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `rsync` executable.
    #[ortho_config(default = "rsync".to_owned())]
    pub rsync_bin: String,
    /// Path to the `scp` executable.
    #[ortho_config(default = "scp".to_owned())]
    pub scp_bin: String,
    /// Remote user to connect as. Needs passwordless sudo.
    #[ortho_config(default = DEFAULT_SSH_USER.to_owned())]
    pub ssh_user: String,
    /// TCP port of the remote SSH daemon.
    #[ortho_config(default = DEFAULT_SSH_PORT)]
    pub ssh_port: u16,
    /// Whether to force batch mode for SSH to avoid password prompts.
    #[ortho_config(default = true)]
    pub ssh_batch_mode: bool,
    /// Whether to enforce host key checking; disabled by default because demo
    /// hosts are recreated with fresh host keys.
    #[ortho_config(default = false)]
    pub ssh_strict_host_key_checking: bool,
    /// Known hosts file override; defaults to `/dev/null` for ephemeral hosts.
    #[ortho_config(default = "/dev/null".to_owned())]
    pub ssh_known_hosts_file: String,
    /// Remote rsync invocation used for delta uploads.
    #[ortho_config(default = "sudo rsync".to_owned())]
    pub rsync_path: String,
}

/// Errors raised when loading the SSH configuration from layered sources.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum SshConfigLoadError {
    /// Indicates that parsing or merging configuration layers failed.
    #[error("ssh configuration parsing failed: {0}")]
    Parse(String),
}

impl SshConfig {
    /// Ensures configuration values are present after trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidConfig`] when any required field is
    /// empty or the port is zero.
    pub fn validate(&self) -> Result<(), ChannelError> {
        Self::require_value(&self.ssh_bin, "ssh_bin")?;
        Self::require_value(&self.rsync_bin, "rsync_bin")?;
        Self::require_value(&self.scp_bin, "scp_bin")?;
        Self::require_value(&self.ssh_user, "ssh_user")?;
        Self::require_value(&self.rsync_path, "rsync_path")?;
        if self.ssh_port == 0 {
            return Err(ChannelError::InvalidConfig {
                field: String::from("ssh_port"),
            });
        }
        Ok(())
    }

    /// Loads configuration from defaults, configuration files, and
    /// environment variables without parsing process arguments.
    ///
    /// # Errors
    ///
    /// Returns [`SshConfigLoadError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, SshConfigLoadError> {
        Self::load_from_iter([std::ffi::OsString::from("demo-deployer")])
            .map_err(|err| SshConfigLoadError::Parse(err.to_string()))
    }

    fn require_value(value: &str, field: &str) -> Result<(), ChannelError> {
        if value.trim().is_empty() {
            return Err(ChannelError::InvalidConfig {
                field: field.to_owned(),
            });
        }
        Ok(())
    }
}

/// Errors surfaced while running commands or transferring files.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ChannelError {
    /// Raised when configuration is missing required values.
    #[error("missing {field}: set DEMO_DEPLOYER_SSH_{env_suffix} or add {field} to demo-deployer.toml", env_suffix = field.to_uppercase())]
    InvalidConfig {
        /// Configuration field that failed validation.
        field: String,
    },
    /// Raised when a local file to transfer does not exist.
    #[error("local file missing: {path}")]
    MissingLocal {
        /// Path that was expected to exist.
        path: Utf8PathBuf,
    },
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when a remote command exits unsuccessfully.
    #[error("remote command `{command}` returned {status_text}")]
    RemoteCommandFailed {
        /// Command text sent to the host.
        command: String,
        /// Exit status, absent when the process was killed by a signal.
        exit_code: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
    },
    /// Raised when a file transfer exits unsuccessfully.
    #[error("failed to send '{local}' to '{remote}'")]
    TransferFailed {
        /// Local source path.
        local: Utf8PathBuf,
        /// Remote destination in `user@host:path` form.
        remote: String,
    },
}
