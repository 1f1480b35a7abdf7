//! Remote access channel: runs commands and transfers files to a bound host
//! through the system `ssh`, `rsync`, and `scp` clients.

use std::ffi::OsString;
use std::net::IpAddr;

use camino::{Utf8Path, Utf8PathBuf};
use shell_escape::unix::escape;
use tracing::{debug, info};

mod config;
mod types;
mod util;

pub use config::{ChannelError, DEFAULT_SSH_PORT, DEFAULT_SSH_USER, SshConfig, SshConfigLoadError};
pub use types::{
    CommandOutput, CommandRunner, ProcessCommandRunner, RemoteCommandOutput, RemoteSession,
    StreamingCommandRunner,
};
pub use util::{elevate, expand_tilde, join_remote_path};

/// Executes commands and uploads on behalf of a [`RemoteSession`].
#[derive(Clone, Debug)]
pub struct RemoteChannel<R: CommandRunner> {
    config: SshConfig,
    runner: R,
}

impl RemoteChannel<StreamingCommandRunner> {
    /// Convenience constructor that wires the streaming process runner.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidConfig`] when validation fails.
    pub fn with_streaming_runner(config: SshConfig) -> Result<Self, ChannelError> {
        Self::new(config, StreamingCommandRunner)
    }
}

impl<R: CommandRunner> RemoteChannel<R> {
    /// Creates a channel using the provided configuration and runner.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidConfig`] when configuration validation
    /// fails.
    pub fn new(config: SshConfig, runner: R) -> Result<Self, ChannelError> {
        config.validate()?;
        Ok(Self { config, runner })
    }

    /// Returns a reference to the underlying configuration.
    #[must_use]
    pub const fn config(&self) -> &SshConfig {
        &self.config
    }

    /// Builds a session for `host` using the configured user and port.
    #[must_use]
    pub fn session_for(
        &self,
        instance_id: impl Into<String>,
        host: IpAddr,
        key_file: &Utf8Path,
    ) -> RemoteSession {
        RemoteSession {
            instance_id: instance_id.into(),
            user: self.config.ssh_user.clone(),
            host,
            port: self.config.ssh_port,
            key_file: key_file.to_path_buf(),
        }
    }

    /// Runs `command` on the session host and returns its output.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::RemoteCommandFailed`] when `fail_on_nonzero`
    /// is set and the command does not exit with status zero, or
    /// [`ChannelError::Spawn`] when `ssh` cannot be started.
    ///
    /// # Security
    ///
    /// `command` is passed verbatim to the remote shell; callers must quote
    /// untrusted input.
    pub fn run_command(
        &self,
        session: &RemoteSession,
        command: &str,
        fail_on_nonzero: bool,
    ) -> Result<RemoteCommandOutput, ChannelError> {
        debug!(host = %session.host, "> {command}");
        let args = self.build_ssh_args(session, command);
        let output = self.runner.run(&self.config.ssh_bin, &args)?;
        if fail_on_nonzero && !output.is_success() {
            return Err(ChannelError::RemoteCommandFailed {
                command: command.to_owned(),
                exit_code: output.code,
                status_text: status_text(output.code),
            });
        }

        Ok(RemoteCommandOutput {
            exit_code: output.code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    /// Sends `local` to `remote` on the session host.
    ///
    /// Delta mode uses `rsync` so re-runs only transfer changed blocks; plain
    /// mode falls back to a recursive `scp`.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::MissingLocal`] when `local` does not exist and
    /// [`ChannelError::TransferFailed`] when the transfer exits unsuccessfully.
    pub fn upload_file(
        &self,
        session: &RemoteSession,
        local: &Utf8Path,
        remote: &str,
        use_delta_sync: bool,
    ) -> Result<(), ChannelError> {
        if !local.exists() {
            return Err(ChannelError::MissingLocal {
                path: local.to_path_buf(),
            });
        }

        let target = session.remote_target(remote);
        info!("Sending '{local}' to '{target}'");
        let (program, args) = if use_delta_sync {
            (
                &self.config.rsync_bin,
                self.build_rsync_args(session, local, &target),
            )
        } else {
            (
                &self.config.scp_bin,
                self.build_scp_args(session, local, &target),
            )
        };

        let output = self.runner.run(program, &args)?;
        if output.is_success() {
            return Ok(());
        }
        Err(ChannelError::TransferFailed {
            local: local.to_path_buf(),
            remote: target,
        })
    }

    /// Uploads a script, marks it executable, and runs it with `arguments`.
    ///
    /// When `working_directory` is given the directory is created first, the
    /// script is placed inside it, and the script runs from there. `sudo`
    /// elevates the directory creation, the `chmod`, and the invocation.
    ///
    /// # Errors
    ///
    /// Returns any error from [`Self::upload_file`] or [`Self::run_command`].
    pub fn run_script(
        &self,
        session: &RemoteSession,
        local: &Utf8Path,
        arguments: Option<&str>,
        sudo: bool,
        working_directory: Option<&str>,
    ) -> Result<RemoteCommandOutput, ChannelError> {
        let script_name = local.file_name().ok_or_else(|| ChannelError::MissingLocal {
            path: local.to_path_buf(),
        })?;
        let remote_path = working_directory.map_or_else(
            || script_name.to_owned(),
            |dir| join_remote_path(dir, script_name),
        );

        if let Some(dir) = working_directory {
            let mkdir = format!("mkdir -p {}", escape(dir.into()));
            self.run_command(session, &elevate(&mkdir, sudo), true)?;
        }

        self.upload_file(session, local, &remote_path, true)?;

        let chmod = format!("chmod +x {}", escape(remote_path.as_str().into()));
        self.run_command(session, &elevate(&chmod, sudo), true)?;

        let mut invocation = elevate(&format!("./{}", escape(script_name.into())), sudo);
        if let Some(args) = arguments.filter(|args| !args.trim().is_empty()) {
            invocation.push(' ');
            invocation.push_str(args);
        }
        let command = working_directory.map_or_else(
            || invocation.clone(),
            |dir| format!("cd {} && {invocation}", escape(dir.into())),
        );
        self.run_command(session, &command, true)
    }

    fn build_ssh_args(&self, session: &RemoteSession, command: &str) -> Vec<OsString> {
        let mut args = self.common_ssh_options("-p", session);
        args.push(OsString::from(session.endpoint()));
        args.push(OsString::from(command));
        args
    }

    fn build_rsync_args(
        &self,
        session: &RemoteSession,
        local: &Utf8Path,
        target: &str,
    ) -> Vec<OsString> {
        vec![
            OsString::from("-Paz"),
            OsString::from("--rsh"),
            OsString::from(self.build_remote_shell(session)),
            OsString::from("--rsync-path"),
            OsString::from(&self.config.rsync_path),
            OsString::from(local.as_str()),
            OsString::from(target),
        ]
    }

    fn build_scp_args(
        &self,
        session: &RemoteSession,
        local: &Utf8Path,
        target: &str,
    ) -> Vec<OsString> {
        let mut args = vec![OsString::from("-r")];
        args.extend(self.common_ssh_options("-P", session));
        args.push(OsString::from(local.as_str()));
        args.push(OsString::from(target));
        args
    }

    fn common_ssh_options(&self, port_flag: &str, session: &RemoteSession) -> Vec<OsString> {
        let key_file: Utf8PathBuf = expand_tilde(session.key_file.as_str()).into();
        let mut args = vec![
            OsString::from(port_flag),
            OsString::from(session.port.to_string()),
            OsString::from("-i"),
            OsString::from(key_file.as_str()),
        ];

        if self.config.ssh_batch_mode {
            args.push(OsString::from("-o"));
            args.push(OsString::from("BatchMode=yes"));
        }

        if !self.config.ssh_strict_host_key_checking {
            args.push(OsString::from("-o"));
            args.push(OsString::from("StrictHostKeyChecking=no"));
        }

        if !self.config.ssh_known_hosts_file.trim().is_empty() {
            args.push(OsString::from("-o"));
            args.push(OsString::from(format!(
                "UserKnownHostsFile={}",
                self.config.ssh_known_hosts_file
            )));
        }

        args
    }

    fn build_remote_shell(&self, session: &RemoteSession) -> String {
        let opts = self
            .common_ssh_options("-p", session)
            .into_iter()
            .map(|arg| escape(arg.to_string_lossy()).into_owned())
            .collect::<Vec<_>>()
            .join(" ");
        format!("{} {opts}", escape(self.config.ssh_bin.as_str().into()))
    }
}

fn status_text(code: Option<i32>) -> String {
    code.map_or_else(|| String::from("no exit status"), |code| code.to_string())
}

#[cfg(test)]
mod tests;
