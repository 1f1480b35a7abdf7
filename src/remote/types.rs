//! Core remote channel types and the command runner abstraction.

use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::net::IpAddr;
use std::process::{Command, Stdio};
use std::thread;

use camino::Utf8PathBuf;

use super::ChannelError;

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Output of a command executed on the remote host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteCommandOutput {
    /// Exit code reported by `ssh`, which mirrors the remote command.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl RemoteCommandOutput {
    /// Returns `true` when the remote command exited with status zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }
}

/// Endpoint of a bound remote host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteSession {
    /// Instance the session is bound to.
    pub instance_id: String,
    /// Remote login.
    pub user: String,
    /// Public address of the instance.
    pub host: IpAddr,
    /// SSH port.
    pub port: u16,
    /// Private key used for authentication.
    pub key_file: Utf8PathBuf,
}

impl RemoteSession {
    /// Returns the `user@host` endpoint used by `ssh`.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// Returns the `user@host:path` target used by `rsync` and `scp`.
    #[must_use]
    pub fn remote_target(&self, path: &str) -> String {
        match self.host {
            IpAddr::V4(addr) => format!("{}@{addr}:{path}", self.user),
            IpAddr::V6(addr) => format!("{}@[{addr}]:{path}", self.user),
        }
    }
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Spawn`] if the command cannot be started.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, ChannelError>;
}

/// Command runner that captures output without echoing it.
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, ChannelError> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| spawn_error(program, &err))?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Command runner that forwards child output to the terminal as it arrives
/// while still capturing it, so long remote setup runs stay observable.
#[derive(Clone, Debug, Default)]
pub struct StreamingCommandRunner;

impl CommandRunner for StreamingCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, ChannelError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| spawn_error(program, &err))?;

        let stdout_pump = child
            .stdout
            .take()
            .map(|pipe| thread::spawn(move || forward(pipe, io::stdout())));
        let stderr_pump = child
            .stderr
            .take()
            .map(|pipe| thread::spawn(move || forward(pipe, io::stderr())));

        let status = child.wait().map_err(|err| spawn_error(program, &err))?;

        Ok(CommandOutput {
            code: status.code(),
            stdout: collect(stdout_pump),
            stderr: collect(stderr_pump),
        })
    }
}

fn spawn_error(program: &str, err: &io::Error) -> ChannelError {
    ChannelError::Spawn {
        program: program.to_owned(),
        message: err.to_string(),
    }
}

fn forward(mut reader: impl Read, mut sink: impl Write) -> String {
    let mut captured = Vec::new();
    let mut buffer = [0_u8; 4096];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => {
                let chunk = buffer.get(..read).unwrap_or_default();
                sink.write_all(chunk).ok();
                sink.flush().ok();
                captured.extend_from_slice(chunk);
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(_) => break,
        }
    }
    String::from_utf8_lossy(&captured).into_owned()
}

fn collect(pump: Option<thread::JoinHandle<String>>) -> String {
    pump.map(|handle| handle.join().unwrap_or_default())
        .unwrap_or_default()
}
