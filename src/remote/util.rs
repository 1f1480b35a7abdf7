//! Utility functions for path manipulation and shell operations.

/// Expands a leading `~/` prefix to the user's home directory.
///
/// If the `HOME` environment variable is not set, the input is returned
/// unchanged.
///
/// # Examples
///
/// ```
/// # use demo_deployer::remote::expand_tilde;
/// let home = std::env::var("HOME").expect("HOME should be set");
/// assert_eq!(expand_tilde("~/.demo-deployer/keys"), format!("{home}/.demo-deployer/keys"));
/// assert_eq!(expand_tilde("/absolute/path"), "/absolute/path");
/// ```
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return format!("{}/{rest}", home.to_string_lossy());
    }
    path.to_owned()
}

/// Prefixes `command` with `sudo` when `sudo` is set.
#[must_use]
pub fn elevate(command: &str, sudo: bool) -> String {
    if sudo {
        format!("sudo {command}")
    } else {
        command.to_owned()
    }
}

/// Joins a remote directory and file name with exactly one separator.
#[must_use]
pub fn join_remote_path(directory: &str, file_name: &str) -> String {
    format!("{}/{file_name}", directory.trim_end_matches('/'))
}
