//! Credential files supplied with `--credentials`.
//!
//! A credential file is a flat JSON object. Keys are matched case
//! insensitively and may carry an `scw_` prefix, so both
//! `{"SCW_SECRET_KEY": "..."}` and `{"secret_key": "..."}` are accepted.

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde_json::Value;
use thiserror::Error;

/// Credential values that override configuration files and environment
/// variables.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CredentialOverrides {
    /// Scaleway access key.
    pub access_key: Option<String>,
    /// Scaleway secret key.
    pub secret_key: Option<String>,
    /// Project identifier.
    pub project_id: Option<String>,
    /// Organisation identifier.
    pub organization_id: Option<String>,
    /// Availability zone.
    pub zone: Option<String>,
}

/// Errors raised while reading a credential file.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum CredentialsError {
    /// The file could not be read.
    #[error("failed to read credentials {path}: {message}")]
    Io {
        /// File path.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
    /// The file is not a JSON object.
    #[error("failed to parse credentials {path}: {message}")]
    Parse {
        /// File path.
        path: Utf8PathBuf,
        /// Parser message.
        message: String,
    },
    /// A key is not one of the recognised credential names.
    #[error(
        "unknown credential key {key} in {path}; expected access_key, secret_key, project_id, organization_id or zone"
    )]
    UnknownKey {
        /// File path.
        path: Utf8PathBuf,
        /// Key as written in the file.
        key: String,
    },
    /// A recognised key has a value that is not a string or appears twice.
    #[error("invalid credential {key} in {path}: {message}")]
    InvalidValue {
        /// File path.
        path: Utf8PathBuf,
        /// Key as written in the file.
        key: String,
        /// What is wrong with it.
        message: &'static str,
    },
}

impl CredentialOverrides {
    /// Parses credential JSON read from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialsError`] when the contents are not a flat object
    /// of recognised string values.
    pub fn from_json(path: &Utf8Path, contents: &str) -> Result<Self, CredentialsError> {
        let value: Value =
            serde_json::from_str(contents).map_err(|err| CredentialsError::Parse {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;
        let Value::Object(entries) = value else {
            return Err(CredentialsError::Parse {
                path: path.to_path_buf(),
                message: String::from("expected a JSON object"),
            });
        };

        let mut overrides = Self::default();
        for (key, raw) in entries {
            let normalised = key.to_lowercase();
            let field = normalised.strip_prefix("scw_").unwrap_or(&normalised);
            let slot = match field {
                "access_key" => &mut overrides.access_key,
                "secret_key" => &mut overrides.secret_key,
                "project_id" | "default_project_id" => &mut overrides.project_id,
                "organization_id" | "default_organization_id" => &mut overrides.organization_id,
                "zone" | "default_zone" => &mut overrides.zone,
                _ => {
                    return Err(CredentialsError::UnknownKey {
                        path: path.to_path_buf(),
                        key,
                    });
                }
            };
            let Value::String(text) = raw else {
                return Err(CredentialsError::InvalidValue {
                    path: path.to_path_buf(),
                    key,
                    message: "expected a string",
                });
            };
            if slot.is_some() {
                return Err(CredentialsError::InvalidValue {
                    path: path.to_path_buf(),
                    key,
                    message: "given more than once",
                });
            }
            *slot = Some(text.trim().to_owned());
        }
        Ok(overrides)
    }

    /// Returns the names of the values present, for progress messages.
    #[must_use]
    pub fn present_keys(&self) -> Vec<&'static str> {
        [
            ("access_key", self.access_key.is_some()),
            ("secret_key", self.secret_key.is_some()),
            ("project_id", self.project_id.is_some()),
            ("organization_id", self.organization_id.is_some()),
            ("zone", self.zone.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, present)| present.then_some(name))
        .collect()
    }
}

/// Reads and parses the credential file at `path`.
///
/// # Errors
///
/// Returns [`CredentialsError::Io`] when the file cannot be read and the
/// parsing errors of [`CredentialOverrides::from_json`].
pub fn load_credentials(path: &Utf8Path) -> Result<CredentialOverrides, CredentialsError> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path.file_name().ok_or_else(|| CredentialsError::Io {
        path: path.to_path_buf(),
        message: String::from("credentials path is missing a filename"),
    })?;
    let io_error = |err: std::io::Error| CredentialsError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    };

    let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(io_error)?;
    let contents = dir.read_to_string(file_name).map_err(io_error)?;
    CredentialOverrides::from_json(path, &contents)
}
