//! Local keypair cache kept consistent with the provider's registrations.
//!
//! Each keypair lives as `<name>.pem` inside the keys folder. The store never
//! repairs a mismatch between the local file and the remote record; it
//! reports the inconsistency and leaves both sides untouched.

use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs::{OpenOptions, OpenOptionsExt};
use cap_std::fs_utf8::Dir;
use thiserror::Error;
use tracing::info;

use crate::backend::CloudBackend;

/// Mode applied to freshly written private keys.
const KEY_FILE_MODE: u32 = 0o600;

/// A keypair known both locally and to the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyPair {
    /// Name the provider knows the keypair by.
    pub name: String,
    /// Path of the private key file.
    pub key_file: Utf8PathBuf,
}

/// Which half of a keypair is missing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Inconsistency {
    /// The key file exists but the provider has no record.
    MissingRemote,
    /// The provider has a record but the key file is absent.
    MissingLocal,
}

impl Inconsistency {
    const fn describe(self) -> &'static str {
        match self {
            Self::MissingRemote => "the key file exists but no keypair is registered",
            Self::MissingLocal => "the keypair is registered but the key file is missing",
        }
    }
}

/// Errors raised while ensuring a keypair.
#[derive(Debug, Error)]
pub enum KeyStoreError<E>
where
    E: std::error::Error + 'static,
{
    /// Local and remote state disagree.
    #[error(
        "keypair {key_name} is inconsistent: {detail} ({key_file}); remove the stale side manually",
        detail = kind.describe()
    )]
    CredentialInconsistency {
        /// Keypair name.
        key_name: String,
        /// Expected private key path.
        key_file: Utf8PathBuf,
        /// Side that is missing.
        kind: Inconsistency,
    },
    /// Raised when the keys folder or file cannot be accessed.
    #[error("key store I/O error at {path}: {message}")]
    Io {
        /// Path involved in the failure.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
    /// Provider failure.
    #[error("provider error: {0}")]
    Provider(#[source] E),
}

/// Keys folder plus the keypair name it should hold.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyStore {
    key_name: String,
    folder: Utf8PathBuf,
}

impl KeyStore {
    /// Creates a store for `key_name` inside `folder`.
    #[must_use]
    pub fn new(key_name: impl Into<String>, folder: impl Into<Utf8PathBuf>) -> Self {
        Self {
            key_name: key_name.into(),
            folder: folder.into(),
        }
    }

    /// Returns the keypair name.
    #[must_use]
    pub fn key_name(&self) -> &str {
        &self.key_name
    }

    /// Returns the path the private key is stored at.
    #[must_use]
    pub fn key_file(&self) -> Utf8PathBuf {
        self.folder.join(self.file_name())
    }

    fn file_name(&self) -> String {
        format!("{}.pem", self.key_name)
    }

    /// Guarantees the keypair exists remotely and locally, creating both when
    /// neither does.
    ///
    /// # Errors
    ///
    /// Returns [`KeyStoreError::CredentialInconsistency`] when exactly one
    /// side exists, [`KeyStoreError::Io`] when the folder or key file cannot
    /// be accessed, and [`KeyStoreError::Provider`] for backend failures.
    pub async fn ensure<B: CloudBackend>(
        &self,
        backend: &B,
    ) -> Result<KeyPair, KeyStoreError<B::Error>> {
        let key_file = self.key_file();
        let local = self.local_exists()?;
        let remote = backend
            .find_key_pair(&self.key_name)
            .await
            .map_err(KeyStoreError::Provider)?;

        let keypair = KeyPair {
            name: self.key_name.clone(),
            key_file: key_file.clone(),
        };
        match (local, remote.is_some()) {
            (true, true) => Ok(keypair),
            (false, false) => {
                info!("Creating keypair {} in {}", self.key_name, self.folder);
                let dir = self.create_folder()?;
                let material = backend
                    .create_key_pair(&self.key_name)
                    .await
                    .map_err(KeyStoreError::Provider)?;
                write_private_key(&dir, &self.file_name(), &material.private_key)
                    .map_err(|err| io_error(&key_file, &err))?;
                Ok(keypair)
            }
            (true, false) => Err(self.inconsistency(Inconsistency::MissingRemote)),
            (false, true) => Err(self.inconsistency(Inconsistency::MissingLocal)),
        }
    }

    fn inconsistency<E: std::error::Error>(&self, kind: Inconsistency) -> KeyStoreError<E> {
        KeyStoreError::CredentialInconsistency {
            key_name: self.key_name.clone(),
            key_file: self.key_file(),
            kind,
        }
    }

    fn local_exists<E: std::error::Error>(&self) -> Result<bool, KeyStoreError<E>> {
        match Dir::open_ambient_dir(&self.folder, ambient_authority()) {
            Ok(dir) => dir
                .try_exists(self.file_name())
                .map_err(|err| io_error(&self.key_file(), &err)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(io_error(&self.folder, &err)),
        }
    }

    fn create_folder<E: std::error::Error>(&self) -> Result<Dir, KeyStoreError<E>> {
        Dir::create_ambient_dir_all(&self.folder, ambient_authority())
            .map_err(|err| io_error(&self.folder, &err))?;
        Dir::open_ambient_dir(&self.folder, ambient_authority())
            .map_err(|err| io_error(&self.folder, &err))
    }
}

fn write_private_key(dir: &Dir, file_name: &str, private_key: &str) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true).mode(KEY_FILE_MODE);
    let mut file = dir.open_with(file_name, &options)?;
    file.write_all(private_key.as_bytes())?;
    file.flush()
}

fn io_error<E: std::error::Error>(path: &Utf8Path, err: &io::Error) -> KeyStoreError<E> {
    KeyStoreError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
