//! SSH keys registered with the IAM API.
//!
//! Scaleway never hands out private keys, so a key pair is generated locally
//! with `ssh-keygen` and only the public half is uploaded.

use std::ffi::OsString;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::info;

use crate::backend::{KeyMaterial, KeyPairRecord};
use crate::remote::{CommandRunner, ProcessCommandRunner};

use super::super::{ScalewayBackend, ScalewayBackendError};
use super::HTTP_CLIENT;

#[derive(Deserialize)]
struct SshKeyRecord {
    name: String,
    #[serde(default)]
    fingerprint: Option<String>,
}

#[derive(Deserialize)]
struct SshKeyList {
    ssh_keys: Vec<SshKeyRecord>,
}

#[derive(Serialize)]
struct CreateSshKeyRequest<'a> {
    name: &'a str,
    public_key: &'a str,
    project_id: &'a str,
}

/// Private and public halves of a freshly generated key.
struct GeneratedKey {
    private_key: String,
    public_key: String,
}

impl ScalewayBackend {
    pub(in crate::scaleway) async fn find_ssh_key(
        &self,
        name: &str,
    ) -> Result<Option<KeyPairRecord>, ScalewayBackendError> {
        let request = HTTP_CLIENT.get(Self::iam_url("ssh-keys")).query(&[
            ("name", name),
            ("project_id", self.config.default_project_id.as_str()),
        ]);
        let list: SshKeyList = self.execute_required("list ssh keys", request).await?;
        Ok(list
            .ssh_keys
            .into_iter()
            .find(|key| key.name == name)
            .map(|key| KeyPairRecord {
                name: key.name,
                fingerprint: key.fingerprint,
            }))
    }

    pub(in crate::scaleway) async fn register_new_ssh_key(
        &self,
        name: &str,
    ) -> Result<KeyMaterial, ScalewayBackendError> {
        let generated = self.generate_key(name)?;
        let payload = CreateSshKeyRequest {
            name,
            public_key: generated.public_key.trim(),
            project_id: &self.config.default_project_id,
        };
        let request = HTTP_CLIENT.post(Self::iam_url("ssh-keys")).json(&payload);
        let _: serde_json::Value = self.execute_required("create ssh key", request).await?;
        info!("Registered SSH key {name} with project {}", self.config.default_project_id);
        Ok(KeyMaterial {
            name: name.to_owned(),
            private_key: generated.private_key,
        })
    }

    fn generate_key(&self, name: &str) -> Result<GeneratedKey, ScalewayBackendError> {
        let key_error = |message: String| ScalewayBackendError::KeyGeneration {
            name: name.to_owned(),
            message,
        };
        let scratch = TempDir::new().map_err(|err| key_error(err.to_string()))?;
        let scratch_path = Utf8PathBuf::from_path_buf(scratch.path().to_path_buf())
            .map_err(|path| key_error(format!("non UTF-8 temp path {}", path.display())))?;
        let key_path = scratch_path.join(name);

        let args = keygen_args(name, &key_path);
        let output = ProcessCommandRunner
            .run(&self.keygen_bin, &args)
            .map_err(|err| key_error(err.to_string()))?;
        if !output.is_success() {
            return Err(key_error(format!(
                "{} exited with {}: {}",
                self.keygen_bin,
                output
                    .code
                    .map_or_else(|| String::from("no exit status"), |code| code.to_string()),
                output.stderr.trim()
            )));
        }

        let dir = Dir::open_ambient_dir(&scratch_path, ambient_authority())
            .map_err(|err| key_error(err.to_string()))?;
        let private_key = dir
            .read_to_string(name)
            .map_err(|err| key_error(err.to_string()))?;
        let public_key = dir
            .read_to_string(format!("{name}.pub"))
            .map_err(|err| key_error(err.to_string()))?;
        Ok(GeneratedKey {
            private_key,
            public_key,
        })
    }
}

fn keygen_args(name: &str, key_path: &Utf8Path) -> Vec<OsString> {
    ["-q", "-t", "ed25519", "-N", "", "-C", name, "-f", key_path.as_str()]
        .into_iter()
        .map(OsString::from)
        .collect()
}

#[cfg(test)]
pub(super) fn keygen_args_for_tests(name: &str, key_path: &Utf8Path) -> Vec<OsString> {
    keygen_args(name, key_path)
}
