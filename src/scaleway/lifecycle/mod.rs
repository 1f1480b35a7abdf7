//! HTTP plumbing and record decoding for the Scaleway backend.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::LazyLock;
use std::time::Duration;

use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;

mod image;
mod security_group;
mod servers;
mod ssh_key;

use crate::backend::{InstanceState, NamedInstance};
use crate::scaleway::types::Action;

use super::{ScalewayBackend, ScalewayBackendError};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const SCALEWAY_INSTANCE_API_BASE: &str = "https://api.scaleway.com/instance/v1";
const SCALEWAY_IAM_API_BASE: &str = "https://api.scaleway.com/iam/v1alpha1";
const PAGE_SIZE: usize = 100;

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Server as returned by the Instance API.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct ServerRecord {
    pub(super) id: String,
    pub(super) state: String,
    #[serde(default)]
    pub(super) tags: Vec<String>,
    #[serde(default)]
    pub(super) public_ip: Option<PublicIpRecord>,
    #[serde(default)]
    pub(super) public_ips: Vec<PublicIpRecord>,
    #[serde(default)]
    pub(super) allowed_actions: Vec<Action>,
}

/// Public address attached to a server.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct PublicIpRecord {
    pub(super) address: String,
}

impl ServerRecord {
    /// Maps the provider state onto the backend-agnostic lifecycle.
    pub(super) fn lifecycle_state(&self) -> InstanceState {
        match self.state.as_str() {
            "running" => InstanceState::Running,
            "starting" | "stopped" | "stopped in place" => InstanceState::Pending,
            _ => InstanceState::Unknown,
        }
    }

    /// First IPv4 public address, falling back to any parseable address.
    pub(super) fn address(&self) -> Option<IpAddr> {
        let candidates: Vec<IpAddr> = self
            .public_ip
            .iter()
            .chain(self.public_ips.iter())
            .filter_map(|ip| ip.address.parse().ok())
            .collect();
        candidates
            .iter()
            .find(|addr| addr.is_ipv4())
            .or_else(|| candidates.first())
            .copied()
    }

    /// Splits `Key=Value` tags into a map; bare tags map to an empty value.
    pub(super) fn tag_map(&self) -> BTreeMap<String, String> {
        self.tags
            .iter()
            .map(|tag| {
                tag.split_once('=').map_or_else(
                    || (tag.clone(), String::new()),
                    |(key, value)| (key.to_owned(), value.to_owned()),
                )
            })
            .collect()
    }

    pub(super) fn into_instance(self) -> NamedInstance {
        NamedInstance {
            state: self.lifecycle_state(),
            address: self.address(),
            tags: self.tag_map(),
            id: self.id,
        }
    }
}

/// Formats a tag for the Instance API.
pub(super) fn format_tag(key: &str, value: &str) -> String {
    format!("{key}={value}")
}

/// Message carried by an API error body.
fn api_message(body: &[u8]) -> String {
    serde_json::from_slice::<scaleway_rs::ScalewayApiError>(body).map_or_else(
        |_| String::from_utf8_lossy(body).into_owned(),
        |api_err| api_err.message,
    )
}

fn provider_error(err: impl std::fmt::Display) -> ScalewayBackendError {
    ScalewayBackendError::Provider {
        message: err.to_string(),
    }
}

impl ScalewayBackend {
    fn instance_url(&self, path: &str) -> String {
        format!(
            "{SCALEWAY_INSTANCE_API_BASE}/zones/{}/{path}",
            self.zone.as_str()
        )
    }

    fn iam_url(path: &str) -> String {
        format!("{SCALEWAY_IAM_API_BASE}/{path}")
    }

    /// Sends an authenticated request and decodes the JSON body.
    ///
    /// A 404 answer yields `Ok(None)`.
    async fn execute<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        builder: RequestBuilder,
    ) -> Result<Option<T>, ScalewayBackendError> {
        let response = builder
            .header("X-Auth-Token", &self.config.secret_key)
            .send()
            .await
            .map_err(provider_error)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = response.bytes().await.map_err(provider_error)?;
        if !status.is_success() {
            return Err(ScalewayBackendError::Api {
                operation,
                status: status.as_u16(),
                message: api_message(&body),
            });
        }

        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|err| provider_error(format!("{operation}: {err}")))
    }

    /// Like [`Self::execute`] but treats 404 as an error.
    async fn execute_required<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        builder: RequestBuilder,
    ) -> Result<T, ScalewayBackendError> {
        self.execute(operation, builder)
            .await?
            .ok_or_else(|| ScalewayBackendError::Api {
                operation,
                status: StatusCode::NOT_FOUND.as_u16(),
                message: String::from("resource not found"),
            })
    }
}

#[cfg(test)]
mod tests;
