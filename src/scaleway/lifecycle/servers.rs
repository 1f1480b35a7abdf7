//! Server listing, creation, tagging, and power management.

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::backend::{LaunchSpec, NamedInstance};

use super::super::{ScalewayBackend, ScalewayBackendError};
use super::{HTTP_CLIENT, PAGE_SIZE, ServerRecord, format_tag};

/// Tag marking every server created by this tool.
const OWNER_TAG: &str = "demo-deployer";

#[derive(Deserialize)]
struct ServerList {
    servers: Vec<ServerRecord>,
}

#[derive(Deserialize)]
struct ServerEnvelope {
    server: ServerRecord,
}

#[derive(Serialize)]
struct CreateServerRequest<'a> {
    name: String,
    commercial_type: &'a str,
    image: &'a str,
    project: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization: Option<&'a str>,
    security_group: &'a str,
    dynamic_ip_required: bool,
    routed_ip_enabled: bool,
    tags: Vec<String>,
}

#[derive(Serialize)]
struct UpdateTagsRequest {
    tags: Vec<String>,
}

impl ScalewayBackend {
    /// Lists every server in the project, following pagination until a
    /// short page comes back.
    pub(in crate::scaleway) async fn list_servers(
        &self,
    ) -> Result<Vec<NamedInstance>, ScalewayBackendError> {
        let mut servers = Vec::new();
        for page in 1_u32.. {
            let request = HTTP_CLIENT
                .get(self.instance_url("servers"))
                .query(&[("project", self.config.default_project_id.as_str())])
                .query(&[("per_page", PAGE_SIZE)])
                .query(&[("page", page)]);
            let list: ServerList = self.execute_required("list servers", request).await?;
            let received = list.servers.len();
            servers.extend(list.servers.into_iter().map(ServerRecord::into_instance));
            if is_last_page(received) {
                break;
            }
            debug!("Fetching server page {}", page.saturating_add(1));
        }
        Ok(servers)
    }

    async fn fetch_server_record(
        &self,
        instance_id: &str,
    ) -> Result<Option<ServerRecord>, ScalewayBackendError> {
        let request = HTTP_CLIENT.get(self.instance_url(&format!("servers/{instance_id}")));
        let envelope: Option<ServerEnvelope> = self.execute("describe server", request).await?;
        Ok(envelope.map(|found| found.server))
    }

    pub(in crate::scaleway) async fn fetch_server(
        &self,
        instance_id: &str,
    ) -> Result<Option<NamedInstance>, ScalewayBackendError> {
        Ok(self
            .fetch_server_record(instance_id)
            .await?
            .map(ServerRecord::into_instance))
    }

    /// Creates a server attached to the launch security group and powers it
    /// on. Scaleway creates servers stopped.
    pub(in crate::scaleway) async fn create_server(
        &self,
        spec: &LaunchSpec,
        image_id: &str,
    ) -> Result<NamedInstance, ScalewayBackendError> {
        let payload = CreateServerRequest {
            name: format!("demo-deployer-{}", Uuid::new_v4().simple()),
            commercial_type: &spec.instance_type,
            image: image_id,
            project: &self.config.default_project_id,
            organization: self.config.default_organization_id.as_deref(),
            security_group: &spec.security_policy.id,
            dynamic_ip_required: true,
            routed_ip_enabled: true,
            tags: vec![String::from(OWNER_TAG)],
        };

        let request = HTTP_CLIENT.post(self.instance_url("servers")).json(&payload);
        let envelope: ServerEnvelope =
            match self.execute_required("create server", request).await {
                Ok(envelope) => envelope,
                Err(ScalewayBackendError::Api { message, .. })
                    if message.to_ascii_lowercase().contains("commercial_type")
                        || message.contains(spec.instance_type.as_str()) =>
                {
                    return Err(ScalewayBackendError::InstanceTypeUnavailable {
                        instance_type: spec.instance_type.clone(),
                        zone: self.zone.as_str().to_owned(),
                    });
                }
                Err(other) => return Err(other),
            };

        self.power_on_if_needed(&envelope.server).await?;
        Ok(envelope.server.into_instance())
    }

    pub(in crate::scaleway) async fn power_on_if_needed(
        &self,
        server: &ServerRecord,
    ) -> Result<(), ScalewayBackendError> {
        if server.state == "running" || server.state == "starting" {
            return Ok(());
        }

        if server
            .allowed_actions
            .iter()
            .any(|action| action.as_str() == "poweron")
        {
            self.api
                .perform_instance_action_async(self.zone.as_str(), &server.id, "poweron")
                .await?;
            return Ok(());
        }

        Err(ScalewayBackendError::PowerOnNotAllowed {
            instance_id: server.id.clone(),
            state: server.state.clone(),
        })
    }

    /// Replaces any existing `key=` tag with `key=value`.
    pub(in crate::scaleway) async fn set_server_tag(
        &self,
        instance_id: &str,
        key: &str,
        value: &str,
    ) -> Result<(), ScalewayBackendError> {
        let server = self.fetch_server_record(instance_id).await?.ok_or_else(|| {
            ScalewayBackendError::NotFound {
                kind: "server",
                id: instance_id.to_owned(),
            }
        })?;
        let tags = replace_tag(server.tags, key, value);
        debug!("Tagging {instance_id} with {tags:?}");

        let request = HTTP_CLIENT
            .patch(self.instance_url(&format!("servers/{instance_id}")))
            .json(&UpdateTagsRequest { tags });
        let _: ServerEnvelope = self.execute_required("tag server", request).await?;
        Ok(())
    }
}

fn replace_tag(tags: Vec<String>, key: &str, value: &str) -> Vec<String> {
    let prefix = format!("{key}=");
    let mut updated: Vec<String> = tags
        .into_iter()
        .filter(|tag| !tag.starts_with(&prefix))
        .collect();
    updated.push(format_tag(key, value));
    updated
}

/// A page shorter than the requested size is the final one.
pub(super) const fn is_last_page(received: usize) -> bool {
    received < PAGE_SIZE
}

#[cfg(test)]
pub(super) fn replace_tag_for_tests(tags: Vec<String>, key: &str, value: &str) -> Vec<String> {
    replace_tag(tags, key, value)
}
