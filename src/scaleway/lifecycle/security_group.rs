//! Security group lookup and ingress rules.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::SecurityPolicy;

use super::super::{ScalewayBackend, ScalewayBackendError};
use super::HTTP_CLIENT;

#[derive(Deserialize)]
struct SecurityGroupRecord {
    id: String,
    name: String,
}

impl From<SecurityGroupRecord> for SecurityPolicy {
    fn from(record: SecurityGroupRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
        }
    }
}

#[derive(Deserialize)]
struct SecurityGroupList {
    security_groups: Vec<SecurityGroupRecord>,
}

#[derive(Deserialize)]
struct SecurityGroupEnvelope {
    security_group: SecurityGroupRecord,
}

#[derive(Serialize)]
struct CreateSecurityGroupRequest<'a> {
    name: &'a str,
    description: &'a str,
    project: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization: Option<&'a str>,
    stateful: bool,
    inbound_default_policy: &'static str,
    outbound_default_policy: &'static str,
}

#[derive(Serialize)]
struct InboundRuleRequest {
    protocol: &'static str,
    direction: &'static str,
    action: &'static str,
    ip_range: &'static str,
    dest_port_from: u16,
}

impl InboundRuleRequest {
    const fn tcp_from_anywhere(port: u16) -> Self {
        Self {
            protocol: "TCP",
            direction: "inbound",
            action: "accept",
            ip_range: "0.0.0.0/0",
            dest_port_from: port,
        }
    }
}

impl ScalewayBackend {
    /// The API filters by substring, so only exact name matches count.
    pub(in crate::scaleway) async fn find_security_group(
        &self,
        name: &str,
    ) -> Result<Option<SecurityPolicy>, ScalewayBackendError> {
        let request = HTTP_CLIENT.get(self.instance_url("security_groups")).query(&[
            ("name", name),
            ("project", self.config.default_project_id.as_str()),
        ]);
        let list: SecurityGroupList = self
            .execute_required("list security groups", request)
            .await?;
        Ok(list
            .security_groups
            .into_iter()
            .find(|group| group.name == name)
            .map(SecurityPolicy::from))
    }

    /// New groups drop inbound traffic until rules are added.
    pub(in crate::scaleway) async fn create_security_group(
        &self,
        name: &str,
        description: &str,
    ) -> Result<SecurityPolicy, ScalewayBackendError> {
        let payload = CreateSecurityGroupRequest {
            name,
            description,
            project: &self.config.default_project_id,
            organization: self.config.default_organization_id.as_deref(),
            stateful: true,
            inbound_default_policy: "drop",
            outbound_default_policy: "accept",
        };
        let request = HTTP_CLIENT
            .post(self.instance_url("security_groups"))
            .json(&payload);
        let envelope: SecurityGroupEnvelope = self
            .execute_required("create security group", request)
            .await?;
        debug!("Created security group {}", envelope.security_group.id);
        Ok(envelope.security_group.into())
    }

    pub(in crate::scaleway) async fn add_inbound_rule(
        &self,
        policy: &SecurityPolicy,
        port: u16,
    ) -> Result<(), ScalewayBackendError> {
        let request = HTTP_CLIENT
            .post(self.instance_url(&format!("security_groups/{}/rules", policy.id)))
            .json(&InboundRuleRequest::tcp_from_anywhere(port));
        let _: serde_json::Value = self
            .execute_required("authorize ingress", request)
            .await?;
        Ok(())
    }
}
