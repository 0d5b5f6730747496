//! Resource payloads and the calls the bundled commands make.

use std::{collections::BTreeMap, net::IpAddr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    api::{ApiClient, Operation},
    cli::error::ExoError,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct IdRef {
    #[serde(default)]
    pub(crate) id: String,
}

impl IdRef {
    pub(crate) fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct NameRef {
    #[serde(default)]
    pub(crate) name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct Zone {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) api_endpoint: Option<String>,
    #[serde(default)]
    pub(crate) sos_endpoint: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct Instance {
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) state: String,
    #[serde(default)]
    pub(crate) created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub(crate) instance_type: Option<IdRef>,
    #[serde(default)]
    pub(crate) template: Option<IdRef>,
    #[serde(default)]
    pub(crate) disk_size: Option<u64>,
    #[serde(default)]
    pub(crate) public_ip: Option<IpAddr>,
    #[serde(default)]
    pub(crate) ipv6_address: Option<String>,
    #[serde(default)]
    pub(crate) security_groups: Vec<IdRef>,
    #[serde(default)]
    pub(crate) private_networks: Vec<IdRef>,
    #[serde(default)]
    pub(crate) ssh_keys: Vec<NameRef>,
    #[serde(default)]
    pub(crate) labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct InstanceType {
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) family: String,
    #[serde(default)]
    pub(crate) size: String,
    #[serde(default)]
    pub(crate) cpus: Option<u64>,
    #[serde(default)]
    pub(crate) gpus: Option<u64>,
    #[serde(default)]
    pub(crate) memory: Option<u64>,
    #[serde(default)]
    pub(crate) authorized: Option<bool>,
    #[serde(default)]
    pub(crate) zones: Vec<String>,
}

impl InstanceType {
    pub(crate) fn display_name(&self) -> String {
        format!("{}.{}", self.family, self.size)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct Template {
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) description: Option<String>,
    #[serde(default)]
    pub(crate) family: Option<String>,
    #[serde(default)]
    pub(crate) size: Option<u64>,
    #[serde(default)]
    pub(crate) visibility: Option<String>,
    #[serde(default)]
    pub(crate) default_user: Option<String>,
    #[serde(default)]
    pub(crate) boot_mode: Option<String>,
    #[serde(default)]
    pub(crate) created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct SshKey {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) fingerprint: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct PrivateNetwork {
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) description: Option<String>,
    #[serde(default)]
    pub(crate) start_ip: Option<IpAddr>,
    #[serde(default)]
    pub(crate) end_ip: Option<IpAddr>,
    #[serde(default)]
    pub(crate) netmask: Option<IpAddr>,
    #[serde(default)]
    pub(crate) labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct SecurityGroup {
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) description: Option<String>,
    #[serde(default)]
    pub(crate) rules: Vec<SecurityGroupRule>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct SecurityGroupRule {
    #[serde(default)]
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) description: Option<String>,
    #[serde(default)]
    pub(crate) flow_direction: String,
    #[serde(default)]
    pub(crate) protocol: String,
    #[serde(default)]
    pub(crate) network: Option<String>,
    #[serde(default)]
    pub(crate) start_port: Option<u16>,
    #[serde(default)]
    pub(crate) end_port: Option<u16>,
    #[serde(default)]
    pub(crate) icmp: Option<Icmp>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct Icmp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) code: Option<u8>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub(crate) kind: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct Maintenance {
    pub(crate) dow: String,
    pub(crate) time: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct DatabaseService {
    pub(crate) name: String,
    #[serde(default, rename = "type")]
    pub(crate) kind: String,
    #[serde(default)]
    pub(crate) plan: String,
    #[serde(default)]
    pub(crate) state: String,
    #[serde(default)]
    pub(crate) node_count: Option<u64>,
    #[serde(default)]
    pub(crate) disk_size: Option<u64>,
    #[serde(default)]
    pub(crate) termination_protection: Option<bool>,
    #[serde(default)]
    pub(crate) maintenance: Option<Maintenance>,
    #[serde(default)]
    pub(crate) created_at: Option<DateTime<Utc>>,
}

/// Whether `needle` is a resource ID rather than a name.
pub(crate) fn is_id(needle: &str) -> bool {
    uuid::Uuid::parse_str(needle).is_ok()
}

/// Picks one item by exact ID, else by unique name.
fn find_one<T>(
    items: Vec<T>,
    kind: &str,
    needle: &str,
    id: impl Fn(&T) -> &str,
    name: impl Fn(&T) -> &str,
) -> Result<T, ExoError> {
    let mut by_name = Vec::new();
    for item in items {
        if id(&item) == needle {
            return Ok(item);
        }
        if name(&item) == needle {
            by_name.push(item);
        }
    }

    match by_name.len() {
        0 => Err(ExoError::NotFound(format!("{kind} {needle:?}"))),
        1 => Ok(by_name.remove(0)),
        count => Err(ExoError::Ambiguous {
            kind: kind.to_string(),
            name: needle.to_string(),
            count,
        }),
    }
}

/// Unwraps `{"<key>": [...]}` list envelopes.
async fn list<T: DeserializeOwned>(
    client: &ApiClient,
    path: &[&str],
    query: &[(&str, &str)],
    key: &str,
) -> Result<Vec<T>, ExoError> {
    let mut envelope: serde_json::Map<String, serde_json::Value> = client.get(path, query).await?;
    match envelope.remove(key) {
        Some(items) => Ok(serde_json::from_value(items)?),
        None => Ok(Vec::new()),
    }
}

impl ApiClient {
    pub(crate) async fn list_zones(&self) -> Result<Vec<Zone>, ExoError> {
        list(self, &["zone"], &[], "zones").await
    }

    pub(crate) async fn list_instances(&self) -> Result<Vec<Instance>, ExoError> {
        list(self, &["instance"], &[], "instances").await
    }

    pub(crate) async fn get_instance(&self, id: &str) -> Result<Instance, ExoError> {
        self.get(&["instance", id], &[]).await
    }

    pub(crate) async fn find_instance(&self, name_or_id: &str) -> Result<Instance, ExoError> {
        if is_id(name_or_id) {
            return self.get_instance(name_or_id).await;
        }

        find_one(
            self.list_instances().await?,
            "instance",
            name_or_id,
            |i| &i.id,
            |i| &i.name,
        )
    }

    pub(crate) async fn create_instance(&self, body: &serde_json::Value) -> Result<Operation, ExoError> {
        self.post(&["instance"], body).await
    }

    pub(crate) async fn update_instance(
        &self,
        id: &str,
        body: &serde_json::Value,
    ) -> Result<Operation, ExoError> {
        self.put(&["instance", id], Some(body)).await
    }

    pub(crate) async fn delete_instance(&self, id: &str) -> Result<Operation, ExoError> {
        self.delete(&["instance", id]).await
    }

    /// `start`, `stop` or `reboot`.
    pub(crate) async fn instance_action(&self, id: &str, action: &str) -> Result<Operation, ExoError> {
        let target = format!("{id}:{action}");
        self.put(&["instance", &target], None).await
    }

    pub(crate) async fn list_instance_types(&self) -> Result<Vec<InstanceType>, ExoError> {
        list(self, &["instance-type"], &[], "instance-types").await
    }

    pub(crate) async fn get_instance_type(&self, id: &str) -> Result<InstanceType, ExoError> {
        self.get(&["instance-type", id], &[]).await
    }

    /// Accepts an ID, `family.size`, or a bare size in the `standard` family.
    pub(crate) async fn find_instance_type(&self, kind: &str) -> Result<InstanceType, ExoError> {
        let wanted = if kind.contains('.') {
            kind.to_string()
        } else {
            format!("standard.{kind}")
        };

        let types = self.list_instance_types().await?;
        types
            .into_iter()
            .find(|t| t.id == kind || t.display_name().eq_ignore_ascii_case(&wanted))
            .ok_or_else(|| ExoError::NotFound(format!("instance type {kind:?}")))
    }

    pub(crate) async fn list_templates(&self, visibility: &str) -> Result<Vec<Template>, ExoError> {
        list(self, &["template"], &[("visibility", visibility)], "templates").await
    }

    pub(crate) async fn get_template(&self, id: &str) -> Result<Template, ExoError> {
        self.get(&["template", id], &[]).await
    }

    pub(crate) async fn find_template(
        &self,
        name_or_id: &str,
        visibility: &str,
    ) -> Result<Template, ExoError> {
        let templates = self.list_templates(visibility).await?;
        if let Some(template) = templates.iter().find(|t| t.id == name_or_id) {
            return Ok(template.clone());
        }

        // Public templates are republished under the same name; the newest wins.
        templates
            .into_iter()
            .filter(|t| t.name == name_or_id)
            .max_by_key(|t| t.created_at)
            .ok_or_else(|| ExoError::NotFound(format!("template {name_or_id:?}")))
    }

    pub(crate) async fn list_ssh_keys(&self) -> Result<Vec<SshKey>, ExoError> {
        list(self, &["ssh-key"], &[], "ssh-keys").await
    }

    pub(crate) async fn get_ssh_key(&self, name: &str) -> Result<SshKey, ExoError> {
        self.get(&["ssh-key", name], &[]).await
    }

    pub(crate) async fn register_ssh_key(
        &self,
        name: &str,
        public_key: &str,
    ) -> Result<Operation, ExoError> {
        self.post(
            &["ssh-key"],
            &serde_json::json!({ "name": name, "public-key": public_key }),
        )
        .await
    }

    pub(crate) async fn delete_ssh_key(&self, name: &str) -> Result<Operation, ExoError> {
        self.delete(&["ssh-key", name]).await
    }

    pub(crate) async fn list_private_networks(&self) -> Result<Vec<PrivateNetwork>, ExoError> {
        list(self, &["private-network"], &[], "private-networks").await
    }

    pub(crate) async fn get_private_network(&self, id: &str) -> Result<PrivateNetwork, ExoError> {
        self.get(&["private-network", id], &[]).await
    }

    pub(crate) async fn find_private_network(&self, name_or_id: &str) -> Result<PrivateNetwork, ExoError> {
        if is_id(name_or_id) {
            return self.get_private_network(name_or_id).await;
        }

        find_one(
            self.list_private_networks().await?,
            "private network",
            name_or_id,
            |p| &p.id,
            |p| &p.name,
        )
    }

    pub(crate) async fn create_private_network(
        &self,
        body: &serde_json::Value,
    ) -> Result<Operation, ExoError> {
        self.post(&["private-network"], body).await
    }

    pub(crate) async fn update_private_network(
        &self,
        id: &str,
        body: &serde_json::Value,
    ) -> Result<Operation, ExoError> {
        self.put(&["private-network", id], Some(body)).await
    }

    pub(crate) async fn delete_private_network(&self, id: &str) -> Result<Operation, ExoError> {
        self.delete(&["private-network", id]).await
    }

    pub(crate) async fn attach_private_network(
        &self,
        network_id: &str,
        instance_id: &str,
    ) -> Result<Operation, ExoError> {
        let target = format!("{network_id}:attach");
        self.put(
            &["private-network", &target],
            Some(&serde_json::json!({ "instance": { "id": instance_id } })),
        )
        .await
    }

    pub(crate) async fn list_security_groups(&self) -> Result<Vec<SecurityGroup>, ExoError> {
        list(self, &["security-group"], &[], "security-groups").await
    }

    pub(crate) async fn get_security_group(&self, id: &str) -> Result<SecurityGroup, ExoError> {
        self.get(&["security-group", id], &[]).await
    }

    pub(crate) async fn find_security_group(&self, name_or_id: &str) -> Result<SecurityGroup, ExoError> {
        if is_id(name_or_id) {
            return self.get_security_group(name_or_id).await;
        }

        find_one(
            self.list_security_groups().await?,
            "security group",
            name_or_id,
            |s| &s.id,
            |s| &s.name,
        )
    }

    pub(crate) async fn create_security_group(
        &self,
        body: &serde_json::Value,
    ) -> Result<Operation, ExoError> {
        self.post(&["security-group"], body).await
    }

    pub(crate) async fn delete_security_group(&self, id: &str) -> Result<Operation, ExoError> {
        self.delete(&["security-group", id]).await
    }

    pub(crate) async fn add_security_group_rule(
        &self,
        group_id: &str,
        body: &serde_json::Value,
    ) -> Result<Operation, ExoError> {
        self.post(&["security-group", group_id, "rules"], body).await
    }

    pub(crate) async fn list_database_services(&self) -> Result<Vec<DatabaseService>, ExoError> {
        list(self, &["dbaas-service"], &[], "dbaas-services").await
    }

    pub(crate) async fn get_database_service(&self, name: &str) -> Result<DatabaseService, ExoError> {
        self.get(&["dbaas-service", name], &[]).await
    }

    pub(crate) async fn update_database_service(
        &self,
        service: &DatabaseService,
        body: &serde_json::Value,
    ) -> Result<Operation, ExoError> {
        let engine = format!("dbaas-{}", service.kind);
        self.put(&[&engine, &service.name], Some(body)).await
    }

    pub(crate) async fn delete_database_service(&self, name: &str) -> Result<Operation, ExoError> {
        self.delete(&["dbaas-service", name]).await
    }
}
