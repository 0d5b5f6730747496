//! `exo compute instance`.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::{
    api::{ApiClient, AsyncResult, LONG_OPERATION_TIMEOUT, OperationState, resources::Instance},
    cli::{
        cmd::{compute::for_each_zone, plural, quoted},
        error::ExoError,
        framework::{
            App, CliCommand, CommandDescriptor, CommandTree, FlagSpec, Invocation, Slot, aliases,
            confirmed_targets,
        },
    },
    output::{ByteSize, CommandOutput},
};

const LABEL: &str = "Compute instance";
const PARENT: &[&str] = &["compute", "instance"];

#[derive(Debug, Default, Serialize)]
pub(crate) struct InstanceShowOutput {
    id: String,
    name: String,
    creation_date: Option<DateTime<Utc>>,
    instance_type: String,
    template: String,
    zone: String,
    disk_size: ByteSize,
    state: String,
    ipv4_address: Option<String>,
    ipv6_address: Option<String>,
    ssh_keys: Vec<String>,
    security_groups: Vec<String>,
    private_networks: Vec<String>,
    labels: BTreeMap<String, String>,
}

/// Resolves the names an instance only references by ID.
pub(crate) async fn instance_output(
    client: &ApiClient,
    instance: Instance,
) -> Result<InstanceShowOutput, ExoError> {
    let instance_type = match &instance.instance_type {
        Some(reference) => client.get_instance_type(&reference.id).await?.display_name(),
        None => String::new(),
    };

    let template = match &instance.template {
        // Templates may be deleted after the instance was created.
        Some(reference) => match client.get_template(&reference.id).await {
            Ok(template) => template.name,
            Err(e) if e.is_not_found() => reference.id.clone(),
            Err(e) => return Err(e),
        },
        None => String::new(),
    };

    let security_groups = try_join_all(instance.security_groups.iter().map(|reference| async {
        Ok::<_, ExoError>(client.get_security_group(&reference.id).await?.name)
    }))
    .await?;

    let private_networks = try_join_all(instance.private_networks.iter().map(|reference| async {
        Ok::<_, ExoError>(client.get_private_network(&reference.id).await?.name)
    }))
    .await?;

    Ok(InstanceShowOutput {
        id: instance.id,
        name: instance.name,
        creation_date: instance.created_at,
        instance_type,
        template,
        zone: client.zone().to_string(),
        disk_size: ByteSize::from_gib(instance.disk_size.unwrap_or_default()),
        state: instance.state,
        ipv4_address: instance.public_ip.map(|ip| ip.to_string()),
        ipv6_address: instance.ipv6_address,
        ssh_keys: instance.ssh_keys.into_iter().map(|key| key.name).collect(),
        security_groups,
        private_networks,
        labels: instance.labels,
    })
}

pub(crate) struct InstanceCreate;

#[async_trait]
impl CliCommand for InstanceCreate {
    fn descriptor(&self) -> CommandDescriptor {
        CommandDescriptor::new("create")
            .aliases(aliases::CREATE)
            .about("Create Compute instances")
            .slot(Slot::targets("NAME", "instance name"))
            .flag(
                FlagSpec::string("instance-type")
                    .default_value("standard.medium")
                    .usage("instance type (format: [FAMILY.]SIZE)"),
            )
            .flag(FlagSpec::string("template").usage("instance template NAME|ID"))
            .flag(
                FlagSpec::choice("template-visibility", &["public", "private"])
                    .default_value("public")
                    .usage("instance template visibility"),
            )
            .flag(
                FlagSpec::int64("disk-size")
                    .default_value("50")
                    .usage("instance disk size in GiB"),
            )
            .flag(FlagSpec::string_list("ssh-key").usage("SSH key to deploy on the instance"))
            .flag(
                FlagSpec::string_list("security-group")
                    .usage("instance Security Group NAME|ID (can be specified multiple times)"),
            )
            .flag(
                FlagSpec::string_list("private-network")
                    .usage("instance Private Network NAME|ID (can be specified multiple times)"),
            )
            .flag(FlagSpec::string_map("label").usage("instance label (format: key=value)"))
            .flag(FlagSpec::bool("ipv6").short('6').usage("enable IPv6 on instance"))
            .zone_flag("instance zone")
            .mutating()
            .output::<InstanceShowOutput>()
    }

    async fn run(&self, inv: &Invocation, app: &App) -> Result<Option<CommandOutput>, ExoError> {
        let names = inv.args("NAME")?;
        let disk_size = inv.int64("disk-size")?.unwrap_or(50);
        if disk_size <= 0 {
            return Err(ExoError::usage("--disk-size must be a positive number of GiB"));
        }

        let profile = app.profile()?;
        let client = app.client(&inv.zone()?)?;

        let instance_type = client
            .find_instance_type(&inv.string("instance-type")?.unwrap_or_default())
            .await?;
        let template_name = inv
            .string("template")?
            .unwrap_or_else(|| profile.default_template().to_string());
        let visibility = inv
            .string("template-visibility")?
            .unwrap_or_else(|| "public".into());
        let template = client.find_template(&template_name, &visibility).await?;

        let mut security_groups = Vec::new();
        for group in inv.strings("security-group")? {
            security_groups.push(json!({ "id": client.find_security_group(&group).await?.id }));
        }

        let mut private_networks = Vec::new();
        for network in inv.strings("private-network")? {
            private_networks.push(client.find_private_network(&network).await?.id);
        }

        let mut ssh_keys = inv.strings("ssh-key")?;
        if ssh_keys.is_empty() {
            ssh_keys.extend(profile.default_ssh_key.clone());
        }

        let mut body = Map::new();
        body.insert("instance-type".into(), json!({ "id": instance_type.id }));
        body.insert("template".into(), json!({ "id": template.id }));
        body.insert("disk-size".into(), json!(disk_size));
        if !security_groups.is_empty() {
            body.insert("security-groups".into(), Value::Array(security_groups));
        }
        if !ssh_keys.is_empty() {
            let keys: Vec<Value> = ssh_keys.iter().map(|name| json!({ "name": name })).collect();
            body.insert("ssh-keys".into(), Value::Array(keys));
        }
        let labels = inv.string_map("label")?;
        if !labels.is_empty() {
            body.insert("labels".into(), json!(labels));
        }
        if inv.bool("ipv6")? {
            body.insert("ipv6-enabled".into(), json!(true));
        }

        let client = client.with_timeout(LONG_OPERATION_TIMEOUT);
        let tasks: Vec<_> = names
            .iter()
            .map(|name| {
                let client = client.clone();
                let networks = private_networks.clone();
                let mut body = body.clone();
                body.insert("name".into(), json!(name));

                async move {
                    let operation = client.create_instance(&Value::Object(body)).await?;
                    let done = client.wait_for(operation, OperationState::Success).await?;
                    let id = done.reference_id()?.to_string();

                    for network in networks {
                        let operation = client.attach_private_network(&network, &id).await?;
                        client.wait_for(operation, OperationState::Success).await?;
                    }

                    instance_output(&client, client.get_instance(&id).await?).await
                }
            })
            .collect();

        let message = format!("Creating {} {}", plural("instance", names.len()), quoted(&names));
        let outputs = app.driver().drive_many(&message, tasks).await?;

        Ok(Some(CommandOutput::records(LABEL, &outputs)?))
    }
}

pub(crate) struct InstanceDelete;

#[async_trait]
impl CliCommand for InstanceDelete {
    fn descriptor(&self) -> CommandDescriptor {
        CommandDescriptor::new("delete")
            .aliases(aliases::DELETE)
            .about("Delete Compute instances")
            .slot(Slot::targets("INSTANCE", "instance NAME|ID"))
            .zone_flag("instance zone")
            .confirmation()
            .mutating()
    }

    async fn run(&self, inv: &Invocation, app: &App) -> Result<Option<CommandOutput>, ExoError> {
        let client = app.client(&inv.zone()?)?;

        let Some(instances) = confirmed_targets(
            inv,
            app,
            inv.args("INSTANCE")?,
            |name| {
                let client = client.clone();
                async move { client.find_instance(&name).await }
            },
            |instance: &Instance| format!("Are you sure you want to delete instance {:?}?", instance.name),
        )
        .await?
        else {
            return Ok(None);
        };

        let names: Vec<String> = instances.iter().map(|i| i.name.clone()).collect();
        let tasks: Vec<_> = instances
            .into_iter()
            .map(|instance| {
                let client = client.clone();
                async move {
                    let operation = client.delete_instance(&instance.id).await?;
                    client.wait_for(operation, OperationState::Success).await?;
                    Ok(())
                }
            })
            .collect();

        let message = format!("Deleting {} {}", plural("instance", names.len()), quoted(&names));
        app.driver().drive_many(&message, tasks).await?;

        Ok(None)
    }
}

#[derive(Debug, Default, Serialize)]
pub(crate) struct InstanceListItem {
    id: String,
    name: String,
    zone: String,
    #[serde(rename = "type")]
    instance_type: String,
    ip_address: Option<String>,
    state: String,
}

pub(crate) struct InstanceList;

#[async_trait]
impl CliCommand for InstanceList {
    fn descriptor(&self) -> CommandDescriptor {
        CommandDescriptor::new("list")
            .aliases(aliases::LIST)
            .about("List Compute instances")
            .zone_flag("zone to filter results to")
            .output::<InstanceListItem>()
    }

    async fn run(&self, inv: &Invocation, app: &App) -> Result<Option<CommandOutput>, ExoError> {
        let items = for_each_zone(inv, app, |client| async move {
            let instances = client.list_instances().await?;
            if instances.is_empty() {
                return Ok(Vec::new());
            }

            let types: HashMap<String, String> = client
                .list_instance_types()
                .await?
                .into_iter()
                .map(|t| (t.id.clone(), t.display_name()))
                .collect();

            Ok(instances
                .into_iter()
                .map(|instance| InstanceListItem {
                    instance_type: instance
                        .instance_type
                        .as_ref()
                        .and_then(|reference| types.get(&reference.id).cloned())
                        .unwrap_or_default(),
                    id: instance.id,
                    name: instance.name,
                    zone: client.zone().to_string(),
                    ip_address: instance.public_ip.map(|ip| ip.to_string()),
                    state: instance.state,
                })
                .collect())
        })
        .await?;

        Ok(Some(CommandOutput::list(&items)?))
    }
}

pub(crate) struct InstanceShow;

#[async_trait]
impl CliCommand for InstanceShow {
    fn descriptor(&self) -> CommandDescriptor {
        CommandDescriptor::new("show")
            .aliases(aliases::SHOW)
            .about("Show a Compute instance details")
            .slot(Slot::fixed("INSTANCE", "instance NAME|ID"))
            .zone_flag("instance zone")
            .output::<InstanceShowOutput>()
    }

    async fn run(&self, inv: &Invocation, app: &App) -> Result<Option<CommandOutput>, ExoError> {
        let client = app.client(&inv.zone()?)?;
        let instance = client.find_instance(&inv.required_arg("INSTANCE")?).await?;
        let output = instance_output(&client, instance).await?;

        Ok(Some(CommandOutput::record(LABEL, &output)?))
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Action {
    Start,
    Stop,
    Reboot,
}

impl Action {
    fn token(self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Reboot => "reboot",
        }
    }

    fn progress(self) -> &'static str {
        match self {
            Action::Start => "Starting",
            Action::Stop => "Stopping",
            Action::Reboot => "Rebooting",
        }
    }
}

/// `start`, `stop` and `reboot` differ only in the action sent.
pub(crate) struct InstanceAction(pub(crate) Action);

#[async_trait]
impl CliCommand for InstanceAction {
    fn descriptor(&self) -> CommandDescriptor {
        let descriptor = CommandDescriptor::new(self.0.token())
            .about(match self.0 {
                Action::Start => "Start Compute instances",
                Action::Stop => "Stop Compute instances",
                Action::Reboot => "Reboot Compute instances",
            })
            .slot(Slot::targets("INSTANCE", "instance NAME|ID"))
            .zone_flag("instance zone")
            .mutating()
            .output::<InstanceShowOutput>();

        match self.0 {
            Action::Start => descriptor,
            Action::Stop | Action::Reboot => descriptor.confirmation(),
        }
    }

    async fn run(&self, inv: &Invocation, app: &App) -> Result<Option<CommandOutput>, ExoError> {
        let action = self.0;
        let client = app.client(&inv.zone()?)?;

        let Some(instances) = confirmed_targets(
            inv,
            app,
            inv.args("INSTANCE")?,
            |name| {
                let client = client.clone();
                async move { client.find_instance(&name).await }
            },
            |instance: &Instance| {
                format!(
                    "Are you sure you want to {} instance {:?}?",
                    action.token(),
                    instance.name
                )
            },
        )
        .await?
        else {
            return Ok(None);
        };

        let names: Vec<String> = instances.iter().map(|i| i.name.clone()).collect();
        let tasks: Vec<_> = instances
            .into_iter()
            .map(|instance| {
                let client = client.clone();
                async move {
                    let operation = client.instance_action(&instance.id, action.token()).await?;
                    client.wait_for(operation, OperationState::Success).await?;
                    instance_output(&client, client.get_instance(&instance.id).await?).await
                }
            })
            .collect();

        let message = format!(
            "{} {} {}",
            action.progress(),
            plural("instance", names.len()),
            quoted(&names)
        );
        let outputs = app.driver().drive_many(&message, tasks).await?;

        Ok(Some(CommandOutput::records(LABEL, &outputs)?))
    }
}

pub(crate) struct InstanceUpdate;

#[async_trait]
impl CliCommand for InstanceUpdate {
    fn descriptor(&self) -> CommandDescriptor {
        CommandDescriptor::new("update")
            .aliases(aliases::UPDATE)
            .about("Update a Compute instance")
            .long_about(
                "This command updates an Instance.\n\n\
                 Passing --label= or --label = removes every label.",
            )
            .slot(Slot::fixed("INSTANCE", "instance NAME|ID"))
            .flag(FlagSpec::string("name").usage("instance name"))
            .flag(FlagSpec::string_map("label").usage("instance label (format: key=value)"))
            .zone_flag("instance zone")
            .mutating()
            .output::<InstanceShowOutput>()
    }

    async fn run(&self, inv: &Invocation, app: &App) -> Result<Option<CommandOutput>, ExoError> {
        let client = app.client(&inv.zone()?)?;
        let instance = client.find_instance(&inv.required_arg("INSTANCE")?).await?;

        let mut body = Map::new();
        if inv.changed("name") {
            body.insert("name".into(), json!(inv.string("name")?.unwrap_or_default()));
        }
        if inv.changed("label") {
            body.insert("labels".into(), json!(inv.string_map("label")?));
        }

        let message = format!("Updating instance {:?}", instance.name);
        let pending = if body.is_empty() {
            tracing::debug!("nothing to update");
            AsyncResult::Immediate(instance)
        } else {
            AsyncResult::Pending(client.update_instance(&instance.id, &Value::Object(body)).await?)
        };

        let updated = {
            let client = client.clone();
            app.driver()
                .drive(&message, async move {
                    let client = &client;
                    pending
                        .settle(client, |operation| async move {
                            client.get_instance(operation.reference_id()?).await
                        })
                        .await
                })
                .await?
        };

        let output = instance_output(&client, updated).await?;
        Ok(Some(CommandOutput::record(LABEL, &output)?))
    }
}

pub(crate) fn register(tree: &mut CommandTree) -> Result<(), ExoError> {
    tree.group(
        &["compute"],
        CommandDescriptor::new("instance").about("Compute instances management"),
    )?;

    tree.register(PARENT, InstanceCreate)?;
    tree.register(PARENT, InstanceDelete)?;
    tree.register(PARENT, InstanceList)?;
    tree.register(PARENT, InstanceShow)?;
    tree.register(PARENT, InstanceAction(Action::Start))?;
    tree.register(PARENT, InstanceAction(Action::Stop))?;
    tree.register(PARENT, InstanceAction(Action::Reboot))?;
    tree.register(PARENT, InstanceUpdate)?;

    Ok(())
}
