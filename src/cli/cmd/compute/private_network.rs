use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::{
    api::{ApiClient, AsyncResult, OperationState, resources::PrivateNetwork},
    cli::{
        cmd::{compute::for_each_zone, plural, quoted},
        error::ExoError,
        framework::{
            App, CliCommand, CommandDescriptor, CommandTree, FlagSpec, Invocation, Slot, aliases,
            confirmed_targets,
        },
    },
    output::CommandOutput,
};

const LABEL: &str = "Private Network";
const PARENT: &[&str] = &["compute", "private-network"];

#[derive(Debug, Default, Serialize)]
pub(crate) struct PrivateNetworkShowOutput {
    id: String,
    name: String,
    description: Option<String>,
    zone: String,
    #[serde(rename = "type")]
    kind: String,
    start_ip: Option<String>,
    end_ip: Option<String>,
    netmask: Option<String>,
    labels: BTreeMap<String, String>,
}

impl PrivateNetworkShowOutput {
    fn new(client: &ApiClient, network: PrivateNetwork) -> Self {
        // Networks with an address range get DHCP leases from the platform.
        let kind = if network.start_ip.is_some() { "managed" } else { "manual" };

        Self {
            id: network.id,
            name: network.name,
            description: network.description,
            zone: client.zone().to_string(),
            kind: kind.to_string(),
            start_ip: network.start_ip.map(|ip| ip.to_string()),
            end_ip: network.end_ip.map(|ip| ip.to_string()),
            netmask: network.netmask.map(|ip| ip.to_string()),
            labels: network.labels,
        }
    }
}

fn ip_flags(descriptor: CommandDescriptor) -> CommandDescriptor {
    descriptor
        .flag(FlagSpec::ip("start-ip").usage("managed Private Network range start IP address"))
        .flag(FlagSpec::ip("end-ip").usage("managed Private Network range end IP address"))
        .flag(FlagSpec::ip("netmask").usage("managed Private Network netmask"))
}

/// The request fields for every flag set on the command line.
fn changed_fields(inv: &Invocation) -> Result<Map<String, Value>, ExoError> {
    let mut body = Map::new();
    for (flag, field) in [("name", "name"), ("description", "description")] {
        if inv.changed(flag) {
            body.insert(field.into(), json!(inv.string(flag)?.unwrap_or_default()));
        }
    }
    for flag in ["start-ip", "end-ip", "netmask"] {
        if let Some(ip) = inv.ip(flag)? {
            body.insert(flag.into(), json!(ip.to_string()));
        }
    }
    if inv.changed("label") {
        body.insert("labels".into(), json!(inv.string_map("label")?));
    }

    Ok(body)
}

pub(crate) struct PrivateNetworkCreate;

#[async_trait]
impl CliCommand for PrivateNetworkCreate {
    fn descriptor(&self) -> CommandDescriptor {
        ip_flags(
            CommandDescriptor::new("create")
                .aliases(aliases::CREATE)
                .about("Create a Private Network")
                .slot(Slot::fixed("NAME", "Private Network name"))
                .flag(FlagSpec::string("description").usage("Private Network description")),
        )
        .flag(FlagSpec::string_map("label").usage("Private Network label (format: key=value)"))
        .zone_flag("Private Network zone")
        .mutating()
        .output::<PrivateNetworkShowOutput>()
    }

    async fn run(&self, inv: &Invocation, app: &App) -> Result<Option<CommandOutput>, ExoError> {
        let name = inv.required_arg("NAME")?;
        let mut body = changed_fields(inv)?;
        body.insert("name".into(), json!(name));

        let client = app.client(&inv.zone()?)?;
        let message = format!("Creating Private Network {name:?}");
        let network = {
            let client = client.clone();
            app.driver()
                .drive(&message, async move {
                    let operation = client.create_private_network(&Value::Object(body)).await?;
                    let done = client.wait_for(operation, OperationState::Success).await?;
                    client.get_private_network(done.reference_id()?).await
                })
                .await?
        };

        let output = PrivateNetworkShowOutput::new(&client, network);
        Ok(Some(CommandOutput::record(LABEL, &output)?))
    }
}

#[derive(Debug, Default, Serialize)]
pub(crate) struct PrivateNetworkListItem {
    id: String,
    name: String,
    zone: String,
}

pub(crate) struct PrivateNetworkList;

#[async_trait]
impl CliCommand for PrivateNetworkList {
    fn descriptor(&self) -> CommandDescriptor {
        CommandDescriptor::new("list")
            .aliases(aliases::LIST)
            .about("List Private Networks")
            .zone_flag("zone to filter results to")
            .output::<PrivateNetworkListItem>()
    }

    async fn run(&self, inv: &Invocation, app: &App) -> Result<Option<CommandOutput>, ExoError> {
        let items = for_each_zone(inv, app, |client| async move {
            Ok(client
                .list_private_networks()
                .await?
                .into_iter()
                .map(|network| PrivateNetworkListItem {
                    id: network.id,
                    name: network.name,
                    zone: client.zone().to_string(),
                })
                .collect())
        })
        .await?;

        Ok(Some(CommandOutput::list(&items)?))
    }
}

pub(crate) struct PrivateNetworkShow;

#[async_trait]
impl CliCommand for PrivateNetworkShow {
    fn descriptor(&self) -> CommandDescriptor {
        CommandDescriptor::new("show")
            .aliases(aliases::SHOW)
            .about("Show a Private Network details")
            .slot(Slot::fixed("PRIVATE-NETWORK", "Private Network NAME|ID"))
            .zone_flag("Private Network zone")
            .output::<PrivateNetworkShowOutput>()
    }

    async fn run(&self, inv: &Invocation, app: &App) -> Result<Option<CommandOutput>, ExoError> {
        let client = app.client(&inv.zone()?)?;
        let network = client
            .find_private_network(&inv.required_arg("PRIVATE-NETWORK")?)
            .await?;

        let output = PrivateNetworkShowOutput::new(&client, network);
        Ok(Some(CommandOutput::record(LABEL, &output)?))
    }
}

pub(crate) struct PrivateNetworkUpdate;

#[async_trait]
impl CliCommand for PrivateNetworkUpdate {
    fn descriptor(&self) -> CommandDescriptor {
        ip_flags(
            CommandDescriptor::new("update")
                .aliases(aliases::UPDATE)
                .about("Update a Private Network")
                .slot(Slot::fixed("PRIVATE-NETWORK", "Private Network NAME|ID"))
                .flag(FlagSpec::string("name").usage("Private Network name"))
                .flag(FlagSpec::string("description").usage("Private Network description")),
        )
        .flag(FlagSpec::string_map("label").usage("Private Network label (format: key=value)"))
        .zone_flag("Private Network zone")
        .mutating()
        .output::<PrivateNetworkShowOutput>()
    }

    async fn run(&self, inv: &Invocation, app: &App) -> Result<Option<CommandOutput>, ExoError> {
        let client = app.client(&inv.zone()?)?;
        let network = client
            .find_private_network(&inv.required_arg("PRIVATE-NETWORK")?)
            .await?;

        let body = changed_fields(inv)?;
        let message = format!("Updating Private Network {:?}", network.name);
        let pending = if body.is_empty() {
            AsyncResult::Immediate(network)
        } else {
            AsyncResult::Pending(
                client
                    .update_private_network(&network.id, &Value::Object(body))
                    .await?,
            )
        };

        let updated = {
            let client = client.clone();
            app.driver()
                .drive(&message, async move {
                    let client = &client;
                    pending
                        .settle(client, |operation| async move {
                            client.get_private_network(operation.reference_id()?).await
                        })
                        .await
                })
                .await?
        };

        let output = PrivateNetworkShowOutput::new(&client, updated);
        Ok(Some(CommandOutput::record(LABEL, &output)?))
    }
}

pub(crate) struct PrivateNetworkDelete;

#[async_trait]
impl CliCommand for PrivateNetworkDelete {
    fn descriptor(&self) -> CommandDescriptor {
        CommandDescriptor::new("delete")
            .aliases(aliases::DELETE)
            .about("Delete Private Networks")
            .slot(Slot::targets("PRIVATE-NETWORK", "Private Network NAME|ID"))
            .zone_flag("Private Network zone")
            .confirmation()
            .mutating()
    }

    async fn run(&self, inv: &Invocation, app: &App) -> Result<Option<CommandOutput>, ExoError> {
        let client = app.client(&inv.zone()?)?;

        let Some(networks) = confirmed_targets(
            inv,
            app,
            inv.args("PRIVATE-NETWORK")?,
            |name| {
                let client = client.clone();
                async move { client.find_private_network(&name).await }
            },
            |network: &PrivateNetwork| {
                format!("Are you sure you want to delete Private Network {:?}?", network.name)
            },
        )
        .await?
        else {
            return Ok(None);
        };

        let names: Vec<String> = networks.iter().map(|n| n.name.clone()).collect();
        let tasks: Vec<_> = networks
            .into_iter()
            .map(|network| {
                let client = client.clone();
                async move {
                    let operation = client.delete_private_network(&network.id).await?;
                    client.wait_for(operation, OperationState::Success).await?;
                    Ok(())
                }
            })
            .collect();

        let message = format!(
            "Deleting {} {}",
            plural("Private Network", names.len()),
            quoted(&names)
        );
        app.driver().drive_many(&message, tasks).await?;

        Ok(None)
    }
}

pub(crate) fn register(tree: &mut CommandTree) -> Result<(), ExoError> {
    tree.group(
        &["compute"],
        CommandDescriptor::new("private-network")
            .aliases(&["privnet"])
            .about("Private Networks management"),
    )?;

    tree.register(PARENT, PrivateNetworkCreate)?;
    tree.register(PARENT, PrivateNetworkList)?;
    tree.register(PARENT, PrivateNetworkShow)?;
    tree.register(PARENT, PrivateNetworkUpdate)?;
    tree.register(PARENT, PrivateNetworkDelete)
}
