use async_trait::async_trait;
use serde::Serialize;

use crate::{
    cli::{
        error::ExoError,
        framework::{App, CliCommand, CommandDescriptor, CommandTree, Invocation, Slot, aliases},
    },
    output::{ByteSize, CommandOutput},
};

const PARENT: &[&str] = &["compute", "instance-type"];

#[derive(Debug, Default, Serialize)]
pub(crate) struct InstanceTypeListItem {
    id: String,
    family: String,
    size: String,
}

pub(crate) struct InstanceTypeList;

#[async_trait]
impl CliCommand for InstanceTypeList {
    fn descriptor(&self) -> CommandDescriptor {
        CommandDescriptor::new("list")
            .aliases(aliases::LIST)
            .about("List Compute instance types")
            .zone_flag("zone to list instance types of")
            .output::<InstanceTypeListItem>()
    }

    async fn run(&self, inv: &Invocation, app: &App) -> Result<Option<CommandOutput>, ExoError> {
        let client = app.client(&inv.zone()?)?;
        let items: Vec<InstanceTypeListItem> = client
            .list_instance_types()
            .await?
            .into_iter()
            .filter(|t| t.authorized != Some(false))
            .map(|t| InstanceTypeListItem {
                id: t.id,
                family: t.family,
                size: t.size,
            })
            .collect();

        Ok(Some(CommandOutput::list(&items)?))
    }
}

#[derive(Debug, Default, Serialize)]
pub(crate) struct InstanceTypeShowOutput {
    id: String,
    family: String,
    size: String,
    cpus: u64,
    gpus: u64,
    memory: ByteSize,
    authorized: bool,
}

pub(crate) struct InstanceTypeShow;

#[async_trait]
impl CliCommand for InstanceTypeShow {
    fn descriptor(&self) -> CommandDescriptor {
        CommandDescriptor::new("show")
            .aliases(aliases::SHOW)
            .about("Show a Compute instance type details")
            .slot(Slot::fixed("TYPE", "instance type ID or [FAMILY.]SIZE"))
            .zone_flag("zone to look the instance type up in")
            .output::<InstanceTypeShowOutput>()
    }

    async fn run(&self, inv: &Invocation, app: &App) -> Result<Option<CommandOutput>, ExoError> {
        let client = app.client(&inv.zone()?)?;
        let t = client.find_instance_type(&inv.required_arg("TYPE")?).await?;

        let output = InstanceTypeShowOutput {
            id: t.id,
            family: t.family,
            size: t.size,
            cpus: t.cpus.unwrap_or_default(),
            gpus: t.gpus.unwrap_or_default(),
            memory: ByteSize(t.memory.unwrap_or_default()),
            authorized: t.authorized.unwrap_or(true),
        };

        Ok(Some(CommandOutput::record("Instance type", &output)?))
    }
}

pub(crate) fn register(tree: &mut CommandTree) -> Result<(), ExoError> {
    tree.group(
        &["compute"],
        CommandDescriptor::new("instance-type").about("Compute instance types management"),
    )?;

    tree.register(PARENT, InstanceTypeList)?;
    tree.register(PARENT, InstanceTypeShow)
}
