use async_trait::async_trait;
use serde::Serialize;

use crate::{
    cli::{
        error::ExoError,
        framework::{App, CliCommand, CommandDescriptor, CommandTree, Invocation, aliases},
    },
    output::CommandOutput,
};

#[derive(Debug, Default, Serialize)]
pub(crate) struct ZoneListItem {
    name: String,
    api_endpoint: Option<String>,
    sos_endpoint: Option<String>,
}

/// Lists the zones the account can use.
pub(crate) struct ZoneList;

#[async_trait]
impl CliCommand for ZoneList {
    fn descriptor(&self) -> CommandDescriptor {
        CommandDescriptor::new("list")
            .aliases(aliases::LIST)
            .about("List zones")
            .output::<ZoneListItem>()
    }

    async fn run(&self, _: &Invocation, app: &App) -> Result<Option<CommandOutput>, ExoError> {
        let client = app.client(app.profile()?.default_zone())?;
        let zones = app
            .driver()
            .drive("Listing zones", async move { client.list_zones().await })
            .await?;

        let items: Vec<ZoneListItem> = zones
            .into_iter()
            .map(|zone| ZoneListItem {
                name: zone.name,
                api_endpoint: zone.api_endpoint,
                sos_endpoint: zone.sos_endpoint,
            })
            .collect();

        Ok(Some(CommandOutput::list(&items)?))
    }
}

/// Installs `zone` (and its `list`) below `parent`.
pub(crate) fn register(tree: &mut CommandTree, parent: &[&str]) -> Result<(), ExoError> {
    tree.group(parent, CommandDescriptor::new("zone").about("Zones management"))?;

    let mut path = parent.to_vec();
    path.push("zone");
    tree.register(&path, ZoneList)
}
