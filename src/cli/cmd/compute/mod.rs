mod instance;
mod instance_type;
mod private_network;
mod security_group;
mod ssh_key;
mod template;

use std::future::Future;

use futures::future::try_join_all;

use crate::{
    api::ApiClient,
    cli::{
        error::ExoError,
        framework::{App, CommandDescriptor, CommandTree, Invocation},
    },
};

pub(crate) fn register(tree: &mut CommandTree) -> Result<(), ExoError> {
    tree.group(
        &[],
        CommandDescriptor::new("compute").about("Compute services management"),
    )?;

    super::zone::register(tree, &["compute"])?;
    instance::register(tree)?;
    instance_type::register(tree)?;
    template::register(tree)?;
    ssh_key::register(tree)?;
    private_network::register(tree)?;
    security_group::register(tree)?;

    Ok(())
}

/// Runs `list` against the zone given with `--zone`, or against every zone concurrently.
///
/// Results keep the zone order the API reports.
pub(crate) async fn for_each_zone<T, F, Fut>(
    inv: &Invocation,
    app: &App,
    list: F,
) -> Result<Vec<T>, ExoError>
where
    F: Fn(ApiClient) -> Fut,
    Fut: Future<Output = Result<Vec<T>, ExoError>>,
{
    if inv.changed("zone") {
        return list(app.client(&inv.zone()?)?).await;
    }

    let zones = app
        .client(app.profile()?.default_zone())?
        .list_zones()
        .await?;
    tracing::debug!(zones = zones.len(), "listing across all zones");

    let clients = zones
        .iter()
        .map(|zone| app.client(&zone.name))
        .collect::<Result<Vec<_>, _>>()?;
    let per_zone = try_join_all(clients.into_iter().map(list)).await?;

    Ok(per_zone.into_iter().flatten().collect())
}
