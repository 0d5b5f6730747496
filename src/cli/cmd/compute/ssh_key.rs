use async_trait::async_trait;
use serde::Serialize;

use crate::{
    api::{OperationState, resources::SshKey},
    cli::{
        cmd::{plural, quoted},
        error::ExoError,
        framework::{
            App, CliCommand, CommandDescriptor, CommandTree, Invocation, Slot, aliases,
            confirmed_targets,
        },
    },
    output::CommandOutput,
};

const PARENT: &[&str] = &["compute", "ssh-key"];

#[derive(Debug, Default, Serialize)]
pub(crate) struct SshKeyOutput {
    name: String,
    fingerprint: String,
}

impl From<SshKey> for SshKeyOutput {
    fn from(key: SshKey) -> Self {
        Self {
            name: key.name,
            fingerprint: key.fingerprint,
        }
    }
}

/// SSH keys are global; requests go through the profile's default zone.
fn client(app: &App) -> Result<crate::api::ApiClient, ExoError> {
    app.client(app.profile()?.default_zone())
}

pub(crate) struct SshKeyList;

#[async_trait]
impl CliCommand for SshKeyList {
    fn descriptor(&self) -> CommandDescriptor {
        CommandDescriptor::new("list")
            .aliases(aliases::LIST)
            .about("List SSH keys")
            .output::<SshKeyOutput>()
    }

    async fn run(&self, _: &Invocation, app: &App) -> Result<Option<CommandOutput>, ExoError> {
        let keys: Vec<SshKeyOutput> = client(app)?
            .list_ssh_keys()
            .await?
            .into_iter()
            .map(SshKeyOutput::from)
            .collect();

        Ok(Some(CommandOutput::list(&keys)?))
    }
}

pub(crate) struct SshKeyShow;

#[async_trait]
impl CliCommand for SshKeyShow {
    fn descriptor(&self) -> CommandDescriptor {
        CommandDescriptor::new("show")
            .aliases(aliases::SHOW)
            .about("Show an SSH key details")
            .slot(Slot::fixed("NAME", "SSH key name"))
            .output::<SshKeyOutput>()
    }

    async fn run(&self, inv: &Invocation, app: &App) -> Result<Option<CommandOutput>, ExoError> {
        let key = client(app)?.get_ssh_key(&inv.required_arg("NAME")?).await?;
        Ok(Some(CommandOutput::record("SSH key", &SshKeyOutput::from(key))?))
    }
}

pub(crate) struct SshKeyRegister;

#[async_trait]
impl CliCommand for SshKeyRegister {
    fn descriptor(&self) -> CommandDescriptor {
        CommandDescriptor::new("register")
            .about("Register an SSH key")
            .slot(Slot::fixed("NAME", "SSH key name"))
            .slot(Slot::fixed("PUBLIC-KEY-FILE", "path to the SSH public key file"))
            .mutating()
            .output::<SshKeyOutput>()
    }

    async fn run(&self, inv: &Invocation, app: &App) -> Result<Option<CommandOutput>, ExoError> {
        let name = inv.required_arg("NAME")?;
        let path = inv.required_arg("PUBLIC-KEY-FILE")?;
        let public_key = tokio::fs::read_to_string(&path).await?;

        let client = client(app)?;
        let message = format!("Registering SSH key {name:?}");
        let key = app
            .driver()
            .drive(&message, async move {
                let operation = client.register_ssh_key(&name, public_key.trim()).await?;
                client.wait_for(operation, OperationState::Success).await?;
                client.get_ssh_key(&name).await
            })
            .await?;

        Ok(Some(CommandOutput::record("SSH key", &SshKeyOutput::from(key))?))
    }
}

pub(crate) struct SshKeyDelete;

#[async_trait]
impl CliCommand for SshKeyDelete {
    fn descriptor(&self) -> CommandDescriptor {
        CommandDescriptor::new("delete")
            .aliases(aliases::DELETE)
            .about("Delete SSH keys")
            .slot(Slot::targets("NAME", "SSH key name"))
            .confirmation()
            .mutating()
    }

    async fn run(&self, inv: &Invocation, app: &App) -> Result<Option<CommandOutput>, ExoError> {
        let client = client(app)?;

        let Some(keys) = confirmed_targets(
            inv,
            app,
            inv.args("NAME")?,
            |name| {
                let client = client.clone();
                async move { client.get_ssh_key(&name).await }
            },
            |key: &SshKey| format!("Are you sure you want to delete SSH key {:?}?", key.name),
        )
        .await?
        else {
            return Ok(None);
        };

        let names: Vec<String> = keys.iter().map(|key| key.name.clone()).collect();
        let tasks: Vec<_> = keys
            .into_iter()
            .map(|key| {
                let client = client.clone();
                async move {
                    let operation = client.delete_ssh_key(&key.name).await?;
                    client.wait_for(operation, OperationState::Success).await?;
                    Ok(())
                }
            })
            .collect();

        let message = format!("Deleting {} {}", plural("SSH key", names.len()), quoted(&names));
        app.driver().drive_many(&message, tasks).await?;

        Ok(None)
    }
}

pub(crate) fn register(tree: &mut CommandTree) -> Result<(), ExoError> {
    tree.group(
        &["compute"],
        CommandDescriptor::new("ssh-key").about("SSH keys management"),
    )?;

    tree.register(PARENT, SshKeyList)?;
    tree.register(PARENT, SshKeyShow)?;
    tree.register(PARENT, SshKeyRegister)?;
    tree.register(PARENT, SshKeyDelete)
}
