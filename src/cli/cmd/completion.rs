use async_trait::async_trait;
use clap_complete::{Shell, generate};

use crate::{
    cli::{
        error::ExoError,
        framework::{App, CliCommand, CommandDescriptor, Invocation, Slot},
        root_command,
    },
    output::CommandOutput,
};

/// Prints completion for shells to use.
pub(crate) struct Completion;

#[async_trait]
impl CliCommand for Completion {
    fn descriptor(&self) -> CommandDescriptor {
        CommandDescriptor::new("completion")
            .about("Generate a shell completion script")
            .long_about(
                "Generates a completion script for SHELL (bash, elvish, fish, powershell or zsh), \
                 e.g. `exo completion bash > /etc/bash_completion.d/exo`.",
            )
            .slot(Slot::fixed("SHELL", "shell to generate the script for"))
    }

    async fn run(&self, inv: &Invocation, app: &App) -> Result<Option<CommandOutput>, ExoError> {
        let name = inv.required_arg("SHELL")?;
        let shell: Shell = name
            .parse()
            .map_err(|_| ExoError::usage(format!("unsupported shell {name:?}")))?;

        let mut command = root_command(&super::command_tree()?);
        let bin = command.get_name().to_string();
        generate(shell, &mut command, bin, &mut app.console().out());

        Ok(None)
    }
}
