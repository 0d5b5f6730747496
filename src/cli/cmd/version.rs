use std::io::Write;

use async_trait::async_trait;

use crate::{
    cli::{
        error::ExoError,
        framework::{App, CliCommand, CommandDescriptor, Invocation},
    },
    output::CommandOutput,
};

/// `exo <version> <os>/<arch>`.
pub(crate) fn version_line() -> String {
    format!(
        "exo {} {}/{}",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

pub(crate) struct Version;

#[async_trait]
impl CliCommand for Version {
    fn descriptor(&self) -> CommandDescriptor {
        CommandDescriptor::new("version").about("Print the version of exo")
    }

    async fn run(&self, _: &Invocation, app: &App) -> Result<Option<CommandOutput>, ExoError> {
        writeln!(app.console().out(), "{}", version_line())?;
        Ok(None)
    }
}
