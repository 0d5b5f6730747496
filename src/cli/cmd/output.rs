use std::io::Write;

use async_trait::async_trait;

use crate::{
    cli::{
        error::ExoError,
        framework::{App, CliCommand, CommandDescriptor, Invocation},
    },
    output::CommandOutput,
};

const OUTPUT_HELP: &str = "\
The exo CLI renders command results in one of three formats, selected with
the --output-format (-O) flag or the default_output_format profile setting:

  table   human-readable tables (default)
  json    JSON documents, suitable for processing with tools such as jq
  text    tab-separated values, one record per line

With --output-template, each result is rendered through a template instead
(this implies the text format). Templates use the Handlebars syntax; fields
are referenced by the annotations listed in each command's help, e.g.:

  exo compute instance list --output-template '{{.name}} {{.zone}}'

Both {{.name}} and {{name}} are accepted. Nested fields use dotted paths, and
{{#each list}}...{{/each}} iterates over list fields.";

/// The `output` help topic.
pub(crate) struct OutputHelp;

#[async_trait]
impl CliCommand for OutputHelp {
    fn descriptor(&self) -> CommandDescriptor {
        CommandDescriptor::new("output")
            .about("Output formatting usage")
            .long_about(OUTPUT_HELP)
    }

    async fn run(&self, _: &Invocation, app: &App) -> Result<Option<CommandOutput>, ExoError> {
        writeln!(app.console().out(), "{OUTPUT_HELP}")?;
        Ok(None)
    }
}
