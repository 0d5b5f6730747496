pub(crate) mod cmd;
pub(crate) mod error;
pub(crate) mod framework;
pub(crate) mod instrumentation;

#[cfg(test)]
mod e2e;

use std::{ffi::OsString, io::Write, path::PathBuf};

use clap::{Args, FromArgMatches};

use crate::{
    cli::{
        error::ExoError,
        framework::{App, CommandTree, Context, Flow, Invocation},
        instrumentation::Instrumentation,
    },
    console::Console,
    output::OutputFormat,
};

/// Flags every command accepts.
#[derive(Args, Debug, Clone, Default)]
pub(crate) struct GlobalArgs {
    /// Specify an alternate config file [env EXOSCALE_CONFIG]
    #[clap(long, short = 'C', global = true)]
    pub(crate) config: Option<PathBuf>,

    /// Specify an account profile from the config file [env EXOSCALE_PROFILE]
    #[clap(long, short = 'P', global = true, visible_alias = "use-account")]
    pub(crate) profile: Option<String>,

    /// Output format
    #[clap(long, short = 'O', global = true, value_enum)]
    pub(crate) output_format: Option<OutputFormat>,

    /// Template to render each result with; implies text output
    #[clap(long, global = true)]
    pub(crate) output_template: Option<String>,

    /// Quiet mode: no progress, no output from commands that change things [env EXOSCALE_QUIET]
    #[clap(long, short = 'Q', global = true)]
    pub(crate) quiet: bool,

    #[clap(flatten)]
    pub(crate) instrumentation: Instrumentation,
}

/// The root `clap::Command`, global flags included.
pub(crate) fn root_command(tree: &CommandTree) -> clap::Command {
    GlobalArgs::augment_args(tree.to_clap())
        .version(env!("CARGO_PKG_VERSION"))
        .propagate_version(false)
}

/// A command line parsed against the full command tree.
pub(crate) struct Cli {
    tree: CommandTree,
    command: clap::Command,
    matches: clap::ArgMatches,
    pub(crate) globals: GlobalArgs,
}

impl Cli {
    /// Parses `argv`. On `Err` everything has been reported and the
    /// process should exit with the returned code, e.g. after `--help`.
    pub(crate) fn parse_from<I, T>(argv: I, console: &Console) -> Result<Self, u8>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let tree = cmd::command_tree().map_err(|e| report(console, &e, None))?;
        let mut command = root_command(&tree);

        let matches = command
            .try_get_matches_from_mut(argv)
            .map_err(|e| report_clap(console, &e))?;
        let globals = GlobalArgs::from_arg_matches(&matches).map_err(|e| report_clap(console, &e))?;

        Ok(Self {
            tree,
            command,
            matches,
            globals,
        })
    }

    /// Runs the selected command through its lifecycle and returns the exit code.
    pub(crate) async fn execute(self, context: Context) -> u8 {
        let (path, node, leaf_matches) = self.tree.resolve(&self.matches);
        let mut leaf = subcommand_at(&self.command, &path);
        let console = context.console.clone();

        let Some(command) = node.command.clone() else {
            let _ = write!(console.out(), "{}", leaf.render_long_help());
            return 0;
        };

        let app = match App::new(self.globals.clone(), context) {
            Ok(app) => app,
            Err(e) => return report(&console, &e, None),
        };

        let mut inv = Invocation::new(
            path,
            node.descriptor.clone(),
            leaf_matches.clone(),
            leaf.render_usage().to_string(),
        );

        let code = match dispatch(command.as_ref(), &mut inv, &app).await {
            Ok(()) => 0,
            Err(e) => report(&console, &e, Some(inv.usage())),
        };

        if app.cancel().is_cancelled() {
            ExoError::Cancelled.exit_code()
        } else {
            code
        }
    }
}

#[tracing::instrument(skip_all, fields(command = %inv.path()))]
async fn dispatch(
    command: &dyn framework::CliCommand,
    inv: &mut Invocation,
    app: &App,
) -> Result<(), ExoError> {
    if command.pre_run(inv, app).await? == Flow::Done {
        return Ok(());
    }

    let Some(output) = command.run(inv, app).await? else {
        return Ok(());
    };

    if app.is_quiet() && inv.descriptor().mutating {
        tracing::debug!("quiet mode, output suppressed");
        return Ok(());
    }

    app.renderer().render(&output, &mut app.console().out())
}

fn subcommand_at(root: &clap::Command, path: &[&str]) -> clap::Command {
    let mut command = root.clone();
    for token in path {
        match command.find_subcommand(token) {
            Some(sub) => command = sub.clone(),
            None => break,
        }
    }
    command
}

fn report(console: &Console, e: &ExoError, usage: Option<&str>) -> u8 {
    tracing::debug!(error = ?e, "command failed");

    let mut err = console.err();
    let _ = writeln!(err, "error: {e}");
    if let (ExoError::Usage(_), Some(usage)) = (e, usage) {
        let _ = writeln!(err, "\n{usage}");
    }

    e.exit_code()
}

fn report_clap(console: &Console, e: &clap::Error) -> u8 {
    let rendered = e.render().to_string();
    let _ = if e.use_stderr() {
        write!(console.err(), "{rendered}")
    } else {
        write!(console.out(), "{rendered}")
    };

    u8::try_from(e.exit_code()).unwrap_or(1)
}
