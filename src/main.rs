mod account;
mod api;
mod cancel;
mod cli;
mod console;
mod output;
mod progress;

use std::{process::ExitCode, time::Duration};

use crate::cli::{Cli, framework::Context};

static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

/// How long in-flight blocking work (a pending stdin read) may hold up exit.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

fn main() -> color_eyre::Result<ExitCode> {
    color_eyre::config::HookBuilder::default()
        .issue_url(concat!(env!("CARGO_PKG_REPOSITORY"), "/issues/new"))
        .add_issue_metadata("version", env!("CARGO_PKG_VERSION"))
        .add_issue_metadata("os", std::env::consts::OS)
        .add_issue_metadata("arch", std::env::consts::ARCH)
        .install()?;

    let context = Context::process();
    let cli = match Cli::parse_from(std::env::args_os(), &context.console) {
        Ok(cli) => cli,
        Err(code) => return Ok(ExitCode::from(code)),
    };
    cli.globals.instrumentation.setup()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let code = runtime.block_on(async {
        context.cancel.cancel_on_interrupt();
        cli.execute(context).await
    });
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    Ok(ExitCode::from(code))
}
