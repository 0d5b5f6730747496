//! Declarative command registration and the lifecycle every command goes through.

pub(crate) mod aliases;
pub(crate) mod descriptor;
pub(crate) mod invocation;
pub(crate) mod registry;

use std::{future::Future, io::Write, path::PathBuf, time::Duration};

use async_trait::async_trait;
use once_cell::sync::OnceCell;

use crate::{
    account::{
        Profile,
        resolve::{EnvLookup, environment_profile, process_env, resolve_active_profile},
        store::ConfigStore,
    },
    api::{ApiClient, DEFAULT_POLL_INTERVAL, http_client},
    cancel::CancelToken,
    cli::{GlobalArgs, error::ExoError},
    console::Console,
    output::{CommandOutput, Renderer},
    progress::Driver,
};

pub(crate) use descriptor::{CommandDescriptor, FlagSpec, Slot};
pub(crate) use invocation::Invocation;
pub(crate) use registry::CommandTree;

const CONFIG_VAR: &str = "EXOSCALE_CONFIG";
const QUIET_VAR: &str = "EXOSCALE_QUIET";

/// Whether the lifecycle proceeds to the run body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    /// Pre-run already produced everything the user asked for.
    Done,
}

#[async_trait]
pub(crate) trait CliCommand: Send + Sync {
    fn descriptor(&self) -> CommandDescriptor;

    /// Validates cross-flag constraints and fills defaults before `run`.
    async fn pre_run(&self, inv: &mut Invocation, app: &App) -> Result<Flow, ExoError> {
        default_zone(inv, app);
        Ok(Flow::Continue)
    }

    async fn run(&self, inv: &Invocation, app: &App) -> Result<Option<CommandOutput>, ExoError>;
}

/// Fills `--zone` from the active profile when the command has one and it was not given.
pub(crate) fn default_zone(inv: &mut Invocation, app: &App) {
    if inv.descriptor().find_flag("zone").is_none() || inv.changed("zone") {
        return;
    }

    match app.profile() {
        Ok(profile) => inv.set_default("zone", profile.default_zone()),
        Err(e) => tracing::debug!(error = %e, "no profile to take a default zone from"),
    }
}

/// The process-level things a command line runs against.
#[derive(Clone)]
pub(crate) struct Context {
    pub(crate) console: Console,
    pub(crate) env: EnvLookup,
    pub(crate) cancel: CancelToken,
    pub(crate) poll_interval: Duration,
}

impl Context {
    pub(crate) fn process() -> Self {
        Self {
            console: Console::stdio(),
            env: process_env(),
            cancel: CancelToken::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Shared state handed to every pre-run and run body.
pub(crate) struct App {
    globals: GlobalArgs,
    context: Context,
    driver: Driver,
    http: reqwest::Client,
    quiet: bool,
    profile: OnceCell<Profile>,
}

impl App {
    pub(crate) fn new(globals: GlobalArgs, context: Context) -> Result<Self, ExoError> {
        let quiet = globals.quiet
            || (context.env)(QUIET_VAR).is_some_and(|value| {
                !matches!(value.trim().to_lowercase().as_str(), "" | "0" | "false" | "no" | "off")
            });
        let driver = Driver::new(
            quiet,
            context.console.stderr_is_terminal(),
            context.cancel.clone(),
        );

        Ok(Self {
            globals,
            driver,
            http: http_client()?,
            quiet,
            profile: OnceCell::new(),
            context,
        })
    }

    pub(crate) fn globals(&self) -> &GlobalArgs {
        &self.globals
    }

    pub(crate) fn console(&self) -> &Console {
        &self.context.console
    }

    pub(crate) fn cancel(&self) -> &CancelToken {
        &self.context.cancel
    }

    pub(crate) fn driver(&self) -> &Driver {
        &self.driver
    }

    pub(crate) fn env(&self) -> &EnvLookup {
        &self.context.env
    }

    pub(crate) fn is_quiet(&self) -> bool {
        self.quiet
    }

    /// The configuration file named by `--config` or `EXOSCALE_CONFIG`, else the usual location.
    pub(crate) fn store(&self) -> Result<ConfigStore, ExoError> {
        let explicit = self
            .globals
            .config
            .clone()
            .or_else(|| self.env()(CONFIG_VAR).filter(|path| !path.is_empty()).map(PathBuf::from));
        ConfigStore::locate(explicit.as_deref(), self.env())
    }

    /// Whether credentials come from the environment rather than the file.
    pub(crate) fn env_credentials(&self) -> bool {
        environment_profile(self.env()).is_some()
    }

    /// The active profile, resolved on first use.
    pub(crate) fn profile(&self) -> Result<&Profile, ExoError> {
        self.profile.get_or_try_init(|| {
            resolve_active_profile(self.env(), self.globals.profile.as_deref(), &self.store()?)
        })
    }

    pub(crate) fn client(&self, zone: &str) -> Result<ApiClient, ExoError> {
        self.client_for(self.profile()?, zone)
    }

    /// A client for credentials that are not (yet) the active profile.
    pub(crate) fn client_for(&self, profile: &Profile, zone: &str) -> Result<ApiClient, ExoError> {
        ApiClient::new(
            self.http.clone(),
            profile,
            zone,
            self.context.poll_interval,
            self.cancel().clone(),
        )
    }

    /// The `--output-format` flag, then the profile's default, then tables.
    pub(crate) fn renderer(&self) -> Renderer {
        let format = self.globals.output_format.unwrap_or_else(|| {
            self.profile()
                .map(Profile::output_format)
                .unwrap_or_default()
        });

        Renderer::new(format, self.globals.output_template.clone())
    }
}

/// Looks up every named target and asks about each before anything is changed.
///
/// Under the force flag targets that do not exist are reported on stderr and
/// skipped. Commands that do not confirm by default are never prompted.
/// Returns `None` as soon as one confirmation is declined.
pub(crate) async fn confirmed_targets<T, F, Fut, Q>(
    inv: &Invocation,
    app: &App,
    names: Vec<String>,
    lookup: F,
    question: Q,
) -> Result<Option<Vec<T>>, ExoError>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<T, ExoError>>,
    Q: Fn(&T) -> String,
{
    let force = inv.force()?;
    let mut targets = Vec::with_capacity(names.len());
    for name in names {
        let target = match lookup(name.clone()).await {
            Ok(target) => target,
            Err(e) if force && e.is_not_found() => {
                writeln!(app.console().err(), "warning: {name:?} not found, skipping")?;
                continue;
            }
            Err(e) => return Err(e),
        };

        if inv.descriptor().confirm_by_default && !inv.confirm(app, &question(&target)).await? {
            return Ok(None);
        }
        targets.push(target);
    }

    Ok(Some(targets))
}
