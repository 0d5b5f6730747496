//! Profile management: the first-run wizard and the `config` subcommands.

mod prompt;

use std::io::Write;

use async_trait::async_trait;
use owo_colors::{OwoColorize, Stream};
use serde::Serialize;

use crate::{
    account::{DEFAULT_ZONE, Profile, ProfileSet, store::ConfigStore},
    cli::{
        error::ExoError,
        framework::{
            App, CliCommand, CommandDescriptor, CommandTree, FlagSpec, Flow, Invocation, Slot,
            aliases,
        },
    },
    output::CommandOutput,
};

use self::prompt::Prompt;

const PARENT: &[&str] = &["config"];
const IAM_KEYS_URL: &str = "https://portal.exoscale.com/iam/keys";

/// Offered when the zone list cannot be fetched with the new credentials.
const FALLBACK_ZONES: &[&str] = &[
    "ch-gva-2", "ch-dk-2", "de-fra-1", "de-muc-1", "at-vie-1", "at-vie-2", "bg-sof-1",
];

#[derive(Debug, Default, Serialize)]
pub(crate) struct ProfileListItem {
    name: String,
    default: bool,
}

#[derive(Debug, Default, Serialize)]
pub(crate) struct ProfileShowOutput {
    name: String,
    api_key: String,
    api_secret: String,
    endpoint: String,
    environment: String,
    default_zone: String,
    default_template: Option<String>,
    default_output_format: String,
    client_timeout: u64,
    config_file: String,
}

impl ProfileShowOutput {
    fn new(profile: &Profile, store: &ConfigStore) -> Self {
        // The secret itself is never shown, only how it is obtained.
        let api_secret = match &profile.secret_command {
            Some(argv) if !argv.is_empty() => argv.join(" "),
            _ => "×".repeat(profile.secret.as_deref().map_or(0, |s| s.chars().count())),
        };

        Self {
            name: profile.name.clone(),
            api_key: profile.key.clone(),
            api_secret,
            endpoint: profile.endpoint().to_string(),
            environment: profile.environment().to_string(),
            default_zone: profile.default_zone().to_string(),
            default_template: profile.default_template.clone(),
            default_output_format: profile.output_format().to_string(),
            client_timeout: profile.client_timeout().as_secs(),
            config_file: store.path().display().to_string(),
        }
    }
}

fn profile_list(set: &ProfileSet) -> Vec<ProfileListItem> {
    set.accounts
        .iter()
        .map(|profile| ProfileListItem {
            name: profile.name.clone(),
            default: profile.name == set.default_account,
        })
        .collect()
}

/// The configuration file is out of play when credentials come from the environment.
fn ensure_file_credentials(app: &App, inv: &Invocation) -> Result<(), ExoError> {
    if app.env_credentials() {
        return Err(ExoError::Config(format!(
            "remove the API credentials environment variables to use \"exo {}\"",
            inv.path()
        )));
    }

    Ok(())
}

fn announce_default(app: &App, name: &str) -> Result<(), ExoError> {
    let name = format!("[{name}]");
    writeln!(
        app.console().out(),
        "Default profile set to {}",
        name.if_supports_color(Stream::Stdout, |text| text.bold())
    )?;
    Ok(())
}

/// Without profiles, walks through adding one. Otherwise lets the user pick
/// the default profile, or lists profiles when not on a terminal.
pub(crate) struct ConfigWizard;

#[async_trait]
impl CliCommand for ConfigWizard {
    fn descriptor(&self) -> CommandDescriptor {
        CommandDescriptor::new("config")
            .about("Exoscale CLI configuration management")
            .output::<ProfileListItem>()
    }

    async fn run(&self, inv: &Invocation, app: &App) -> Result<Option<CommandOutput>, ExoError> {
        ensure_file_credentials(app, inv)?;

        let store = app.store()?;
        let mut set = store.load()?;
        let interactive = app.console().is_interactive();

        if set.is_empty() {
            if !interactive {
                return Err(ExoError::usage(
                    "no profile configured, run \"exo config add\" with --name, --key and --secret",
                ));
            }

            writeln!(
                app.console().err(),
                "No Exoscale CLI configuration found.\n\n\
                 In order to set up your configuration profile, you will need to retrieve\n\
                 Exoscale API credentials from your organization's IAM:\n\n    {IAM_KEYS_URL}\n"
            )?;
            let profile = ConfigAdd::build_profile(inv, app, &set).await?;
            let output = ProfileShowOutput::new(&profile, &store);
            let name = profile.name.clone();
            set.add(profile, true)?;
            store.save(&set).await?;
            announce_default(app, &name)?;
            return Ok(Some(CommandOutput::record("Profile", &output)?));
        }

        if !interactive {
            return Ok(Some(CommandOutput::list(&profile_list(&set))?));
        }

        let names: Vec<String> = set.names().map(ToString::to_string).collect();
        let current = set.default_account.clone();
        let selected = Prompt::select("Default profile", names, &current).await?;
        if selected != set.default_account {
            set.set_default(&selected)?;
            store.save(&set).await?;
            announce_default(app, &selected)?;
        }

        Ok(None)
    }
}

pub(crate) struct ConfigAdd;

impl ConfigAdd {
    /// Assembles a profile from the flags, prompting for what is missing on a terminal.
    async fn build_profile(inv: &Invocation, app: &App, set: &ProfileSet) -> Result<Profile, ExoError> {
        let interactive = app.console().is_interactive();
        let missing = |flag: &str| {
            ExoError::usage(format!("--{flag} is required when not running interactively"))
        };

        let key = match inv.string("key")? {
            Some(key) => key,
            None if interactive => Prompt::string("API Key").await?,
            None => return Err(missing("key")),
        };

        let secret_command = inv
            .string("secret-command")?
            .map(|command| command.split_whitespace().map(String::from).collect::<Vec<_>>())
            .filter(|argv| !argv.is_empty());
        let secret = match (inv.string("secret")?, &secret_command) {
            (Some(secret), _) => Some(secret),
            (None, Some(_)) => None,
            (None, None) if interactive => Some(Prompt::secret("Secret Key").await?),
            (None, None) => return Err(missing("secret")),
        };

        let mut name = match inv.string("name")? {
            Some(name) => name,
            None if interactive => Prompt::string("Name").await?,
            None => return Err(missing("name")),
        };
        while set.get(&name).is_ok() {
            if !interactive {
                return Err(ExoError::ProfileExists(name));
            }
            writeln!(app.console().err(), "Name [{name}] already exists")?;
            name = Prompt::string("Name").await?;
        }

        let mut profile = Profile {
            name,
            key,
            secret,
            secret_command,
            endpoint: inv.string("endpoint")?.unwrap_or_default(),
            ..Default::default()
        };
        profile.validate()?;

        profile.default_zone = match inv.string("zone")? {
            Some(zone) => zone,
            None if interactive => {
                let zones = Self::zones(app, &profile).await;
                Prompt::select("Default zone", zones, DEFAULT_ZONE).await?
            }
            None => DEFAULT_ZONE.to_string(),
        };

        Ok(profile)
    }

    /// Zones the new credentials can see, or a static list if the API cannot be reached.
    async fn zones(app: &App, profile: &Profile) -> Vec<String> {
        let listed = match app.client_for(profile, DEFAULT_ZONE) {
            Ok(client) => {
                app.driver()
                    .drive("Listing zones", async move { client.list_zones().await })
                    .await
            }
            Err(e) => Err(e),
        };

        match listed {
            Ok(zones) if !zones.is_empty() => zones.into_iter().map(|zone| zone.name).collect(),
            Ok(_) => FALLBACK_ZONES.iter().map(ToString::to_string).collect(),
            Err(e) => {
                tracing::debug!(error = %e, "unable to list zones, using the built-in list");
                FALLBACK_ZONES.iter().map(ToString::to_string).collect()
            }
        }
    }
}

#[async_trait]
impl CliCommand for ConfigAdd {
    fn descriptor(&self) -> CommandDescriptor {
        CommandDescriptor::new("add")
            .about("Add a new profile to the configuration")
            .flag(FlagSpec::string("name").usage("profile name"))
            .flag(FlagSpec::string("key").usage("API key"))
            .flag(FlagSpec::string("secret").usage("API secret"))
            .flag(
                FlagSpec::string("secret-command")
                    .usage("command printing the API secret on its standard output"),
            )
            .flag(FlagSpec::string("zone").usage("default zone"))
            .flag(FlagSpec::string("endpoint").usage("API endpoint (default: https://api.exoscale.com/v2)"))
            .flag(FlagSpec::bool("default").usage("make the new profile the default one"))
            .mutating()
            .output::<ProfileShowOutput>()
    }

    /// `--zone` is the new profile's zone, never filled from the active profile.
    async fn pre_run(&self, _inv: &mut Invocation, _app: &App) -> Result<Flow, ExoError> {
        Ok(Flow::Continue)
    }

    async fn run(&self, inv: &Invocation, app: &App) -> Result<Option<CommandOutput>, ExoError> {
        ensure_file_credentials(app, inv)?;

        let store = app.store()?;
        let mut set = store.load()?;
        let first = set.is_empty();

        let profile = Self::build_profile(inv, app, &set).await?;
        let name = profile.name.clone();
        let make_default = if inv.changed("default") || first || !app.console().is_interactive() {
            inv.bool("default")?
        } else {
            Prompt::bool(&format!("Set [{name}] as default profile?"), false).await?
        };

        let output = ProfileShowOutput::new(&profile, &store);
        set.add(profile, make_default)?;
        store.save(&set).await?;
        tracing::debug!(profile = %name, "profile added");

        if set.default_account == name {
            announce_default(app, &name)?;
        }

        Ok(Some(CommandOutput::record("Profile", &output)?))
    }
}

pub(crate) struct ConfigSet;

#[async_trait]
impl CliCommand for ConfigSet {
    fn descriptor(&self) -> CommandDescriptor {
        CommandDescriptor::new("set")
            .about("Set the default profile")
            .slot(Slot::fixed("NAME", "profile name"))
    }

    async fn run(&self, inv: &Invocation, app: &App) -> Result<Option<CommandOutput>, ExoError> {
        ensure_file_credentials(app, inv)?;

        let name = inv.required_arg("NAME")?;
        let store = app.store()?;
        let mut set = store.load()?;
        set.set_default(&name)?;
        store.save(&set).await?;
        announce_default(app, &name)?;

        Ok(None)
    }
}

pub(crate) struct ConfigRemove;

#[async_trait]
impl CliCommand for ConfigRemove {
    fn descriptor(&self) -> CommandDescriptor {
        CommandDescriptor::new("remove")
            .aliases(aliases::REMOVE)
            .about("Remove a profile from the configuration")
            .slot(Slot::fixed("NAME", "profile name"))
            .flag(
                FlagSpec::string("new-default")
                    .usage("profile to make the default when removing the current default"),
            )
            .confirmation()
            .mutating()
    }

    async fn run(&self, inv: &Invocation, app: &App) -> Result<Option<CommandOutput>, ExoError> {
        ensure_file_credentials(app, inv)?;

        let name = inv.required_arg("NAME")?;
        let store = app.store()?;
        let mut set = store.load()?;
        set.get(&name)?;

        if !inv
            .confirm(app, &format!("Are you sure you want to remove profile {name:?}?"))
            .await?
        {
            return Ok(None);
        }

        let new_default = inv.string("new-default")?;
        set.remove(&name, new_default.as_deref())?;
        store.save(&set).await?;
        tracing::debug!(profile = %name, "profile removed");

        if let Some(new_default) = new_default.filter(|candidate| *candidate == set.default_account) {
            announce_default(app, &new_default)?;
        }

        Ok(None)
    }
}

pub(crate) struct ConfigList;

#[async_trait]
impl CliCommand for ConfigList {
    fn descriptor(&self) -> CommandDescriptor {
        CommandDescriptor::new("list")
            .aliases(aliases::LIST)
            .about("List profiles")
            .output::<ProfileListItem>()
    }

    async fn run(&self, _: &Invocation, app: &App) -> Result<Option<CommandOutput>, ExoError> {
        let set = app.store()?.load()?;
        Ok(Some(CommandOutput::list(&profile_list(&set))?))
    }
}

pub(crate) struct ConfigShow;

#[async_trait]
impl CliCommand for ConfigShow {
    fn descriptor(&self) -> CommandDescriptor {
        CommandDescriptor::new("show")
            .aliases(aliases::SHOW)
            .about("Show a profile details")
            .long_about("Shows a profile details, the active profile when NAME is omitted.")
            .slot(Slot::optional("NAME", "profile name"))
            .output::<ProfileShowOutput>()
    }

    async fn run(&self, inv: &Invocation, app: &App) -> Result<Option<CommandOutput>, ExoError> {
        let store = app.store()?;
        let profile = match inv.arg("NAME")? {
            Some(name) => store.load()?.get(&name)?.clone(),
            None => app.profile()?.clone(),
        };

        let output = ProfileShowOutput::new(&profile, &store);
        Ok(Some(CommandOutput::record("Profile", &output)?))
    }
}

pub(crate) fn register(tree: &mut CommandTree) -> Result<(), ExoError> {
    tree.register(&[], ConfigWizard)?;

    tree.register(PARENT, ConfigAdd)?;
    tree.register(PARENT, ConfigSet)?;
    tree.register(PARENT, ConfigRemove)?;
    tree.register(PARENT, ConfigList)?;
    tree.register(PARENT, ConfigShow)
}
