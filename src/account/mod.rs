//! Named credential profiles and the on-disk set that holds them.

pub(crate) mod resolve;
pub(crate) mod store;

use std::{process::Command, time::Duration};

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::{cli::error::ExoError, output::OutputFormat};

pub(crate) const DEFAULT_ENDPOINT: &str = "https://api.exoscale.com/v2";
pub(crate) const DEFAULT_ENVIRONMENT: &str = "api";
pub(crate) const DEFAULT_ZONE: &str = "ch-gva-2";
pub(crate) const DEFAULT_TEMPLATE: &str = "Linux Ubuntu 22.04 LTS 64-bit";
pub(crate) const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(20);

/// One set of credentials and defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct Profile {
    pub(crate) name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub(crate) account: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub(crate) endpoint: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub(crate) environment: String,

    #[serde(default)]
    pub(crate) key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) secret: Option<String>,

    #[serde(
        default,
        alias = "secretCommand",
        skip_serializing_if = "Option::is_none"
    )]
    pub(crate) secret_command: Option<Vec<String>>,

    #[serde(default, alias = "defaultZone", skip_serializing_if = "String::is_empty")]
    pub(crate) default_zone: String,

    #[serde(
        default,
        alias = "defaultOutputFormat",
        skip_serializing_if = "Option::is_none"
    )]
    pub(crate) default_output_format: Option<OutputFormat>,

    #[serde(
        default,
        alias = "clientTimeout",
        skip_serializing_if = "Option::is_none"
    )]
    pub(crate) client_timeout: Option<u64>,

    #[serde(
        default,
        alias = "defaultSSHKey",
        skip_serializing_if = "Option::is_none"
    )]
    pub(crate) default_ssh_key: Option<String>,

    #[serde(
        default,
        alias = "defaultTemplate",
        skip_serializing_if = "Option::is_none"
    )]
    pub(crate) default_template: Option<String>,

    /// Keys this version does not know about, kept verbatim across rewrites.
    #[serde(flatten)]
    pub(crate) extra: toml::Table,

    #[serde(skip)]
    pub(crate) resolved_secret: OnceCell<String>,
}

impl Profile {
    pub(crate) fn endpoint(&self) -> &str {
        non_empty_or(&self.endpoint, DEFAULT_ENDPOINT)
    }

    pub(crate) fn environment(&self) -> &str {
        non_empty_or(&self.environment, DEFAULT_ENVIRONMENT)
    }

    pub(crate) fn default_zone(&self) -> &str {
        non_empty_or(&self.default_zone, DEFAULT_ZONE)
    }

    pub(crate) fn output_format(&self) -> OutputFormat {
        self.default_output_format.unwrap_or_default()
    }

    pub(crate) fn client_timeout(&self) -> Duration {
        match self.client_timeout {
            Some(seconds) if seconds > 0 => Duration::from_secs(seconds),
            _ => DEFAULT_CLIENT_TIMEOUT,
        }
    }

    pub(crate) fn default_template(&self) -> &str {
        self.default_template.as_deref().unwrap_or(DEFAULT_TEMPLATE)
    }

    /// Checks that exactly one way of obtaining the secret is configured.
    pub(crate) fn validate(&self) -> Result<(), ExoError> {
        if self.name.trim().is_empty() {
            return Err(ExoError::Config("profile name cannot be empty".into()));
        }
        if self.key.is_empty() {
            return Err(ExoError::Config(format!(
                "profile {:?} has no API key",
                self.name
            )));
        }

        match (&self.secret, &self.secret_command) {
            (Some(_), Some(_)) => Err(ExoError::Config(format!(
                "profile {:?} sets both secret and secret_command",
                self.name
            ))),
            (None, None) => Err(ExoError::MissingSecret(self.name.clone())),
            (None, Some(argv)) if argv.is_empty() => Err(ExoError::Config(format!(
                "profile {:?} has an empty secret_command",
                self.name
            ))),
            _ => Ok(()),
        }
    }

    /// The API secret, running `secret_command` at most once per process.
    pub(crate) fn secret(&self) -> Result<&str, ExoError> {
        if let Some(secret) = self.secret.as_deref().filter(|s| !s.is_empty()) {
            return Ok(secret);
        }

        let Some((program, args)) = self
            .secret_command
            .as_ref()
            .and_then(|argv| argv.split_first())
        else {
            return Err(ExoError::MissingSecret(self.name.clone()));
        };

        self.resolved_secret
            .get_or_try_init(|| {
                tracing::debug!(profile = %self.name, %program, "running secret command");
                let output = Command::new(program).args(args).output()?;
                if !output.status.success() {
                    return Err(ExoError::Config(format!(
                        "secret command for profile {:?} exited with {}",
                        self.name, output.status
                    )));
                }

                let secret = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if secret.is_empty() {
                    return Err(ExoError::MissingSecret(self.name.clone()));
                }

                Ok(secret)
            })
            .map(String::as_str)
    }
}

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() { fallback } else { value }
}

/// Every configured profile plus the name of the default one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct ProfileSet {
    #[serde(default, alias = "defaultAccount")]
    pub(crate) default_account: String,

    #[serde(default)]
    pub(crate) accounts: Vec<Profile>,

    #[serde(flatten)]
    pub(crate) extra: toml::Table,
}

impl ProfileSet {
    pub(crate) fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub(crate) fn names(&self) -> impl Iterator<Item = &str> {
        self.accounts.iter().map(|profile| profile.name.as_str())
    }

    pub(crate) fn get(&self, name: &str) -> Result<&Profile, ExoError> {
        self.accounts
            .iter()
            .find(|profile| profile.name == name)
            .ok_or_else(|| ExoError::ProfileNotFound(name.to_string()))
    }

    pub(crate) fn default_profile(&self) -> Option<&Profile> {
        self.get(&self.default_account).ok()
    }

    /// Adds a profile; the first profile of a set always becomes the default.
    pub(crate) fn add(&mut self, profile: Profile, make_default: bool) -> Result<(), ExoError> {
        if self.get(&profile.name).is_ok() {
            return Err(ExoError::ProfileExists(profile.name));
        }
        profile.validate()?;

        if make_default || self.accounts.is_empty() {
            self.default_account = profile.name.clone();
        }
        self.accounts.push(profile);

        Ok(())
    }

    /// Removes a profile. Removing the default requires nominating a
    /// replacement while other profiles remain.
    pub(crate) fn remove(&mut self, name: &str, new_default: Option<&str>) -> Result<Profile, ExoError> {
        let index = self
            .accounts
            .iter()
            .position(|profile| profile.name == name)
            .ok_or_else(|| ExoError::ProfileNotFound(name.to_string()))?;

        if self.default_account == name && self.accounts.len() > 1 {
            let Some(replacement) = new_default.filter(|candidate| *candidate != name) else {
                return Err(ExoError::Config(format!(
                    "profile {name:?} is the default profile, nominate another default before removing it"
                )));
            };
            self.get(replacement)?;
            self.default_account = replacement.to_string();
        }

        let removed = self.accounts.remove(index);
        if self.accounts.is_empty() {
            self.default_account.clear();
        }

        Ok(removed)
    }

    pub(crate) fn set_default(&mut self, name: &str) -> Result<(), ExoError> {
        self.get(name)?;
        self.default_account = name.to_string();
        Ok(())
    }
}
