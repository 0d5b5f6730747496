use std::sync::Arc;

use crate::{
    account::{DEFAULT_ENDPOINT, DEFAULT_ENVIRONMENT, DEFAULT_ZONE, Profile, store::ConfigStore},
    cli::error::ExoError,
};

/// Name given to the profile assembled from environment variables.
pub(crate) const ENV_PROFILE_NAME: &str = "<environment variables>";

const KEY_VARS: &[&str] = &["EXOSCALE_API_KEY", "EXOSCALE_KEY"];
const SECRET_VARS: &[&str] = &["EXOSCALE_API_SECRET", "EXOSCALE_SECRET"];
const ENDPOINT_VARS: &[&str] = &["EXOSCALE_API_ENDPOINT", "EXOSCALE_ENDPOINT"];
const ZONE_VARS: &[&str] = &["EXOSCALE_ZONE"];
const ENVIRONMENT_VARS: &[&str] = &["EXOSCALE_API_ENVIRONMENT"];
const PROFILE_VARS: &[&str] = &["EXOSCALE_PROFILE", "EXOSCALE_ACCOUNT"];
const TIMEOUT_VAR: &str = "EXOSCALE_API_TIMEOUT";

/// Environment variable lookup, injectable so resolution never depends on
/// the real process environment in tests.
pub(crate) type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

pub(crate) fn process_env() -> EnvLookup {
    Arc::new(|name| std::env::var(name).ok())
}

fn first_of(lookup: &EnvLookup, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| lookup(name).filter(|value| !value.is_empty()))
}

/// A synthetic profile when both key and secret come from the environment.
pub(crate) fn environment_profile(lookup: &EnvLookup) -> Option<Profile> {
    let key = first_of(lookup, KEY_VARS)?;
    let secret = first_of(lookup, SECRET_VARS)?;

    Some(Profile {
        name: ENV_PROFILE_NAME.to_string(),
        key,
        secret: Some(secret),
        endpoint: first_of(lookup, ENDPOINT_VARS).unwrap_or_else(|| DEFAULT_ENDPOINT.into()),
        environment: first_of(lookup, ENVIRONMENT_VARS)
            .unwrap_or_else(|| DEFAULT_ENVIRONMENT.into()),
        default_zone: first_of(lookup, ZONE_VARS).unwrap_or_else(|| DEFAULT_ZONE.into()),
        ..Default::default()
    })
}

/// Picks the profile this process runs with.
///
/// Environment credentials win outright and the file is never read. Then an
/// explicitly requested profile, then the set's default.
#[tracing::instrument(skip_all)]
pub(crate) fn resolve_active_profile(
    lookup: &EnvLookup,
    requested: Option<&str>,
    store: &ConfigStore,
) -> Result<Profile, ExoError> {
    let mut profile = match environment_profile(lookup) {
        Some(profile) => {
            tracing::debug!("using credentials from environment variables");
            profile
        }
        None => from_store(lookup, requested, store)?,
    };

    if let Some(timeout) = first_of(lookup, &[TIMEOUT_VAR]) {
        let seconds: u64 = timeout.parse().map_err(|_| {
            ExoError::Config(format!("{TIMEOUT_VAR} must be a number of seconds, got {timeout:?}"))
        })?;
        profile.client_timeout = Some(seconds);
    }

    tracing::debug!(
        profile = %profile.name,
        endpoint = %profile.endpoint(),
        timeout = ?profile.client_timeout(),
        "active profile resolved"
    );

    Ok(profile)
}

fn from_store(
    lookup: &EnvLookup,
    requested: Option<&str>,
    store: &ConfigStore,
) -> Result<Profile, ExoError> {
    let set = store.load()?;
    if set.is_empty() {
        return Err(ExoError::Config(
            "the exo CLI must be configured before usage, please run \"exo config\"".into(),
        ));
    }

    let requested = requested
        .map(ToString::to_string)
        .or_else(|| first_of(lookup, PROFILE_VARS));

    let profile = match requested {
        Some(name) => set.get(&name)?,
        None => set.default_profile().ok_or_else(|| {
            ExoError::Config(format!(
                "default profile {:?} not found, use \"exo config set\" to pick one",
                set.default_account
            ))
        })?,
    };

    Ok(profile.clone())
}

#[cfg(test)]
mod test {
    use std::{collections::HashMap, fs, sync::Arc};

    use super::{ENV_PROFILE_NAME, EnvLookup, resolve_active_profile};
    use crate::{
        account::{ProfileSet, store::ConfigStore, test::profile},
        cli::error::ExoError,
    };

    fn env(vars: &[(&str, &str)]) -> EnvLookup {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Arc::new(move |name| vars.get(name).cloned())
    }

    fn store_with(names: &[&str], default: &str) -> (tempfile::TempDir, ConfigStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::at(dir.path().join("exoscale.toml"));
        let mut set = ProfileSet::default();
        for name in names {
            set.add(profile(name), *name == default).unwrap();
        }
        store.save_blocking(&set).unwrap();
        (dir, store)
    }

    #[test]
    fn environment_credentials_skip_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exoscale.toml");
        fs::write(&path, "this is { not toml").unwrap();

        let lookup = env(&[
            ("EXOSCALE_API_KEY", "EXOenv"),
            ("EXOSCALE_API_SECRET", "envsecret"),
            ("EXOSCALE_API_ENDPOINT", "http://127.0.0.1:9999"),
        ]);
        let active = resolve_active_profile(&lookup, Some("prod"), &ConfigStore::at(&path)).unwrap();
        assert_eq!(active.name, ENV_PROFILE_NAME);
        assert_eq!(active.endpoint(), "http://127.0.0.1:9999");
        assert_eq!(active.secret().unwrap(), "envsecret");
    }

    #[test]
    fn key_without_secret_falls_through_to_the_file() {
        let (_dir, store) = store_with(&["prod"], "prod");
        let lookup = env(&[("EXOSCALE_API_KEY", "EXOenv")]);
        let active = resolve_active_profile(&lookup, None, &store).unwrap();
        assert_eq!(active.name, "prod");
    }

    #[test]
    fn requested_profile_beats_default() {
        let (_dir, store) = store_with(&["prod", "dev"], "prod");
        let active = resolve_active_profile(&env(&[]), Some("dev"), &store).unwrap();
        assert_eq!(active.name, "dev");

        let lookup = env(&[("EXOSCALE_ACCOUNT", "dev")]);
        assert_eq!(resolve_active_profile(&lookup, None, &store).unwrap().name, "dev");

        let active = resolve_active_profile(&env(&[]), None, &store).unwrap();
        assert_eq!(active.name, "prod");
    }

    #[test]
    fn unknown_profile_is_a_configuration_error() {
        let (_dir, store) = store_with(&["prod"], "prod");
        let err = resolve_active_profile(&env(&[]), Some("nope"), &store).unwrap_err();
        assert!(matches!(err, ExoError::ProfileNotFound(name) if name == "nope"));
    }

    #[test]
    fn empty_configuration_asks_for_setup() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::at(dir.path().join("exoscale.toml"));
        let err = resolve_active_profile(&env(&[]), None, &store).unwrap_err();
        assert!(err.to_string().contains("exo config"));
    }

    #[test]
    fn timeout_override_applies_to_any_profile() {
        let (_dir, store) = store_with(&["prod"], "prod");
        let lookup = env(&[("EXOSCALE_API_TIMEOUT", "90")]);
        let active = resolve_active_profile(&lookup, None, &store).unwrap();
        assert_eq!(active.client_timeout().as_secs(), 90);

        let lookup = env(&[("EXOSCALE_API_TIMEOUT", "soon")]);
        assert!(resolve_active_profile(&lookup, None, &store).is_err());
    }
}
