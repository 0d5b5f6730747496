use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use fs2::FileExt;

use crate::{
    account::{ProfileSet, resolve::EnvLookup},
    cli::error::ExoError,
};

const CONFIG_DIR: &str = "exoscale";
const CONFIG_FILE: &str = "exoscale.toml";
const LEGACY_DIR: &str = ".exoscale";
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);
const LOCK_RETRY: Duration = Duration::from_millis(50);

/// Where the profile set lives on disk and how it is read and written.
#[derive(Debug, Clone)]
pub(crate) struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub(crate) fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `explicit` wins; otherwise `$XDG_CONFIG_HOME/exoscale/exoscale.toml`,
    /// falling back to `$HOME/.exoscale/exoscale.toml` when only that one exists.
    pub(crate) fn locate(explicit: Option<&Path>, env: &EnvLookup) -> Result<Self, ExoError> {
        if let Some(path) = explicit {
            return Ok(Self::at(path));
        }

        let config_home = env("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .filter(|dir| dir.is_absolute());
        let path = match config_home {
            Some(dir) => dir.join(CONFIG_DIR).join(CONFIG_FILE),
            None => xdg::BaseDirectories::with_prefix(CONFIG_DIR)?.get_config_file(CONFIG_FILE),
        };

        if !path.exists() {
            if let Some(home) = env("HOME").filter(|home| !home.is_empty()) {
                let legacy = PathBuf::from(home).join(LEGACY_DIR).join(CONFIG_FILE);
                if legacy.exists() {
                    tracing::debug!(path = %legacy.display(), "using legacy configuration file");
                    return Ok(Self::at(legacy));
                }
            }
        }

        Ok(Self::at(path))
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> ExoError {
        ExoError::ConfigIo {
            path: self.path.clone(),
            source,
        }
    }

    fn ensure_dir(&self) -> Result<PathBuf, ExoError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if dir.exists() {
            return Ok(dir);
        }

        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        builder.create(&dir).map_err(|e| self.io_error(e))?;

        Ok(dir)
    }

    /// An absent file is an empty set.
    #[tracing::instrument(skip_all, fields(path = %self.path.display()))]
    pub(crate) fn load(&self) -> Result<ProfileSet, ExoError> {
        self.ensure_dir()?;

        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("no configuration file yet");
                return Ok(ProfileSet::default());
            }
            Err(e) => return Err(self.io_error(e)),
        };

        let set: ProfileSet = toml::from_str(&contents).map_err(|source| ExoError::ConfigParse {
            path: self.path.clone(),
            source,
        })?;
        tracing::debug!(profiles = set.accounts.len(), "configuration loaded");

        Ok(set)
    }

    /// Saves on a blocking thread, since waiting for the lock may take a while.
    pub(crate) async fn save(&self, set: &ProfileSet) -> Result<(), ExoError> {
        let store = self.clone();
        let set = set.clone();
        tokio::task::spawn_blocking(move || store.save_blocking(&set)).await?
    }

    /// Atomically replaces the file with `set`.
    #[tracing::instrument(skip_all, fields(path = %self.path.display()))]
    pub(crate) fn save_blocking(&self, set: &ProfileSet) -> Result<(), ExoError> {
        let dir = self.ensure_dir()?;
        if let Ok(metadata) = fs::metadata(&self.path) {
            if metadata.permissions().readonly() {
                return Err(ExoError::ReadOnlyConfig(self.path.clone()));
            }
        }

        let contents = toml::to_string_pretty(set)?;
        let _lock = SaveLock::acquire(&self.lock_path(), LOCK_TIMEOUT)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| self.io_error(e))?;
        tmp.write_all(contents.as_bytes())
            .map_err(|e| self.io_error(e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(fs::Permissions::from_mode(0o600))
                .map_err(|e| self.io_error(e))?;
        }
        tmp.persist(&self.path).map_err(|e| self.io_error(e.error))?;
        tracing::debug!(profiles = set.accounts.len(), "configuration saved");

        Ok(())
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }
}

/// An advisory lock on `<config>.lock`, held for the duration of a save.
///
/// The lock file itself stays on disk. The operating system drops the lock
/// when the holder exits, however it exits.
struct SaveLock(File);

impl SaveLock {
    fn acquire(path: &Path, timeout: Duration) -> Result<Self, ExoError> {
        let io_error = |source| ExoError::ConfigIo {
            path: path.to_path_buf(),
            source,
        };
        let file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(io_error)?;

        let started = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(Self(file)),
                Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                    if started.elapsed() >= timeout {
                        return Err(ExoError::Config(
                            "configuration is being saved by another exo process".into(),
                        ));
                    }
                    tracing::trace!("configuration lock is held, waiting");
                    std::thread::sleep(LOCK_RETRY);
                }
                Err(e) => return Err(io_error(e)),
            }
        }
    }
}

impl Drop for SaveLock {
    fn drop(&mut self) {
        if let Err(e) = self.0.unlock() {
            tracing::debug!(error = %e, "could not release configuration lock");
        }
    }
}

#[cfg(test)]
mod test {
    use std::{
        collections::HashMap,
        fs,
        path::Path,
        sync::Arc,
        time::{Duration, Instant},
    };

    use fs2::FileExt;

    use super::{ConfigStore, LOCK_TIMEOUT, SaveLock};
    use crate::{
        account::{ProfileSet, resolve::EnvLookup, test::profile},
        cli::error::ExoError,
        output::OutputFormat,
    };

    fn env(vars: &[(&'static str, &Path)]) -> EnvLookup {
        let vars: HashMap<&'static str, String> = vars
            .iter()
            .map(|(name, path)| (*name, path.display().to_string()))
            .collect();
        Arc::new(move |name| vars.get(name).cloned())
    }

    fn write_config(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "default_account = \"\"\n").unwrap();
    }

    #[test]
    fn explicit_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("elsewhere.toml");
        let lookup = env(&[("XDG_CONFIG_HOME", dir.path()), ("HOME", dir.path())]);

        let store = ConfigStore::locate(Some(&explicit), &lookup).unwrap();
        assert_eq!(store.path(), explicit);
    }

    #[test]
    fn xdg_location_is_preferred_over_the_legacy_one() {
        let dir = tempfile::tempdir().unwrap();
        let config_home = dir.path().join("config");
        let home = dir.path().join("home");
        let lookup = env(&[("XDG_CONFIG_HOME", &config_home), ("HOME", &home)]);
        let legacy = home.join(".exoscale/exoscale.toml");
        write_config(&legacy);

        // Only the legacy file exists.
        let store = ConfigStore::locate(None, &lookup).unwrap();
        assert_eq!(store.path(), legacy);

        let current = config_home.join("exoscale/exoscale.toml");
        write_config(&current);
        let store = ConfigStore::locate(None, &lookup).unwrap();
        assert_eq!(store.path(), current);
    }

    #[test]
    fn nothing_on_disk_points_at_the_xdg_location() {
        let dir = tempfile::tempdir().unwrap();
        let config_home = dir.path().join("config");
        let lookup = env(&[("XDG_CONFIG_HOME", &config_home), ("HOME", dir.path())]);

        let store = ConfigStore::locate(None, &lookup).unwrap();
        assert_eq!(store.path(), config_home.join("exoscale/exoscale.toml"));
    }

    #[test]
    fn leftover_lock_file_does_not_block_saves() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::at(dir.path().join("exoscale.toml"));
        // What a killed process leaves behind.
        fs::write(dir.path().join("exoscale.toml.lock"), "").unwrap();

        let mut set = ProfileSet::default();
        set.add(profile("prod"), true).unwrap();
        let started = Instant::now();
        store.save_blocking(&set).unwrap();
        store.save_blocking(&set).unwrap();

        assert!(started.elapsed() < LOCK_TIMEOUT);
        assert_eq!(store.load().unwrap(), set);
    }

    #[test]
    fn held_lock_delays_the_save_until_released() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::at(dir.path().join("exoscale.toml"));
        let holder = fs::File::create(dir.path().join("exoscale.toml.lock")).unwrap();
        holder.lock_exclusive().unwrap();

        let release = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            holder.unlock().unwrap();
        });

        let mut set = ProfileSet::default();
        set.add(profile("prod"), true).unwrap();
        let started = Instant::now();
        store.save_blocking(&set).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(150));
        release.join().unwrap();
        assert_eq!(store.load().unwrap(), set);
    }

    #[test]
    fn lock_held_elsewhere_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exoscale.toml.lock");
        let holder = fs::File::create(&path).unwrap();
        holder.lock_exclusive().unwrap();

        let err = SaveLock::acquire(&path, Duration::from_millis(100)).err().unwrap();
        assert!(matches!(err, ExoError::Config(_)));

        drop(holder);
        assert!(SaveLock::acquire(&path, Duration::from_millis(100)).is_ok());
    }

    #[tokio::test]
    async fn save_runs_off_the_async_threads() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::at(dir.path().join("exoscale.toml"));
        let mut set = ProfileSet::default();
        set.add(profile("dev"), true).unwrap();

        store.save(&set).await.unwrap();
        assert_eq!(store.load().unwrap(), set);
    }

    #[test]
    fn missing_file_loads_as_empty_set() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::at(dir.path().join("nested/exoscale.toml"));
        assert_eq!(store.load().unwrap(), ProfileSet::default());
        assert!(dir.path().join("nested").is_dir());
    }

    #[test]
    fn save_then_load_is_identity() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::at(dir.path().join("exoscale.toml"));

        let mut set = ProfileSet::default();
        let mut prod = profile("prod");
        prod.default_output_format = Some(OutputFormat::Json);
        prod.client_timeout = Some(45);
        set.add(prod, false).unwrap();
        let mut dev = profile("dev");
        dev.secret = None;
        dev.secret_command = Some(vec!["pass".into(), "show".into(), "exo".into()]);
        set.add(dev, true).unwrap();

        store.save_blocking(&set).unwrap();
        assert_eq!(store.load().unwrap(), set);
    }

    #[cfg(unix)]
    #[test]
    fn saved_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exoscale.toml");
        let store = ConfigStore::at(&path);
        let mut set = ProfileSet::default();
        set.add(profile("prod"), false).unwrap();
        store.save_blocking(&set).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn legacy_keys_are_read_and_unknown_keys_survive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exoscale.toml");
        fs::write(
            &path,
            r#"
defaultAccount = "prod"
telemetry = false

[[accounts]]
name = "prod"
key = "EXOabc"
secret = "xyz"
defaultZone = "at-vie-1"
clientTimeout = 30
sosEndpoint = "https://sos-{zone}.exo.io"
"#,
        )
        .unwrap();

        let store = ConfigStore::at(&path);
        let set = store.load().unwrap();
        assert_eq!(set.default_account, "prod");
        let prod = set.get("prod").unwrap();
        assert_eq!(prod.default_zone, "at-vie-1");
        assert_eq!(prod.client_timeout, Some(30));

        store.save_blocking(&set).unwrap();
        let rewritten = fs::read_to_string(&path).unwrap();
        assert!(rewritten.contains("default_account"));
        assert!(rewritten.contains("default_zone"));
        assert!(rewritten.contains("telemetry"));
        assert!(rewritten.contains("sosEndpoint"));
        assert_eq!(store.load().unwrap(), set);
    }

    #[test]
    fn malformed_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exoscale.toml");
        fs::write(&path, "accounts = [[[").unwrap();
        assert!(matches!(
            ConfigStore::at(&path).load(),
            Err(ExoError::ConfigParse { .. })
        ));
    }

    #[test]
    fn failed_set_default_leaves_disk_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exoscale.toml");
        let store = ConfigStore::at(&path);
        let mut set = ProfileSet::default();
        set.add(profile("prod"), false).unwrap();
        store.save_blocking(&set).unwrap();
        let before = fs::read_to_string(&path).unwrap();

        let mut loaded = store.load().unwrap();
        assert!(loaded.set_default("unknown").is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
        assert_eq!(loaded.default_account, "prod");
    }

    #[cfg(unix)]
    #[test]
    fn read_only_file_refuses_saves() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exoscale.toml");
        fs::write(&path, "default_account = \"\"\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o400)).unwrap();

        let err = ConfigStore::at(&path)
            .save_blocking(&ProfileSet::default())
            .unwrap_err();
        assert!(matches!(err, ExoError::ReadOnlyConfig(_)));
    }
}
