use std::{
    collections::{BTreeMap, HashMap},
    io::Write,
    net::IpAddr,
    sync::Arc,
};

use clap::{
    ArgMatches,
    parser::{MatchesError, ValueSource},
};
use tabled::{builder::Builder, settings::Style};

use crate::{
    account::DEFAULT_ZONE,
    cli::{
        error::ExoError,
        framework::{
            App,
            descriptor::{CommandDescriptor, FlagKind},
            registry::CLEAR_MAP_ENTRY,
        },
    },
};

/// One parsed command line, typed access keyed by flag long names.
#[derive(Debug, Clone)]
pub(crate) struct Invocation {
    path: Vec<&'static str>,
    descriptor: Arc<CommandDescriptor>,
    matches: ArgMatches,
    defaults: HashMap<&'static str, String>,
    usage: String,
}

impl Invocation {
    pub(crate) fn new(
        path: Vec<&'static str>,
        descriptor: Arc<CommandDescriptor>,
        matches: ArgMatches,
        usage: String,
    ) -> Self {
        Self {
            path,
            descriptor,
            matches,
            defaults: HashMap::new(),
            usage,
        }
    }

    pub(crate) fn path(&self) -> String {
        self.path.join(" ")
    }

    pub(crate) fn descriptor(&self) -> &CommandDescriptor {
        &self.descriptor
    }

    pub(crate) fn usage(&self) -> &str {
        &self.usage
    }

    fn lookup_error(&self, name: &str, e: MatchesError) -> ExoError {
        ExoError::Implementation(format!("{}: cannot read {name}: {e}", self.path()))
    }

    /// Flags the command does not declare read as absent.
    fn one<T: Clone + Send + Sync + 'static>(&self, name: &str) -> Result<Option<T>, ExoError> {
        match self.matches.try_get_one::<T>(name) {
            Ok(value) => Ok(value.cloned()),
            Err(MatchesError::UnknownArgument { .. }) => Ok(None),
            Err(e) => Err(self.lookup_error(name, e)),
        }
    }

    fn many<T: Clone + Send + Sync + 'static>(&self, name: &str) -> Result<Vec<T>, ExoError> {
        match self.matches.try_get_many::<T>(name) {
            Ok(values) => Ok(values.map(|values| values.cloned().collect()).unwrap_or_default()),
            Err(MatchesError::UnknownArgument { .. }) => Ok(Vec::new()),
            Err(e) => Err(self.lookup_error(name, e)),
        }
    }

    /// A single positional value.
    pub(crate) fn arg(&self, name: &str) -> Result<Option<String>, ExoError> {
        self.one::<String>(name)
    }

    pub(crate) fn required_arg(&self, name: &str) -> Result<String, ExoError> {
        self.arg(name)?
            .ok_or_else(|| ExoError::usage(format!("missing argument {name}")))
    }

    /// Every value of a rest positional.
    pub(crate) fn args(&self, name: &str) -> Result<Vec<String>, ExoError> {
        self.many::<String>(name)
    }

    /// Whether the user set the flag on the command line.
    pub(crate) fn changed(&self, name: &str) -> bool {
        let given = |id: &str| {
            self.matches
                .try_contains_id(id)
                .map(|present| present && self.matches.value_source(id) == Some(ValueSource::CommandLine))
                .unwrap_or(false)
        };

        given(name)
            || self
                .descriptor
                .find_flag(name)
                .is_some_and(|flag| flag.kind == FlagKind::Bool && given(&format!("no-{name}")))
    }

    pub(crate) fn bool(&self, name: &str) -> Result<bool, ExoError> {
        let negated = format!("no-{name}");
        if self.one::<bool>(&negated)?.unwrap_or(false) {
            return Ok(false);
        }

        Ok(self.one::<bool>(name)?.unwrap_or(false))
    }

    /// A string flag: the command line, then a pre-run default, then the declared default.
    pub(crate) fn string(&self, name: &str) -> Result<Option<String>, ExoError> {
        let value = self.one::<String>(name)?;
        if self.changed(name) {
            return Ok(value);
        }

        Ok(self.defaults.get(name).cloned().or(value))
    }

    pub(crate) fn int64(&self, name: &str) -> Result<Option<i64>, ExoError> {
        self.one::<i64>(name)
    }

    pub(crate) fn strings(&self, name: &str) -> Result<Vec<String>, ExoError> {
        self.many::<String>(name)
    }

    /// Later keys win. A lone `=` entry yields an empty map.
    pub(crate) fn string_map(&self, name: &str) -> Result<BTreeMap<String, String>, ExoError> {
        let mut map = BTreeMap::new();
        for (key, value) in self.many::<(String, String)>(name)? {
            if (key.as_str(), value.as_str()) == CLEAR_MAP_ENTRY {
                map.clear();
                continue;
            }
            map.insert(key, value);
        }

        Ok(map)
    }

    pub(crate) fn ip(&self, name: &str) -> Result<Option<IpAddr>, ExoError> {
        self.one::<IpAddr>(name)
    }

    pub(crate) fn ips(&self, name: &str) -> Result<Vec<IpAddr>, ExoError> {
        self.many::<IpAddr>(name)
    }

    pub(crate) fn optional_u8(&self, name: &str) -> Result<Option<u8>, ExoError> {
        self.one::<u8>(name)
    }

    /// Supplies a value used when the flag was not given on the command line.
    pub(crate) fn set_default(&mut self, name: &'static str, value: impl Into<String>) {
        self.defaults.insert(name, value.into());
    }

    /// The zone flag's value, falling back to the built-in default zone.
    pub(crate) fn zone(&self) -> Result<String, ExoError> {
        Ok(self
            .string("zone")?
            .filter(|zone| !zone.is_empty())
            .unwrap_or_else(|| DEFAULT_ZONE.to_string()))
    }

    /// Whether confirmation prompts are bypassed.
    pub(crate) fn force(&self) -> Result<bool, ExoError> {
        match self.descriptor.force_flag {
            Some((long, _)) => self.bool(long),
            None => Ok(false),
        }
    }

    /// Fails unless both flags or neither are set.
    pub(crate) fn both_or_neither(&self, first: &str, second: &str) -> Result<(), ExoError> {
        if self.changed(first) != self.changed(second) {
            return Err(ExoError::usage(format!(
                "--{first} and --{second} must be specified together"
            )));
        }

        Ok(())
    }

    /// Asks a yes/no question on stderr. Anything but `y`/`yes` is a no.
    ///
    /// Always yes under the force flag, always no without a terminal or once
    /// the process is cancelled.
    pub(crate) async fn confirm(&self, app: &App, question: &str) -> Result<bool, ExoError> {
        if self.force()? {
            return Ok(true);
        }

        let console = app.console();
        if !console.is_interactive() {
            tracing::debug!(question, "standard input is not a terminal, declining");
            return Ok(false);
        }

        let mut err = console.err();
        write!(err, "{question} [yN]: ")?;
        err.flush()?;

        match console.read_line(app.cancel()).await {
            Ok(Some(answer)) => Ok(matches!(
                answer.trim().to_lowercase().as_str(),
                "y" | "yes"
            )),
            Ok(None) | Err(ExoError::Cancelled) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Prints the flags whose long name starts with `prefix`, including hidden ones.
    pub(crate) fn print_flags_with_prefix(&self, app: &App, prefix: &str) -> Result<(), ExoError> {
        let mut builder = Builder::default();
        for flag in self
            .descriptor
            .flags
            .iter()
            .filter(|flag| flag.long.starts_with(prefix))
        {
            builder.push_record([format!("--{}", flag.long), flag.usage.to_string()]);
        }

        let mut table = builder.build();
        table.with(Style::blank());
        writeln!(app.console().out(), "{table}")?;
        Ok(())
    }
}
