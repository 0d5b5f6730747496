//! Declarative description of one command.

use serde::Serialize;

use crate::{cli::error::ExoError, output::field_names_of};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FlagKind {
    Bool,
    Int64,
    String,
    StringList,
    StringMap,
    Ip,
    IpList,
    OptionalUint8,
    /// A string restricted to a fixed set of values.
    Choice(&'static [&'static str]),
}

#[derive(Debug, Clone)]
pub(crate) struct FlagSpec {
    pub(crate) long: &'static str,
    pub(crate) short: Option<char>,
    pub(crate) kind: FlagKind,
    pub(crate) default: Option<&'static str>,
    pub(crate) usage: &'static str,
    pub(crate) hidden: bool,
    pub(crate) required: bool,
}

impl FlagSpec {
    fn new(long: &'static str, kind: FlagKind) -> Self {
        Self {
            long,
            short: None,
            kind,
            default: None,
            usage: "",
            hidden: false,
            required: false,
        }
    }

    pub(crate) fn bool(long: &'static str) -> Self {
        Self::new(long, FlagKind::Bool)
    }

    pub(crate) fn int64(long: &'static str) -> Self {
        Self::new(long, FlagKind::Int64)
    }

    pub(crate) fn string(long: &'static str) -> Self {
        Self::new(long, FlagKind::String)
    }

    pub(crate) fn string_list(long: &'static str) -> Self {
        Self::new(long, FlagKind::StringList)
    }

    pub(crate) fn string_map(long: &'static str) -> Self {
        Self::new(long, FlagKind::StringMap)
    }

    pub(crate) fn ip(long: &'static str) -> Self {
        Self::new(long, FlagKind::Ip)
    }

    pub(crate) fn ip_list(long: &'static str) -> Self {
        Self::new(long, FlagKind::IpList)
    }

    pub(crate) fn optional_u8(long: &'static str) -> Self {
        Self::new(long, FlagKind::OptionalUint8)
    }

    pub(crate) fn choice(long: &'static str, values: &'static [&'static str]) -> Self {
        Self::new(long, FlagKind::Choice(values))
    }

    pub(crate) fn short(mut self, short: char) -> Self {
        self.short = Some(short);
        self
    }

    pub(crate) fn default_value(mut self, default: &'static str) -> Self {
        self.default = Some(default);
        self
    }

    pub(crate) fn usage(mut self, usage: &'static str) -> Self {
        self.usage = usage;
        self
    }

    pub(crate) fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub(crate) fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Slot {
    /// Exactly one value.
    Fixed { name: &'static str, usage: &'static str },
    /// Zero or one value.
    Optional { name: &'static str, usage: &'static str },
    /// Every remaining value; `required` demands at least one.
    Rest {
        name: &'static str,
        usage: &'static str,
        required: bool,
    },
}

impl Slot {
    pub(crate) fn fixed(name: &'static str, usage: &'static str) -> Self {
        Slot::Fixed { name, usage }
    }

    pub(crate) fn optional(name: &'static str, usage: &'static str) -> Self {
        Slot::Optional { name, usage }
    }

    pub(crate) fn rest(name: &'static str, usage: &'static str) -> Self {
        Slot::Rest {
            name,
            usage,
            required: false,
        }
    }

    pub(crate) fn targets(name: &'static str, usage: &'static str) -> Self {
        Slot::Rest {
            name,
            usage,
            required: true,
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            Slot::Fixed { name, .. } | Slot::Optional { name, .. } | Slot::Rest { name, .. } => *name,
        }
    }

    pub(crate) fn is_rest(&self) -> bool {
        matches!(self, Slot::Rest { .. })
    }
}

/// Lists the output names a command's result exposes.
pub(crate) type OutputFields = fn() -> Result<Vec<String>, ExoError>;

/// Everything the framework needs to know about a command, fixed once registered.
#[derive(Debug, Clone)]
pub(crate) struct CommandDescriptor {
    pub(crate) token: &'static str,
    pub(crate) aliases: &'static [&'static str],
    pub(crate) about: &'static str,
    pub(crate) long_about: Option<String>,
    pub(crate) slots: Vec<Slot>,
    pub(crate) flags: Vec<FlagSpec>,
    pub(crate) hidden: bool,
    pub(crate) confirm_by_default: bool,
    pub(crate) force_flag: Option<(&'static str, char)>,
    /// Changes server state; its output is suppressed by `--quiet`.
    pub(crate) mutating: bool,
    pub(crate) output: Option<OutputFields>,
}

impl CommandDescriptor {
    pub(crate) fn new(token: &'static str) -> Self {
        Self {
            token,
            aliases: &[],
            about: "",
            long_about: None,
            slots: Vec::new(),
            flags: Vec::new(),
            hidden: false,
            confirm_by_default: false,
            force_flag: None,
            mutating: false,
            output: None,
        }
    }

    pub(crate) fn aliases(mut self, aliases: &'static [&'static str]) -> Self {
        self.aliases = aliases;
        self
    }

    pub(crate) fn about(mut self, about: &'static str) -> Self {
        self.about = about;
        self
    }

    pub(crate) fn long_about(mut self, long_about: impl Into<String>) -> Self {
        self.long_about = Some(long_about.into());
        self
    }

    pub(crate) fn slot(mut self, slot: Slot) -> Self {
        self.slots.push(slot);
        self
    }

    pub(crate) fn flag(mut self, flag: FlagSpec) -> Self {
        self.flags.push(flag);
        self
    }

    /// The usual `--zone`/`-z` flag, defaulted from the active profile.
    pub(crate) fn zone_flag(self, usage: &'static str) -> Self {
        self.flag(FlagSpec::string("zone").short('z').usage(usage))
    }

    pub(crate) fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Asks before acting unless `--force`/`-f` is given.
    pub(crate) fn confirmation(self) -> Self {
        self.confirmation_flag("force", 'f')
    }

    pub(crate) fn confirmation_flag(mut self, long: &'static str, short: char) -> Self {
        self.confirm_by_default = true;
        self.force_flag = Some((long, short));
        self.flag(
            FlagSpec::bool(long)
                .short(short)
                .usage("attempt to perform the operation without prompting for confirmation"),
        )
    }

    pub(crate) fn mutating(mut self) -> Self {
        self.mutating = true;
        self
    }

    /// Declares the record type this command renders.
    pub(crate) fn output<T: Serialize + Default>(mut self) -> Self {
        self.output = Some(field_names_of::<T> as OutputFields);
        self
    }

    pub(crate) fn find_flag(&self, long: &str) -> Option<&FlagSpec> {
        self.flags.iter().find(|flag| flag.long == long)
    }
}
