//! The command tree and its translation to a `clap::Command`.

use std::{collections::HashSet, net::IpAddr, sync::Arc};

use clap::{
    Arg, ArgAction, ArgMatches,
    builder::{BoolishValueParser, PossibleValuesParser},
};

use crate::{
    cli::{
        error::ExoError,
        framework::{
            CliCommand,
            descriptor::{CommandDescriptor, FlagKind, FlagSpec, Slot},
        },
    },
    output::template_annotations,
};

/// `--label=` and `--label =` clear every label.
pub(crate) const CLEAR_MAP_ENTRY: (&str, &str) = ("", "");

pub(crate) struct CommandNode {
    pub(crate) descriptor: Arc<CommandDescriptor>,
    pub(crate) command: Option<Arc<dyn CliCommand>>,
    pub(crate) children: Vec<CommandNode>,
}

impl CommandNode {
    fn new(descriptor: CommandDescriptor, command: Option<Arc<dyn CliCommand>>) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            command,
            children: Vec::new(),
        }
    }

    fn child(&self, token: &str) -> Option<&CommandNode> {
        self.children
            .iter()
            .find(|child| child.descriptor.token == token)
    }
}

pub(crate) struct CommandTree {
    root: CommandNode,
    reserved_longs: HashSet<String>,
    reserved_shorts: HashSet<char>,
}

impl CommandTree {
    /// `globals` are the process-wide flags every command inherits.
    pub(crate) fn new(root: CommandDescriptor, globals: &clap::Command) -> Self {
        let mut reserved_longs: HashSet<String> = ["help", "version"].map(String::from).into();
        let mut reserved_shorts: HashSet<char> = ['h', 'V'].into();
        for arg in globals.get_arguments() {
            if let Some(long) = arg.get_long() {
                reserved_longs.insert(long.to_string());
            }
            if let Some(short) = arg.get_short() {
                reserved_shorts.insert(short);
            }
        }

        Self {
            root: CommandNode::new(root, None),
            reserved_longs,
            reserved_shorts,
        }
    }

    pub(crate) fn root(&self) -> &CommandNode {
        &self.root
    }

    /// Installs a node that only groups other commands.
    pub(crate) fn group(&mut self, parent: &[&str], descriptor: CommandDescriptor) -> Result<(), ExoError> {
        self.insert(parent, descriptor, None)
    }

    pub(crate) fn register(
        &mut self,
        parent: &[&str],
        command: impl CliCommand + 'static,
    ) -> Result<(), ExoError> {
        let descriptor = command.descriptor();
        self.insert(parent, descriptor, Some(Arc::new(command)))
    }

    fn insert(
        &mut self,
        parent: &[&str],
        descriptor: CommandDescriptor,
        command: Option<Arc<dyn CliCommand>>,
    ) -> Result<(), ExoError> {
        let location = parent
            .iter()
            .chain(std::iter::once(&descriptor.token))
            .copied()
            .collect::<Vec<_>>()
            .join(" ");
        let invalid = |reason: String| ExoError::Implementation(format!("command \"{location}\": {reason}"));

        validate_descriptor(&descriptor, &self.reserved_longs, &self.reserved_shorts).map_err(invalid)?;

        let mut node = &mut self.root;
        for token in parent {
            node = node
                .children
                .iter_mut()
                .find(|child| child.descriptor.token == *token)
                .ok_or_else(|| invalid(format!("parent {token:?} is not registered")))?;
        }

        let mut names = std::iter::once(descriptor.token).chain(descriptor.aliases.iter().copied());
        if let Some(taken) = names.find(|name| {
            node.children.iter().any(|sibling| {
                sibling.descriptor.token == *name || sibling.descriptor.aliases.contains(name)
            })
        }) {
            return Err(invalid(format!("name {taken:?} is already used by a sibling")));
        }

        tracing::trace!(command = %location, "registered");
        node.children.push(CommandNode::new(descriptor, command));
        Ok(())
    }

    /// Follows the matched subcommands down to the selected node.
    pub(crate) fn resolve<'a>(
        &'a self,
        matches: &'a ArgMatches,
    ) -> (Vec<&'static str>, &'a CommandNode, &'a ArgMatches) {
        let mut path = Vec::new();
        let mut node = &self.root;
        let mut matches = matches;
        while let Some((name, sub)) = matches.subcommand() {
            let Some(child) = node.child(name) else {
                break;
            };
            path.push(child.descriptor.token);
            node = child;
            matches = sub;
        }

        (path, node, matches)
    }

    /// Every node below the root with its full path.
    pub(crate) fn walk(&self) -> Vec<(Vec<&'static str>, &CommandNode)> {
        fn visit<'a>(
            node: &'a CommandNode,
            path: Vec<&'static str>,
            out: &mut Vec<(Vec<&'static str>, &'a CommandNode)>,
        ) {
            for child in &node.children {
                let mut child_path = path.clone();
                child_path.push(child.descriptor.token);
                out.push((child_path.clone(), child));
                visit(child, child_path, out);
            }
        }

        let mut out = Vec::new();
        visit(&self.root, Vec::new(), &mut out);
        out
    }

    pub(crate) fn to_clap(&self) -> clap::Command {
        build(&self.root)
    }
}

fn validate_descriptor(
    descriptor: &CommandDescriptor,
    reserved_longs: &HashSet<String>,
    reserved_shorts: &HashSet<char>,
) -> Result<(), String> {
    if descriptor.token.is_empty() || descriptor.token.starts_with('-') {
        return Err("command token must be a non-empty word".into());
    }
    if descriptor.aliases.contains(&descriptor.token) {
        return Err("a command cannot alias itself".into());
    }

    let mut longs = HashSet::new();
    let mut shorts = HashSet::new();
    for flag in &descriptor.flags {
        let mut names = vec![flag.long.to_string()];
        if flag.kind == FlagKind::Bool {
            names.push(format!("no-{}", flag.long));
        }
        for name in names {
            if reserved_longs.contains(&name) {
                return Err(format!("flag --{name} shadows a global flag"));
            }
            if !longs.insert(name.clone()) {
                return Err(format!("flag --{name} is declared twice"));
            }
        }

        if let Some(short) = flag.short {
            if reserved_shorts.contains(&short) {
                return Err(format!("short flag -{short} shadows a global flag"));
            }
            if !shorts.insert(short) {
                return Err(format!("short flag -{short} is declared twice"));
            }
        }

        validate_default(flag)?;
    }

    let mut seen_optional = false;
    for (index, slot) in descriptor.slots.iter().enumerate() {
        match slot {
            Slot::Rest { .. } if index + 1 != descriptor.slots.len() => {
                return Err(format!("rest slot {} must be the last positional", slot.name()));
            }
            Slot::Fixed { .. } if seen_optional => {
                return Err(format!("fixed slot {} follows an optional one", slot.name()));
            }
            Slot::Optional { .. } | Slot::Rest { .. } => seen_optional = true,
            Slot::Fixed { .. } => {}
        }
    }

    if let Some(fields) = descriptor.output {
        match fields() {
            Ok(fields) if !fields.is_empty() => {}
            Ok(_) => return Err("output type exposes no fields".into()),
            Err(e) => return Err(format!("output type cannot be introspected: {e}")),
        }
    }

    Ok(())
}

fn validate_default(flag: &FlagSpec) -> Result<(), String> {
    let Some(default) = flag.default else {
        return Ok(());
    };

    let valid = match &flag.kind {
        FlagKind::Bool => matches!(default, "true" | "false"),
        FlagKind::Int64 => default.parse::<i64>().is_ok(),
        FlagKind::OptionalUint8 => default.parse::<u8>().is_ok(),
        FlagKind::Ip => default.parse::<IpAddr>().is_ok(),
        FlagKind::IpList => default
            .split(',')
            .all(|value| value.parse::<IpAddr>().is_ok()),
        FlagKind::Choice(values) => values.contains(&default),
        FlagKind::String | FlagKind::StringList => true,
        FlagKind::StringMap => parse_key_value(default).is_ok(),
    };

    if valid {
        Ok(())
    } else {
        Err(format!("flag --{} has an invalid default {default:?}", flag.long))
    }
}

/// Parses one `KEY=VALUE` occurrence of a string-map flag.
pub(crate) fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    if raw.is_empty() || raw == "=" {
        return Ok((CLEAR_MAP_ENTRY.0.into(), CLEAR_MAP_ENTRY.1.into()));
    }

    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {raw:?}")),
    }
}

fn build(node: &CommandNode) -> clap::Command {
    let descriptor = &node.descriptor;
    let mut command = clap::Command::new(descriptor.token)
        .about(descriptor.about)
        .visible_aliases(descriptor.aliases.iter().copied())
        .hide(descriptor.hidden);

    let mut long_about = descriptor.long_about.clone().unwrap_or_default();
    if let Some(Ok(fields)) = descriptor.output.map(|fields| fields()) {
        if !long_about.is_empty() {
            long_about.push_str("\n\n");
        }
        long_about.push_str(&template_annotations(&fields));
    }
    if !long_about.is_empty() {
        command = command.long_about(long_about);
    }

    for (index, slot) in descriptor.slots.iter().enumerate() {
        command = command.arg(slot_arg(slot, index + 1));
    }
    for flag in &descriptor.flags {
        command = command.args(flag_args(flag));
    }

    for child in &node.children {
        command = command.subcommand(build(child));
    }
    if !node.children.is_empty() && node.command.is_none() {
        command = command.subcommand_required(true).arg_required_else_help(true);
    }

    command
}

fn slot_arg(slot: &Slot, index: usize) -> Arg {
    match slot {
        Slot::Fixed { name, usage } => Arg::new(*name)
            .value_name(*name)
            .help(*usage)
            .index(index)
            .required(true),
        Slot::Optional { name, usage } => Arg::new(*name)
            .value_name(*name)
            .help(*usage)
            .index(index),
        Slot::Rest {
            name,
            usage,
            required,
        } => Arg::new(*name)
            .value_name(*name)
            .help(*usage)
            .index(index)
            .action(ArgAction::Append)
            .num_args(if *required { 1.. } else { 0.. })
            .required(*required),
    }
}

fn flag_args(flag: &FlagSpec) -> Vec<Arg> {
    let mut arg = Arg::new(flag.long)
        .long(flag.long)
        .help(flag.usage)
        .hide(flag.hidden)
        .required(flag.required);
    if let Some(short) = flag.short {
        arg = arg.short(short);
    }
    if let Some(default) = flag.default {
        arg = arg.default_value(default);
    }

    let arg = match &flag.kind {
        FlagKind::Bool => {
            let negation = format!("no-{}", flag.long);
            let arg = arg
                .action(ArgAction::Set)
                .num_args(0..=1)
                .require_equals(true)
                .default_missing_value("true")
                .value_name("BOOL")
                .value_parser(BoolishValueParser::new())
                .overrides_with(negation.clone());
            let arg = if flag.default.is_none() {
                arg.default_value("false")
            } else {
                arg
            };

            return vec![
                arg,
                Arg::new(negation.clone())
                    .long(negation)
                    .action(ArgAction::SetTrue)
                    .hide(true)
                    .overrides_with(flag.long),
            ];
        }
        FlagKind::Int64 => arg
            .action(ArgAction::Set)
            .allow_negative_numbers(true)
            .value_parser(clap::value_parser!(i64)),
        FlagKind::String => arg.action(ArgAction::Set),
        FlagKind::StringList => arg.action(ArgAction::Append).value_delimiter(','),
        FlagKind::StringMap => arg
            .action(ArgAction::Append)
            .value_name("KEY=VALUE")
            .value_parser(parse_key_value),
        FlagKind::Ip => arg
            .action(ArgAction::Set)
            .value_parser(clap::value_parser!(IpAddr)),
        FlagKind::IpList => arg
            .action(ArgAction::Append)
            .value_delimiter(',')
            .value_parser(clap::value_parser!(IpAddr)),
        FlagKind::OptionalUint8 => arg
            .action(ArgAction::Set)
            .value_parser(clap::value_parser!(u8)),
        FlagKind::Choice(values) => arg
            .action(ArgAction::Set)
            .value_parser(PossibleValuesParser::new(values.iter().copied())),
    };

    vec![arg]
}

#[cfg(test)]
mod test {
    use async_trait::async_trait;
    use serde::Serialize;

    use super::{CommandTree, parse_key_value};
    use crate::{
        cli::{
            error::ExoError,
            framework::{
                App, CliCommand, Invocation,
                descriptor::{CommandDescriptor, FlagSpec, Slot},
            },
        },
        output::CommandOutput,
    };

    struct Probe(CommandDescriptor);

    #[async_trait]
    impl CliCommand for Probe {
        fn descriptor(&self) -> CommandDescriptor {
            self.0.clone()
        }

        async fn run(&self, _: &Invocation, _: &App) -> Result<Option<CommandOutput>, ExoError> {
            Ok(None)
        }
    }

    fn globals() -> clap::Command {
        clap::Command::new("globals")
            .arg(clap::Arg::new("profile").long("profile").short('P'))
            .arg(clap::Arg::new("quiet").long("quiet").short('Q'))
    }

    fn tree() -> CommandTree {
        let mut tree = CommandTree::new(CommandDescriptor::new("exo"), &globals());
        tree.group(&[], CommandDescriptor::new("compute")).unwrap();
        tree
    }

    #[test]
    fn sibling_tokens_and_aliases_are_unique() {
        let mut tree = tree();
        tree.register(&["compute"], Probe(CommandDescriptor::new("list").aliases(&["ls"])))
            .unwrap();

        let err = tree
            .register(&["compute"], Probe(CommandDescriptor::new("list")))
            .unwrap_err();
        assert!(matches!(err, ExoError::Implementation(_)));

        let err = tree
            .register(&["compute"], Probe(CommandDescriptor::new("ls")))
            .unwrap_err();
        assert!(err.to_string().contains("already used"));
    }

    #[test]
    fn duplicate_and_global_shorts_are_rejected() {
        let mut tree = tree();
        let twice = CommandDescriptor::new("a")
            .flag(FlagSpec::string("zone").short('z'))
            .flag(FlagSpec::string("size").short('z'));
        assert!(tree.register(&["compute"], Probe(twice)).is_err());

        let global = CommandDescriptor::new("b").flag(FlagSpec::string("plan").short('P'));
        assert!(tree.register(&["compute"], Probe(global)).is_err());
    }

    #[test]
    fn rest_slot_must_be_last() {
        let mut tree = tree();
        let descriptor = CommandDescriptor::new("c")
            .slot(Slot::rest("NAMES", ""))
            .slot(Slot::fixed("ZONE", ""));
        assert!(tree.register(&["compute"], Probe(descriptor)).is_err());
    }

    #[test]
    fn unknown_parent_is_rejected() {
        let mut tree = tree();
        assert!(
            tree.register(&["storage"], Probe(CommandDescriptor::new("ls")))
                .is_err()
        );
    }

    #[test]
    fn output_types_must_be_records() {
        #[derive(Default, Serialize)]
        struct Record {
            id: String,
        }

        let mut tree = tree();
        let scalar = CommandDescriptor::new("count").output::<u64>();
        assert!(tree.register(&["compute"], Probe(scalar)).is_err());

        let record = CommandDescriptor::new("show").output::<Record>();
        tree.register(&["compute"], Probe(record)).unwrap();
        let help = tree
            .to_clap()
            .find_subcommand("compute")
            .and_then(|c| c.find_subcommand("show"))
            .and_then(|c| c.get_long_about())
            .map(ToString::to_string)
            .unwrap();
        assert!(help.contains("Supported output template annotations: .id"));
    }

    #[test]
    fn key_values_parse() {
        assert_eq!(
            parse_key_value("env=prod").unwrap(),
            ("env".to_string(), "prod".to_string())
        );
        assert_eq!(
            parse_key_value("url=a=b").unwrap(),
            ("url".to_string(), "a=b".to_string())
        );
        assert_eq!(parse_key_value("=").unwrap(), (String::new(), String::new()));
        assert!(parse_key_value("novalue").is_err());
    }

    #[test]
    fn walk_visits_every_node() {
        let mut tree = tree();
        tree.register(&["compute"], Probe(CommandDescriptor::new("list")))
            .unwrap();
        let paths: Vec<String> = tree
            .walk()
            .into_iter()
            .map(|(path, _)| path.join(" "))
            .collect();
        assert_eq!(paths, vec!["compute", "compute list"]);
    }
}
