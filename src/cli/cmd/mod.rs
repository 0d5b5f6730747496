mod completion;
mod compute;
mod config;
mod dbaas;
mod output;
mod version;
mod zone;

use crate::cli::{
    GlobalArgs,
    error::ExoError,
    framework::{CommandDescriptor, CommandTree},
};

/// Builds the full command tree. Any descriptor that fails validation is a bug.
pub(crate) fn command_tree() -> Result<CommandTree, ExoError> {
    use clap::Args;

    let globals = GlobalArgs::augment_args(clap::Command::new("exo"));
    let root = CommandDescriptor::new("exo").about("Manage your Exoscale infrastructure easily");
    let mut tree = CommandTree::new(root, &globals);

    config::register(&mut tree)?;
    zone::register(&mut tree, &[])?;
    compute::register(&mut tree)?;
    dbaas::register(&mut tree)?;
    tree.register(&[], output::OutputHelp)?;
    tree.register(&[], version::Version)?;
    tree.register(&[], completion::Completion)?;

    Ok(tree)
}

/// Quotes and joins names for progress messages, e.g. `"a", "b"`.
pub(crate) fn quoted(names: &[String]) -> String {
    names
        .iter()
        .map(|name| format!("{name:?}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `resource` or `resources` depending on `count`.
pub(crate) fn plural(resource: &str, count: usize) -> String {
    if count == 1 {
        resource.to_string()
    } else {
        format!("{resource}s")
    }
}
