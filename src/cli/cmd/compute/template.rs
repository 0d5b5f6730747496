use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    cli::{
        error::ExoError,
        framework::{
            App, CliCommand, CommandDescriptor, CommandTree, FlagSpec, Invocation, Slot, aliases,
        },
    },
    output::{ByteSize, CommandOutput},
};

const PARENT: &[&str] = &["compute", "template"];
const VISIBILITIES: &[&str] = &["public", "private"];

fn visibility_flag() -> FlagSpec {
    FlagSpec::choice("visibility", VISIBILITIES)
        .default_value("public")
        .usage("template visibility")
}

#[derive(Debug, Default, Serialize)]
pub(crate) struct TemplateListItem {
    id: String,
    family: String,
    name: String,
    creation_date: Option<DateTime<Utc>>,
}

pub(crate) struct TemplateList;

#[async_trait]
impl CliCommand for TemplateList {
    fn descriptor(&self) -> CommandDescriptor {
        CommandDescriptor::new("list")
            .aliases(aliases::LIST)
            .about("List Compute instance templates")
            .flag(visibility_flag())
            .flag(FlagSpec::string("family").usage("template OS family to filter results to"))
            .zone_flag("zone to list templates of")
            .output::<TemplateListItem>()
    }

    async fn run(&self, inv: &Invocation, app: &App) -> Result<Option<CommandOutput>, ExoError> {
        let client = app.client(&inv.zone()?)?;
        let visibility = inv.string("visibility")?.unwrap_or_else(|| "public".into());
        let family = inv.string("family")?;

        let mut templates = client.list_templates(&visibility).await?;
        templates.sort_by(|a, b| a.name.cmp(&b.name));

        let items: Vec<TemplateListItem> = templates
            .into_iter()
            .filter(|t| family.is_none() || t.family == family)
            .map(|t| TemplateListItem {
                id: t.id,
                family: t.family.unwrap_or_default(),
                name: t.name,
                creation_date: t.created_at,
            })
            .collect();

        Ok(Some(CommandOutput::list(&items)?))
    }
}

#[derive(Debug, Default, Serialize)]
pub(crate) struct TemplateShowOutput {
    id: String,
    zone: String,
    name: String,
    description: Option<String>,
    family: Option<String>,
    creation_date: Option<DateTime<Utc>>,
    visibility: Option<String>,
    size: ByteSize,
    default_user: Option<String>,
    boot_mode: Option<String>,
}

pub(crate) struct TemplateShow;

#[async_trait]
impl CliCommand for TemplateShow {
    fn descriptor(&self) -> CommandDescriptor {
        CommandDescriptor::new("show")
            .aliases(aliases::SHOW)
            .about("Show a Compute instance template details")
            .slot(Slot::fixed("TEMPLATE", "template NAME|ID"))
            .flag(visibility_flag())
            .zone_flag("template zone")
            .output::<TemplateShowOutput>()
    }

    async fn run(&self, inv: &Invocation, app: &App) -> Result<Option<CommandOutput>, ExoError> {
        let client = app.client(&inv.zone()?)?;
        let visibility = inv.string("visibility")?.unwrap_or_else(|| "public".into());
        let t = client
            .find_template(&inv.required_arg("TEMPLATE")?, &visibility)
            .await?;

        let output = TemplateShowOutput {
            id: t.id,
            zone: client.zone().to_string(),
            name: t.name,
            description: t.description,
            family: t.family,
            creation_date: t.created_at,
            visibility: t.visibility,
            size: ByteSize(t.size.unwrap_or_default()),
            default_user: t.default_user,
            boot_mode: t.boot_mode,
        };

        Ok(Some(CommandOutput::record("Template", &output)?))
    }
}

pub(crate) fn register(tree: &mut CommandTree) -> Result<(), ExoError> {
    tree.group(
        &["compute"],
        CommandDescriptor::new("template").about("Compute instance templates management"),
    )?;

    tree.register(PARENT, TemplateList)?;
    tree.register(PARENT, TemplateShow)
}
