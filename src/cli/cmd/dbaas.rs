use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::{
    api::{ApiClient, AsyncResult, OperationState, resources::DatabaseService},
    cli::{
        cmd::{plural, quoted},
        error::ExoError,
        framework::{
            App, CliCommand, CommandDescriptor, CommandTree, FlagSpec, Flow, Invocation, Slot,
            aliases, confirmed_targets, default_zone,
        },
    },
    output::{ByteSize, CommandOutput},
};

const LABEL: &str = "Database Service";
const PARENT: &[&str] = &["dbaas"];
const MAINTENANCE_DAYS: &[&str] = &[
    "never",
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

#[derive(Debug, Default, Serialize)]
pub(crate) struct DatabaseServiceListItem {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    plan: String,
    zone: String,
}

pub(crate) struct DatabaseServiceList;

#[async_trait]
impl CliCommand for DatabaseServiceList {
    fn descriptor(&self) -> CommandDescriptor {
        CommandDescriptor::new("list")
            .aliases(aliases::LIST)
            .about("List Database Services")
            .zone_flag("Database Service zone")
            .output::<DatabaseServiceListItem>()
    }

    async fn run(&self, inv: &Invocation, app: &App) -> Result<Option<CommandOutput>, ExoError> {
        let client = app.client(&inv.zone()?)?;
        let items: Vec<DatabaseServiceListItem> = client
            .list_database_services()
            .await?
            .into_iter()
            .map(|service| DatabaseServiceListItem {
                name: service.name,
                kind: service.kind,
                plan: service.plan,
                zone: client.zone().to_string(),
            })
            .collect();

        Ok(Some(CommandOutput::list(&items)?))
    }
}

#[derive(Debug, Default, Serialize)]
pub(crate) struct DatabaseServiceShowOutput {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    plan: String,
    state: String,
    node_count: u64,
    disk_size: ByteSize,
    termination_protection: bool,
    maintenance_dow: Option<String>,
    maintenance_time: Option<String>,
    creation_date: Option<DateTime<Utc>>,
    zone: String,
}

impl DatabaseServiceShowOutput {
    fn new(client: &ApiClient, service: DatabaseService) -> Self {
        let (dow, time) = service
            .maintenance
            .map_or((None, None), |m| (Some(m.dow), Some(m.time)));

        Self {
            name: service.name,
            kind: service.kind,
            plan: service.plan,
            state: service.state,
            node_count: service.node_count.unwrap_or_default(),
            disk_size: ByteSize(service.disk_size.unwrap_or_default()),
            termination_protection: service.termination_protection.unwrap_or_default(),
            maintenance_dow: dow,
            maintenance_time: time,
            creation_date: service.created_at,
            zone: client.zone().to_string(),
        }
    }
}

pub(crate) struct DatabaseServiceShow;

#[async_trait]
impl CliCommand for DatabaseServiceShow {
    fn descriptor(&self) -> CommandDescriptor {
        CommandDescriptor::new("show")
            .aliases(aliases::SHOW)
            .about("Show a Database Service details")
            .slot(Slot::fixed("NAME", "Database Service name"))
            .zone_flag("Database Service zone")
            .output::<DatabaseServiceShowOutput>()
    }

    async fn run(&self, inv: &Invocation, app: &App) -> Result<Option<CommandOutput>, ExoError> {
        let client = app.client(&inv.zone()?)?;
        let service = client
            .get_database_service(&inv.required_arg("NAME")?)
            .await?;

        let output = DatabaseServiceShowOutput::new(&client, service);
        Ok(Some(CommandOutput::record(LABEL, &output)?))
    }
}

pub(crate) struct DatabaseServiceUpdate;

impl DatabaseServiceUpdate {
    fn body(inv: &Invocation) -> Result<Map<String, Value>, ExoError> {
        let mut body = Map::new();
        if inv.changed("plan") {
            body.insert("plan".into(), json!(inv.string("plan")?));
        }
        if inv.changed("termination-protection") {
            body.insert(
                "termination-protection".into(),
                json!(inv.bool("termination-protection")?),
            );
        }
        if inv.changed("maintenance-dow") {
            body.insert(
                "maintenance".into(),
                json!({
                    "dow": inv.string("maintenance-dow")?,
                    "time": inv.string("maintenance-time")?,
                }),
            );
        }

        Ok(body)
    }
}

#[async_trait]
impl CliCommand for DatabaseServiceUpdate {
    fn descriptor(&self) -> CommandDescriptor {
        CommandDescriptor::new("update")
            .aliases(aliases::UPDATE)
            .about("Update a Database Service")
            .slot(Slot::fixed("NAME", "Database Service name"))
            .flag(FlagSpec::string("plan").usage("Database Service plan"))
            .flag(
                FlagSpec::bool("termination-protection")
                    .usage("enable Database Service termination protection"),
            )
            .flag(
                FlagSpec::choice("maintenance-dow", MAINTENANCE_DAYS)
                    .usage("automated Database Service maintenance day-of-week"),
            )
            .flag(
                FlagSpec::string("maintenance-time")
                    .usage("automated Database Service maintenance time (format HH:MM:SS)"),
            )
            .zone_flag("Database Service zone")
            .mutating()
            .output::<DatabaseServiceShowOutput>()
    }

    async fn pre_run(&self, inv: &mut Invocation, app: &App) -> Result<Flow, ExoError> {
        inv.both_or_neither("maintenance-dow", "maintenance-time")?;
        default_zone(inv, app);
        Ok(Flow::Continue)
    }

    async fn run(&self, inv: &Invocation, app: &App) -> Result<Option<CommandOutput>, ExoError> {
        let client = app.client(&inv.zone()?)?;
        let service = client
            .get_database_service(&inv.required_arg("NAME")?)
            .await?;

        let body = Self::body(inv)?;
        let name = service.name.clone();
        let pending = if body.is_empty() {
            AsyncResult::Immediate(service)
        } else {
            AsyncResult::Pending(
                client
                    .update_database_service(&service, &Value::Object(body))
                    .await?,
            )
        };

        let message = format!("Updating Database Service {name:?}");
        let updated = {
            let client = client.clone();
            app.driver()
                .drive(&message, async move {
                    let client = &client;
                    pending
                        .settle(client, |_| async move {
                            client.get_database_service(&name).await
                        })
                        .await
                })
                .await?
        };

        let output = DatabaseServiceShowOutput::new(&client, updated);
        Ok(Some(CommandOutput::record(LABEL, &output)?))
    }
}

pub(crate) struct DatabaseServiceDelete;

#[async_trait]
impl CliCommand for DatabaseServiceDelete {
    fn descriptor(&self) -> CommandDescriptor {
        CommandDescriptor::new("delete")
            .aliases(aliases::DELETE)
            .about("Delete Database Services")
            .slot(Slot::targets("NAME", "Database Service name"))
            .zone_flag("Database Service zone")
            .confirmation()
            .mutating()
    }

    async fn run(&self, inv: &Invocation, app: &App) -> Result<Option<CommandOutput>, ExoError> {
        let client = app.client(&inv.zone()?)?;

        let Some(services) = confirmed_targets(
            inv,
            app,
            inv.args("NAME")?,
            |name| {
                let client = client.clone();
                async move { client.get_database_service(&name).await }
            },
            |service: &DatabaseService| {
                format!(
                    "Are you sure you want to delete Database Service {:?}?",
                    service.name
                )
            },
        )
        .await?
        else {
            return Ok(None);
        };

        let names: Vec<String> = services.iter().map(|s| s.name.clone()).collect();
        let tasks: Vec<_> = services
            .into_iter()
            .map(|service| {
                let client = client.clone();
                async move {
                    let operation = client.delete_database_service(&service.name).await?;
                    client.wait_for(operation, OperationState::Success).await?;
                    Ok(())
                }
            })
            .collect();

        let message = format!(
            "Deleting {} {}",
            plural("Database Service", names.len()),
            quoted(&names)
        );
        app.driver().drive_many(&message, tasks).await?;

        Ok(None)
    }
}

pub(crate) fn register(tree: &mut CommandTree) -> Result<(), ExoError> {
    tree.group(
        &[],
        CommandDescriptor::new("dbaas").about("Database as a Service management"),
    )?;

    tree.register(PARENT, DatabaseServiceList)?;
    tree.register(PARENT, DatabaseServiceShow)?;
    tree.register(PARENT, DatabaseServiceUpdate)?;
    tree.register(PARENT, DatabaseServiceDelete)
}
