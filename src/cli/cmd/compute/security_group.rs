use std::io::Write;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::{
    api::{
        OperationState,
        resources::{Icmp, SecurityGroup, SecurityGroupRule},
    },
    cli::{
        cmd::{plural, quoted},
        error::ExoError,
        framework::{
            App, CliCommand, CommandDescriptor, CommandTree, FlagSpec, Flow, Invocation, Slot,
            aliases, confirmed_targets,
        },
    },
    output::CommandOutput,
};

const LABEL: &str = "Security Group";
const PARENT: &[&str] = &["compute", "security-group"];
const FLOWS: &[&str] = &["ingress", "egress"];
const PROTOCOLS: &[&str] = &[
    "tcp", "udp", "icmp", "icmpv6", "ah", "esp", "gre", "ipip", "all",
];

/// Security Groups are global; requests go through the profile's default zone.
fn client(app: &App) -> Result<crate::api::ApiClient, ExoError> {
    app.client(app.profile()?.default_zone())
}

#[derive(Debug, Default, Serialize)]
pub(crate) struct SecurityGroupRuleOutput {
    id: String,
    description: Option<String>,
    start_port: Option<u16>,
    end_port: Option<u16>,
    protocol: String,
    network: Option<String>,
    icmp_type: Option<u8>,
    icmp_code: Option<u8>,
}

impl From<SecurityGroupRule> for SecurityGroupRuleOutput {
    fn from(rule: SecurityGroupRule) -> Self {
        let icmp = rule.icmp.unwrap_or_default();
        Self {
            id: rule.id,
            description: rule.description,
            start_port: rule.start_port,
            end_port: rule.end_port,
            protocol: rule.protocol,
            network: rule.network,
            icmp_type: icmp.kind,
            icmp_code: icmp.code,
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub(crate) struct SecurityGroupShowOutput {
    id: String,
    name: String,
    description: Option<String>,
    ingress_rules: Vec<SecurityGroupRuleOutput>,
    egress_rules: Vec<SecurityGroupRuleOutput>,
}

impl From<SecurityGroup> for SecurityGroupShowOutput {
    fn from(group: SecurityGroup) -> Self {
        let (ingress, egress): (Vec<_>, Vec<_>) = group
            .rules
            .into_iter()
            .partition(|rule| rule.flow_direction == "ingress");

        Self {
            id: group.id,
            name: group.name,
            description: group.description,
            ingress_rules: ingress.into_iter().map(Into::into).collect(),
            egress_rules: egress.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub(crate) struct SecurityGroupListItem {
    id: String,
    name: String,
}

pub(crate) struct SecurityGroupList;

#[async_trait]
impl CliCommand for SecurityGroupList {
    fn descriptor(&self) -> CommandDescriptor {
        CommandDescriptor::new("list")
            .aliases(aliases::LIST)
            .about("List Security Groups")
            .output::<SecurityGroupListItem>()
    }

    async fn run(&self, _: &Invocation, app: &App) -> Result<Option<CommandOutput>, ExoError> {
        let items: Vec<SecurityGroupListItem> = client(app)?
            .list_security_groups()
            .await?
            .into_iter()
            .map(|group| SecurityGroupListItem {
                id: group.id,
                name: group.name,
            })
            .collect();

        Ok(Some(CommandOutput::list(&items)?))
    }
}

pub(crate) struct SecurityGroupShow;

#[async_trait]
impl CliCommand for SecurityGroupShow {
    fn descriptor(&self) -> CommandDescriptor {
        CommandDescriptor::new("show")
            .aliases(aliases::SHOW)
            .about("Show a Security Group details")
            .slot(Slot::fixed("SECURITY-GROUP", "Security Group NAME|ID"))
            .output::<SecurityGroupShowOutput>()
    }

    async fn run(&self, inv: &Invocation, app: &App) -> Result<Option<CommandOutput>, ExoError> {
        let group = client(app)?
            .find_security_group(&inv.required_arg("SECURITY-GROUP")?)
            .await?;

        Ok(Some(CommandOutput::record(
            LABEL,
            &SecurityGroupShowOutput::from(group),
        )?))
    }
}

pub(crate) struct SecurityGroupCreate;

#[async_trait]
impl CliCommand for SecurityGroupCreate {
    fn descriptor(&self) -> CommandDescriptor {
        CommandDescriptor::new("create")
            .aliases(aliases::CREATE)
            .about("Create a Security Group")
            .slot(Slot::fixed("NAME", "Security Group name"))
            .flag(FlagSpec::string("description").usage("Security Group description"))
            .mutating()
            .output::<SecurityGroupShowOutput>()
    }

    async fn run(&self, inv: &Invocation, app: &App) -> Result<Option<CommandOutput>, ExoError> {
        let name = inv.required_arg("NAME")?;
        let mut body = json!({ "name": name });
        if let Some(description) = inv.string("description")? {
            body["description"] = json!(description);
        }

        let client = client(app)?;
        let message = format!("Creating Security Group {name:?}");
        let group = app
            .driver()
            .drive(&message, async move {
                let operation = client.create_security_group(&body).await?;
                let done = client.wait_for(operation, OperationState::Success).await?;
                client.get_security_group(done.reference_id()?).await
            })
            .await?;

        Ok(Some(CommandOutput::record(
            LABEL,
            &SecurityGroupShowOutput::from(group),
        )?))
    }
}

pub(crate) struct SecurityGroupDelete;

#[async_trait]
impl CliCommand for SecurityGroupDelete {
    fn descriptor(&self) -> CommandDescriptor {
        CommandDescriptor::new("delete")
            .aliases(aliases::DELETE)
            .about("Delete Security Groups")
            .slot(Slot::targets("SECURITY-GROUP", "Security Group NAME|ID"))
            .confirmation()
            .mutating()
    }

    async fn run(&self, inv: &Invocation, app: &App) -> Result<Option<CommandOutput>, ExoError> {
        let client = client(app)?;

        let Some(groups) = confirmed_targets(
            inv,
            app,
            inv.args("SECURITY-GROUP")?,
            |name| {
                let client = client.clone();
                async move { client.find_security_group(&name).await }
            },
            |group: &SecurityGroup| {
                format!("Are you sure you want to delete Security Group {:?}?", group.name)
            },
        )
        .await?
        else {
            return Ok(None);
        };

        let names: Vec<String> = groups.iter().map(|g| g.name.clone()).collect();
        let tasks: Vec<_> = groups
            .into_iter()
            .map(|group| {
                let client = client.clone();
                async move {
                    let operation = client.delete_security_group(&group.id).await?;
                    client.wait_for(operation, OperationState::Success).await?;
                    Ok(())
                }
            })
            .collect();

        let message = format!(
            "Deleting {} {}",
            plural("Security Group", names.len()),
            quoted(&names)
        );
        app.driver().drive_many(&message, tasks).await?;

        Ok(None)
    }
}

/// Parses `80` or `8000-8080` into an inclusive port range.
fn parse_port_range(value: &str) -> Result<(u16, u16), ExoError> {
    let invalid = || ExoError::usage(format!("invalid port value {value:?}"));
    let port = |s: &str| s.trim().parse::<u16>().ok().filter(|p| *p > 0);

    let (start, end) = match value.split_once('-') {
        Some((start, end)) => (port(start).ok_or_else(invalid)?, port(end).ok_or_else(invalid)?),
        None => {
            let single = port(value).ok_or_else(invalid)?;
            (single, single)
        }
    };

    if start > end {
        return Err(invalid());
    }

    Ok((start, end))
}

pub(crate) struct SecurityGroupRuleAdd;

#[async_trait]
impl CliCommand for SecurityGroupRuleAdd {
    fn descriptor(&self) -> CommandDescriptor {
        CommandDescriptor::new("add")
            .about("Add a Security Group rule")
            .long_about(
                "Adds a rule to a Security Group. The rule source is either a network \
                 (--network) or the members of another Security Group (--security-group).",
            )
            .slot(Slot::fixed("SECURITY-GROUP", "Security Group NAME|ID"))
            .flag(FlagSpec::string("description").usage("rule description"))
            .flag(
                FlagSpec::choice("flow", FLOWS)
                    .default_value("ingress")
                    .usage("rule network flow direction"),
            )
            .flag(
                FlagSpec::choice("protocol", PROTOCOLS)
                    .default_value("tcp")
                    .usage("rule network protocol"),
            )
            .flag(FlagSpec::string("network").usage("rule target network address (in CIDR format)"))
            .flag(FlagSpec::string("security-group").usage("rule target Security Group NAME|ID"))
            .flag(FlagSpec::string("port").usage("rule network port (format: PORT|START-END)"))
            .flag(
                FlagSpec::optional_u8("icmp-type")
                    .hidden()
                    .usage("rule ICMP type"),
            )
            .flag(
                FlagSpec::optional_u8("icmp-code")
                    .hidden()
                    .usage("rule ICMP code"),
            )
            .flag(FlagSpec::bool("help-icmp").usage("show ICMP-specific flags help"))
            .flag(FlagSpec::bool("help-protocols").usage("show supported network protocols"))
            .mutating()
            .output::<SecurityGroupShowOutput>()
    }

    async fn pre_run(&self, inv: &mut Invocation, app: &App) -> Result<Flow, ExoError> {
        if inv.bool("help-icmp")? {
            inv.print_flags_with_prefix(app, "icmp-")?;
            return Ok(Flow::Done);
        }

        if inv.bool("help-protocols")? {
            let mut out = app.console().out();
            for protocol in PROTOCOLS {
                writeln!(out, "{protocol}")?;
            }
            return Ok(Flow::Done);
        }

        if inv.changed("network") && inv.changed("security-group") {
            return Err(ExoError::usage(
                "--network and --security-group cannot be specified together",
            ));
        }

        Ok(Flow::Continue)
    }

    async fn run(&self, inv: &Invocation, app: &App) -> Result<Option<CommandOutput>, ExoError> {
        let client = client(app)?;
        let group = client
            .find_security_group(&inv.required_arg("SECURITY-GROUP")?)
            .await?;

        let protocol = inv.string("protocol")?.unwrap_or_else(|| "tcp".into());
        let mut body = Map::new();
        body.insert(
            "flow-direction".into(),
            json!(inv.string("flow")?.unwrap_or_else(|| "ingress".into())),
        );
        body.insert("protocol".into(), json!(protocol));
        if let Some(description) = inv.string("description")? {
            body.insert("description".into(), json!(description));
        }

        if let Some(network) = inv.string("network")? {
            body.insert("network".into(), json!(network));
        } else if let Some(source) = inv.string("security-group")? {
            let source = client.find_security_group(&source).await?;
            body.insert("security-group".into(), json!({ "id": source.id }));
        }

        if let Some(port) = inv.string("port")? {
            let (start, end) = parse_port_range(&port)?;
            body.insert("start-port".into(), json!(start));
            body.insert("end-port".into(), json!(end));
        }

        if protocol.starts_with("icmp") {
            let icmp = Icmp {
                kind: inv.optional_u8("icmp-type")?,
                code: inv.optional_u8("icmp-code")?,
            };
            body.insert("icmp".into(), serde_json::to_value(icmp)?);
        }

        let message = format!("Adding rule to Security Group {:?}", group.name);
        let updated = app
            .driver()
            .drive(&message, async move {
                let operation = client
                    .add_security_group_rule(&group.id, &Value::Object(body))
                    .await?;
                client.wait_for(operation, OperationState::Success).await?;
                client.get_security_group(&group.id).await
            })
            .await?;

        Ok(Some(CommandOutput::record(
            LABEL,
            &SecurityGroupShowOutput::from(updated),
        )?))
    }
}

pub(crate) fn register(tree: &mut CommandTree) -> Result<(), ExoError> {
    tree.group(
        &["compute"],
        CommandDescriptor::new("security-group")
            .aliases(&["sg"])
            .about("Security Groups management"),
    )?;

    tree.register(PARENT, SecurityGroupList)?;
    tree.register(PARENT, SecurityGroupShow)?;
    tree.register(PARENT, SecurityGroupCreate)?;
    tree.register(PARENT, SecurityGroupDelete)?;

    tree.group(
        PARENT,
        CommandDescriptor::new("rule").about("Security Group rules management"),
    )?;
    tree.register(&["compute", "security-group", "rule"], SecurityGroupRuleAdd)
}

#[cfg(test)]
mod test {
    use super::parse_port_range;
    use crate::api::resources::{SecurityGroup, SecurityGroupRule};

    #[test]
    fn ports_parse_as_single_or_range() {
        assert_eq!(parse_port_range("80").unwrap(), (80, 80));
        assert_eq!(parse_port_range("8000-8080").unwrap(), (8000, 8080));
    }

    #[test]
    fn bad_ports_are_usage_errors() {
        for value in ["", "0", "http", "90-80", "1-99999"] {
            let err = parse_port_range(value).unwrap_err();
            assert_eq!(err.exit_code(), 2, "{value}");
        }
    }

    #[test]
    fn rules_split_by_flow() {
        let rule = |flow: &str| SecurityGroupRule {
            flow_direction: flow.into(),
            protocol: "tcp".into(),
            ..Default::default()
        };
        let group = SecurityGroup {
            id: "sg".into(),
            rules: vec![rule("ingress"), rule("egress"), rule("ingress")],
            ..Default::default()
        };

        let output = super::SecurityGroupShowOutput::from(group);
        assert_eq!(output.ingress_rules.len(), 2);
        assert_eq!(output.egress_rules.len(), 1);
    }
}
