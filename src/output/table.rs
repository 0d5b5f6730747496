use tabled::{builder::Builder, settings::Style};

use crate::output::{node::Node, units::ByteSize};

const NOT_AVAILABLE: &str = "n/a";

/// A single record as a two-column field/value table.
pub(crate) fn record_table(node: &Node, label: Option<&str>) -> String {
    let mut builder = Builder::default();
    if let Some(label) = label {
        builder.push_record([label.to_uppercase(), String::new()]);
    }
    if let Node::Record(fields) | Node::Map(fields) = node {
        for (name, value) in fields {
            builder.push_record([name.clone(), cell(value)]);
        }
    }

    let mut table = builder.build();
    table.with(Style::rounded());
    table.to_string()
}

/// A list of records, one row each, with `columns` as the header.
pub(crate) fn list_table(items: &[Node], columns: &[String]) -> String {
    let mut builder = Builder::default();
    builder.push_record(columns.iter().cloned());
    for item in items {
        builder.push_record(
            columns
                .iter()
                .map(|column| item.field(column).map(cell).unwrap_or_else(|| NOT_AVAILABLE.into())),
        );
    }

    let mut table = builder.build();
    table.with(Style::rounded());
    table.to_string()
}

fn cell(node: &Node) -> String {
    if node.is_empty() {
        return NOT_AVAILABLE.to_string();
    }

    match node {
        Node::Bytes(n) => ByteSize(*n).to_string(),
        Node::List(items) if items.iter().all(|item| matches!(item, Node::Record(_))) => {
            embedded_list(items)
        }
        Node::List(items) => items.iter().map(cell).collect::<Vec<_>>().join("\n"),
        Node::Record(fields) => embedded_record(fields),
        Node::Map(entries) => {
            let mut lines: Vec<String> = entries
                .iter()
                .map(|(key, value)| format!("{key}:{}", value.plain()))
                .collect();
            lines.sort();
            lines.join("\n")
        }
        other => other.plain(),
    }
}

fn embedded_record(fields: &[(String, Node)]) -> String {
    let mut builder = Builder::default();
    for (name, value) in fields {
        builder.push_record([name.clone(), cell(value)]);
    }

    let mut table = builder.build();
    table.with(Style::blank());
    table.to_string()
}

fn embedded_list(items: &[Node]) -> String {
    let columns = items.first().map(Node::field_names).unwrap_or_default();
    let mut builder = Builder::default();
    builder.push_record(columns.iter().cloned());
    for item in items {
        builder.push_record(
            columns
                .iter()
                .map(|column| item.field(column).map(cell).unwrap_or_else(|| NOT_AVAILABLE.into())),
        );
    }

    let mut table = builder.build();
    table.with(Style::blank());
    table.to_string()
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use serde::Serialize;

    use super::{list_table, record_table};
    use crate::output::{node::Node, units::ByteSize};

    #[derive(Serialize)]
    struct Rule {
        protocol: String,
        port: Option<u16>,
    }

    #[derive(Serialize)]
    struct Group {
        id: String,
        name: String,
        disk: ByteSize,
        rules: Vec<Rule>,
        labels: BTreeMap<String, String>,
        addresses: Vec<String>,
    }

    fn group() -> Group {
        let mut labels = BTreeMap::new();
        labels.insert("team".into(), "infra".into());
        labels.insert("env".into(), "prod".into());

        Group {
            id: "4f1d".into(),
            name: "web".into(),
            disk: ByteSize::from_gib(10),
            rules: vec![Rule {
                protocol: "tcp".into(),
                port: Some(22),
            }],
            labels,
            addresses: vec!["10.0.0.1".into(), "10.0.0.2".into()],
        }
    }

    #[test]
    fn record_table_labels_every_field() {
        let rendered = record_table(&Node::from_value(&group()).unwrap(), Some("security group"));
        for label in ["SECURITY GROUP", "id", "name", "disk", "rules", "labels", "addresses"] {
            assert!(rendered.contains(label), "missing {label} in\n{rendered}");
        }
        assert!(rendered.contains("10 GiB"));
        assert!(rendered.contains("env:prod"));
        assert!(rendered.contains("protocol"));
    }

    #[test]
    fn map_lines_are_sorted() {
        let rendered = record_table(&Node::from_value(&group()).unwrap(), None);
        let env = rendered.find("env:prod").unwrap();
        let team = rendered.find("team:infra").unwrap();
        assert!(env < team);
    }

    #[test]
    fn empty_values_render_as_not_available() {
        #[derive(Serialize)]
        struct Sparse {
            name: String,
            ipv6: Option<String>,
            tags: Vec<String>,
        }

        let rendered = record_table(
            &Node::from_value(&Sparse {
                name: "vm".into(),
                ipv6: None,
                tags: vec![],
            })
            .unwrap(),
            None,
        );
        assert_eq!(rendered.matches("n/a").count(), 2);
    }

    #[test]
    fn list_table_has_one_row_per_record() {
        let items = vec![
            Node::from_value(&group()).unwrap(),
            Node::from_value(&Group {
                name: "db".into(),
                ..group()
            })
            .unwrap(),
        ];
        let columns = vec!["id".to_string(), "name".to_string()];
        let rendered = list_table(&items, &columns);
        assert!(rendered.contains("web"));
        assert!(rendered.contains("db"));
        assert!(rendered.lines().next().unwrap().starts_with('╭'));
    }
}
