pub(crate) mod node;
pub(crate) mod table;
pub(crate) mod text;
pub(crate) mod units;

use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::cli::error::ExoError;

pub(crate) use node::{Node, field_names_of};
pub(crate) use units::ByteSize;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub(crate) enum OutputFormat {
    #[default]
    Table,
    Json,
    Text,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OutputFormat::Table => "table",
            OutputFormat::Json => "json",
            OutputFormat::Text => "text",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Shape {
    /// One record, shown as a field/value table.
    Record,
    /// Several records shown one after another, e.g. one per created resource.
    Records,
    /// A homogeneous list shown as a single multi-row table.
    List,
}

/// The result of a run body, already lowered for rendering.
#[derive(Debug, Clone)]
pub(crate) struct CommandOutput {
    shape: Shape,
    node: Node,
    columns: Vec<String>,
    label: Option<&'static str>,
}

impl CommandOutput {
    pub(crate) fn record<T: Serialize>(label: &'static str, value: &T) -> Result<Self, ExoError> {
        let node = Node::from_value(value)?;
        Ok(Self {
            shape: Shape::Record,
            columns: node.field_names(),
            node,
            label: Some(label),
        })
    }

    pub(crate) fn records<T: Serialize + Default>(
        label: &'static str,
        values: &[T],
    ) -> Result<Self, ExoError> {
        Ok(Self {
            shape: Shape::Records,
            node: Node::from_value(values)?,
            columns: field_names_of::<T>()?,
            label: Some(label),
        })
    }

    pub(crate) fn list<T: Serialize + Default>(items: &[T]) -> Result<Self, ExoError> {
        Ok(Self {
            shape: Shape::List,
            node: Node::from_value(items)?,
            columns: field_names_of::<T>()?,
            label: None,
        })
    }

    pub(crate) fn columns(&self) -> &[String] {
        &self.columns
    }

    fn items(&self) -> Vec<&Node> {
        match (&self.shape, &self.node) {
            (Shape::Record, node) => vec![node],
            (_, Node::List(items)) => items.iter().collect(),
            (_, node) => vec![node],
        }
    }
}

/// Picks a format and writes command results to standard output.
#[derive(Debug, Clone, Default)]
pub(crate) struct Renderer {
    format: OutputFormat,
    template: Option<String>,
}

impl Renderer {
    /// A template always selects text output.
    pub(crate) fn new(format: OutputFormat, template: Option<String>) -> Self {
        let template = template.filter(|t| !t.is_empty());
        let format = if template.is_some() {
            OutputFormat::Text
        } else {
            format
        };

        Self { format, template }
    }

    pub(crate) fn format(&self) -> OutputFormat {
        self.format
    }

    pub(crate) fn render_to_string(&self, output: &CommandOutput) -> Result<String, ExoError> {
        match self.format {
            OutputFormat::Json => render_json(output),
            OutputFormat::Table => Ok(render_table(output)),
            OutputFormat::Text => match &self.template {
                Some(template) => text::render_template(&output.items(), template),
                None => Ok(text::render_plain(&output.items(), &output.columns)),
            },
        }
    }

    #[tracing::instrument(skip_all, fields(format = %self.format))]
    pub(crate) fn render(&self, output: &CommandOutput, out: &mut dyn Write) -> Result<(), ExoError> {
        let rendered = self.render_to_string(output)?;
        out.write_all(rendered.as_bytes())?;
        out.flush()?;

        Ok(())
    }
}

fn render_json(output: &CommandOutput) -> Result<String, ExoError> {
    // The shape is fixed by the command, never by how many results came back.
    let mut rendered = serde_json::to_string_pretty(&output.node.to_json())?;
    rendered.push('\n');
    Ok(rendered)
}

fn render_table(output: &CommandOutput) -> String {
    match output.shape {
        Shape::List => {
            let items: Vec<Node> = output.items().into_iter().cloned().collect();
            table::list_table(&items, &output.columns)
        }
        Shape::Record | Shape::Records => output
            .items()
            .into_iter()
            .map(|item| table::record_table(item, output.label) + "\n")
            .collect(),
    }
}

/// The help line advertising which template paths a command's output exposes.
pub(crate) fn template_annotations(columns: &[String]) -> String {
    let annotations = columns
        .iter()
        .map(|column| format!(".{column}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("Supported output template annotations: {annotations}")
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Serialize};

    use super::{CommandOutput, OutputFormat, Renderer, template_annotations};
    use crate::output::ByteSize;

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Snapshot {
        id: String,
        name: String,
        size: ByteSize,
        created_at: String,
        labels: BTreeMap<String, String>,
    }

    fn snapshot(name: &str) -> Snapshot {
        let mut labels = BTreeMap::new();
        labels.insert("tier".into(), "gold".into());
        Snapshot {
            id: format!("id-{name}"),
            name: name.into(),
            size: ByteSize::from_gib(20),
            created_at: "2026-10-16T08:00:00Z".into(),
            labels,
        }
    }

    fn render(renderer: &Renderer, output: &CommandOutput) -> String {
        renderer.render_to_string(output).unwrap()
    }

    #[test]
    fn json_round_trips() {
        let value = snapshot("backup");
        let output = CommandOutput::record("snapshot", &value).unwrap();
        let rendered = render(&Renderer::new(OutputFormat::Json, None), &output);

        assert!(rendered.ends_with("}\n"));
        assert!(rendered.contains("\n  \"id\""));
        let parsed: Snapshot = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed, value);
    }

    #[test]
    fn json_list_round_trips() {
        let values = vec![snapshot("a"), snapshot("b")];
        let output = CommandOutput::list(&values).unwrap();
        let rendered = render(&Renderer::new(OutputFormat::Json, None), &output);
        let parsed: Vec<Snapshot> = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed, values);
    }

    #[test]
    fn single_record_of_many_is_still_an_array() {
        let output = CommandOutput::records("snapshot", &[snapshot("a")]).unwrap();
        let rendered = render(&Renderer::new(OutputFormat::Json, None), &output);
        assert!(rendered.starts_with('['));
        let parsed: Vec<Snapshot> = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed, vec![snapshot("a")]);

        let output = CommandOutput::records("snapshot", &[snapshot("a"), snapshot("b")]).unwrap();
        let rendered = render(&Renderer::new(OutputFormat::Json, None), &output);
        let parsed: Vec<Snapshot> = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn empty_json_list_is_an_array() {
        let output = CommandOutput::list::<Snapshot>(&[]).unwrap();
        let rendered = render(&Renderer::new(OutputFormat::Json, None), &output);
        assert_eq!(rendered, "[]\n");
    }

    #[test]
    fn table_mentions_every_output_name() {
        let output = CommandOutput::record("snapshot", &snapshot("backup")).unwrap();
        let rendered = render(&Renderer::new(OutputFormat::Table, None), &output);
        for name in output.columns() {
            assert!(rendered.contains(name.as_str()), "missing {name}");
        }

        let output = CommandOutput::list(&[snapshot("a")]).unwrap();
        let rendered = render(&Renderer::new(OutputFormat::Table, None), &output);
        for name in output.columns() {
            assert!(rendered.contains(name.as_str()), "missing {name}");
        }
    }

    #[test]
    fn empty_list_table_still_has_headers() {
        let output = CommandOutput::list::<Snapshot>(&[]).unwrap();
        let rendered = render(&Renderer::new(OutputFormat::Table, None), &output);
        assert!(rendered.contains("created_at"));
    }

    #[test]
    fn several_records_render_several_tables() {
        let output = CommandOutput::records("snapshot", &[snapshot("a"), snapshot("b")]).unwrap();
        let rendered = render(&Renderer::new(OutputFormat::Table, None), &output);
        assert_eq!(rendered.matches("SNAPSHOT").count(), 2);
    }

    #[test]
    fn template_field_equals_its_string_form() {
        let value = snapshot("backup");
        let output = CommandOutput::record("snapshot", &value).unwrap();

        let renderer = Renderer::new(OutputFormat::Table, Some("{{.name}}".into()));
        assert_eq!(renderer.format(), OutputFormat::Text);
        assert_eq!(render(&renderer, &output), "backup\n");

        let renderer = Renderer::new(OutputFormat::Text, Some("{{.size}}".into()));
        assert_eq!(render(&renderer, &output), format!("{}\n", value.size.0));
    }

    #[test]
    fn default_text_is_tab_separated() {
        let output = CommandOutput::list(&[snapshot("a")]).unwrap();
        let rendered = render(&Renderer::new(OutputFormat::Text, None), &output);
        assert_eq!(
            rendered,
            format!("id-a\ta\t{}\t2026-10-16T08:00:00Z\ttier:gold\n", 20u64 << 30)
        );
    }

    #[test]
    fn annotations_list_dotted_paths() {
        let columns = vec!["id".to_string(), "name".to_string()];
        assert_eq!(
            template_annotations(&columns),
            "Supported output template annotations: .id, .name"
        );
    }
}
