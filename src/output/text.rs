use handlebars::Handlebars;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::{cli::error::ExoError, output::node::Node};

static DOT_THIS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{([ \t]*)\.([ \t]*)\}\}").expect("dot template pattern is valid")
});

static DOT_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{([#/]?[A-Za-z]*[ \t]*)\.([A-Za-z_])").expect("dotted path pattern is valid")
});

/// Accepts `{{.name}}` style paths by rewriting them to plain handlebars paths.
pub(crate) fn normalize_template(template: &str) -> String {
    let template = DOT_THIS.replace_all(template, "{{${1}this${2}}}");
    DOT_PATH.replace_all(&template, "{{${1}${2}").into_owned()
}

/// Renders every record through `template`, one record per line.
pub(crate) fn render_template(records: &[&Node], template: &str) -> Result<String, ExoError> {
    let mut registry = Handlebars::new();
    registry.register_escape_fn(handlebars::no_escape);
    registry
        .register_template_string("output", normalize_template(template))
        .map_err(Box::new)?;

    let mut rendered = String::new();
    for record in records {
        rendered.push_str(&registry.render("output", &record.to_json())?);
        rendered.push('\n');
    }

    Ok(rendered)
}

/// Default text output: field values tab-separated, one record per line.
pub(crate) fn render_plain(records: &[&Node], columns: &[String]) -> String {
    let mut rendered = String::new();
    for record in records {
        let line = columns
            .iter()
            .map(|column| record.field(column).map(Node::plain).unwrap_or_default())
            .collect::<Vec<_>>()
            .join("\t");
        rendered.push_str(&line);
        rendered.push('\n');
    }

    rendered
}

#[cfg(test)]
mod test {
    use serde::Serialize;

    use super::{normalize_template, render_plain, render_template};
    use crate::output::node::Node;

    #[derive(Serialize)]
    struct Vm {
        name: String,
        state: String,
        disk: u64,
    }

    fn vms() -> Vec<Node> {
        [("web", "running"), ("db", "stopped")]
            .into_iter()
            .map(|(name, state)| {
                Node::from_value(&Vm {
                    name: name.into(),
                    state: state.into(),
                    disk: 50,
                })
                .unwrap()
            })
            .collect()
    }

    #[test]
    fn dotted_paths_are_rewritten() {
        assert_eq!(normalize_template("{{.name}}"), "{{name}}");
        assert_eq!(normalize_template("{{ .name }} {{.}}"), "{{ name }} {{this}}");
        assert_eq!(normalize_template("{{#each .labels}}x{{/each}}"), "{{#each labels}}x{{/each}}");
        assert_eq!(normalize_template("{{name}}"), "{{name}}");
    }

    #[test]
    fn template_runs_once_per_record() {
        let nodes = vms();
        let records: Vec<&Node> = nodes.iter().collect();
        let rendered = render_template(&records, "{{.name}} is {{.state}}").unwrap();
        assert_eq!(rendered, "web is running\ndb is stopped\n");
    }

    #[test]
    fn template_does_not_escape_html() {
        let node = Node::from_value(&Vm {
            name: "<a&b>".into(),
            state: String::new(),
            disk: 0,
        })
        .unwrap();
        assert_eq!(render_template(&[&node], "{{.name}}").unwrap(), "<a&b>\n");
    }

    #[test]
    fn plain_text_is_tab_separated() {
        let nodes = vms();
        let records: Vec<&Node> = nodes.iter().collect();
        let columns = vec!["name".to_string(), "state".to_string(), "disk".to_string()];
        assert_eq!(
            render_plain(&records, &columns),
            "web\trunning\t50\ndb\tstopped\t50\n"
        );
    }

    #[test]
    fn malformed_templates_are_errors() {
        let nodes = vms();
        assert!(render_template(&[&nodes[0]], "{{#if}}").is_err());
    }
}
