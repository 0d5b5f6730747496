//! Whole command lines run against a mock of the provider API.

use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::get,
};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::sync::Mutex;

use crate::{
    account::resolve::EnvLookup,
    api::test::serve,
    cancel::CancelToken,
    cli::{Cli, framework::Context},
    console::testing::captured,
};

const UBUNTU: &str = "Linux Ubuntu 22.04 LTS 64-bit";

#[derive(Default)]
struct Mock {
    instances: Vec<Value>,
    created: Vec<String>,
    deleted: Vec<String>,
    /// Operation ID to (referenced resource, times polled).
    operations: HashMap<String, (String, u32)>,
    requests: usize,
}

impl Mock {
    fn operation(&mut self, reference: &str) -> Value {
        let id = format!("op-{}", self.operations.len() + 1);
        self.operations.insert(id.clone(), (reference.to_string(), 0));
        json!({ "id": id, "state": "pending", "reference": { "id": reference } })
    }
}

type Shared = Arc<Mutex<Mock>>;

async fn count_requests(State(mock): State<Shared>, request: Request, next: Next) -> Response {
    mock.lock().await.requests += 1;
    next.run(request).await
}

fn instance_id(n: usize) -> String {
    format!("6a1f0c4e-0000-4000-8000-{n:012}")
}

async fn zones() -> Json<Value> {
    Json(json!({ "zones": [
        { "name": "ch-gva-2", "api-endpoint": "https://api-ch-gva-2.exoscale.com/v2" },
        { "name": "de-fra-1", "api-endpoint": "https://api-de-fra-1.exoscale.com/v2" },
    ]}))
}

async fn instance_types() -> Json<Value> {
    Json(json!({ "instance-types": [
        { "id": "b6e9d1e8-89fc-4db3-aaa4-9b4c5b1d0844", "family": "standard", "size": "small" },
        { "id": "21624abb-764e-4def-81d7-9fc54b5957fb", "family": "standard", "size": "medium" },
    ]}))
}

async fn templates() -> Json<Value> {
    Json(json!({ "templates": [
        { "id": "3c1a6a36-7b66-4bf3-a8b0-1e2ab6b2a4a1", "name": UBUNTU, "family": "ubuntu" },
    ]}))
}

async fn list_instances(State(mock): State<Shared>) -> Json<Value> {
    Json(json!({ "instances": mock.lock().await.instances }))
}

async fn create_instance(State(mock): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    let mut mock = mock.lock().await;
    let name = body["name"].as_str().unwrap_or_default().to_string();
    let id = instance_id(mock.instances.len() + 1);
    mock.instances
        .push(json!({ "id": id, "name": name, "state": "running", "disk-size": body["disk-size"] }));
    mock.created.push(name);
    Json(mock.operation(&id))
}

async fn get_instance(
    State(mock): State<Shared>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    mock.lock()
        .await
        .instances
        .iter()
        .find(|instance| instance["id"] == id.as_str())
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn delete_instance(State(mock): State<Shared>, Path(id): Path<String>) -> Json<Value> {
    let mut mock = mock.lock().await;
    mock.instances.retain(|instance| instance["id"] != id.as_str());
    mock.deleted.push(id.clone());
    Json(mock.operation(&id))
}

/// Each operation reports `running` on its first poll and `success` after that.
async fn operation(
    State(mock): State<Shared>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let mut mock = mock.lock().await;
    let (reference, polls) = mock.operations.get_mut(&id).ok_or(StatusCode::NOT_FOUND)?;
    *polls += 1;
    let state = if *polls > 1 { "success" } else { "running" };

    Ok(Json(json!({ "id": id, "state": state, "reference": { "id": reference } })))
}

struct Harness {
    mock: Shared,
    endpoint: String,
    config: TempDir,
}

struct Outcome {
    code: u8,
    stdout: String,
    stderr: String,
}

impl Harness {
    async fn start(instances: &[&str]) -> Self {
        let mock = Shared::default();
        {
            let mut state = mock.lock().await;
            for (n, name) in instances.iter().enumerate() {
                let id = instance_id(100 + n);
                state
                    .instances
                    .push(json!({ "id": id, "name": name, "state": "running" }));
            }
        }

        let router = Router::new()
            .route("/zone", get(zones))
            .route("/instance-type", get(instance_types))
            .route("/template", get(templates))
            .route("/instance", get(list_instances).post(create_instance))
            .route("/instance/:id", get(get_instance).delete(delete_instance))
            .route("/operation/:id", get(operation))
            .layer(middleware::from_fn_with_state(
                Arc::clone(&mock),
                count_requests,
            ))
            .with_state(Arc::clone(&mock));

        Self {
            mock,
            endpoint: serve(router).await,
            config: tempfile::tempdir().unwrap(),
        }
    }

    fn env(&self) -> EnvLookup {
        let vars: HashMap<&'static str, String> = HashMap::from([
            ("EXOSCALE_API_KEY", "EXOe2e".to_string()),
            ("EXOSCALE_API_SECRET", "e2e-secret".to_string()),
            ("EXOSCALE_API_ENDPOINT", self.endpoint.clone()),
        ]);
        Arc::new(move |name| vars.get(name).cloned())
    }

    fn config_path(&self) -> String {
        self.config.path().join("exoscale.toml").display().to_string()
    }

    async fn run(&self, args: &[&str], stdin: &str, interactive: bool) -> Outcome {
        let (console, stdout, stderr) = captured(stdin, interactive);
        let config = self.config_path();
        let argv = ["exo", "--config", config.as_str()]
            .into_iter()
            .chain(args.iter().copied());

        let code = match Cli::parse_from(argv, &console) {
            Ok(cli) => {
                let context = Context {
                    console,
                    env: self.env(),
                    cancel: CancelToken::new(),
                    poll_interval: Duration::from_millis(10),
                };
                cli.execute(context).await
            }
            Err(code) => code,
        };

        Outcome {
            code,
            stdout: stdout.contents(),
            stderr: stderr.contents(),
        }
    }
}

#[tokio::test]
async fn create_two_instances_concurrently() {
    let harness = Harness::start(&[]).await;
    let outcome = harness
        .run(
            &[
                "compute",
                "instance",
                "create",
                "a",
                "b",
                "--zone",
                "z1",
                "--instance-type",
                "standard.small",
                "--template",
                UBUNTU,
            ],
            "",
            false,
        )
        .await;

    assert_eq!(outcome.code, 0, "{}", outcome.stderr);
    let mut created = harness.mock.lock().await.created.clone();
    created.sort();
    assert_eq!(created, ["a", "b"]);
    assert_eq!(outcome.stdout.matches("COMPUTE INSTANCE").count(), 2);
}

#[tokio::test]
async fn declined_delete_changes_nothing() {
    let harness = Harness::start(&["foo"]).await;
    let outcome = harness
        .run(&["compute", "instance", "delete", "foo"], "n\n", true)
        .await;

    assert_eq!(outcome.code, 0, "{}", outcome.stderr);
    assert!(outcome.stdout.is_empty());
    assert!(outcome.stderr.contains("[yN]"));
    assert!(harness.mock.lock().await.deleted.is_empty());
}

#[tokio::test]
async fn forced_delete_polls_until_success() {
    let harness = Harness::start(&["foo"]).await;
    let outcome = harness
        .run(&["compute", "instance", "delete", "foo", "--force"], "", false)
        .await;

    assert_eq!(outcome.code, 0, "{}", outcome.stderr);
    let mock = harness.mock.lock().await;
    assert_eq!(mock.deleted, [instance_id(100)]);
    let (reference, polls) = &mock.operations["op-1"];
    assert_eq!(reference, &instance_id(100));
    assert_eq!(*polls, 2);
}

#[tokio::test]
async fn forced_delete_skips_missing_targets() {
    let harness = Harness::start(&["foo"]).await;
    let outcome = harness
        .run(&["compute", "instance", "rm", "ghost", "foo", "-f"], "", false)
        .await;

    assert_eq!(outcome.code, 0, "{}", outcome.stderr);
    assert!(outcome.stderr.contains("\"ghost\" not found"));
    assert_eq!(harness.mock.lock().await.deleted, [instance_id(100)]);
}

#[tokio::test]
async fn output_format_flag_selects_json() {
    let harness = Harness::start(&[]).await;
    let outcome = harness
        .run(&["compute", "zone", "list", "-O", "json"], "", false)
        .await;

    assert_eq!(outcome.code, 0, "{}", outcome.stderr);
    let zones: Vec<serde_json::Map<String, Value>> = serde_json::from_str(&outcome.stdout).unwrap();
    assert_eq!(zones.len(), 2);
    for zone in zones {
        let keys: Vec<&str> = zone.keys().map(String::as_str).collect();
        assert_eq!(keys, ["name", "api_endpoint", "sos_endpoint"]);
    }
}

#[tokio::test]
async fn template_prints_only_the_field() {
    let harness = Harness::start(&["my-vm", "other-vm"]).await;
    let outcome = harness
        .run(
            &["compute", "instance", "show", "--output-template", "{{.name}}", "my-vm"],
            "",
            false,
        )
        .await;

    assert_eq!(outcome.code, 0, "{}", outcome.stderr);
    assert_eq!(outcome.stdout, "my-vm\n");
}

#[tokio::test]
async fn environment_credentials_win_over_the_file() {
    let harness = Harness::start(&[]).await;
    // Not even valid TOML: reading it would fail the command.
    std::fs::write(
        harness.config_path(),
        "default_account = \"other\"\n[[accounts]\nname = \"other\"",
    )
    .unwrap();

    let outcome = harness
        .run(&["-P", "other", "config", "show", "-O", "json"], "", false)
        .await;

    assert_eq!(outcome.code, 0, "{}", outcome.stderr);
    let shown: Value = serde_json::from_str(&outcome.stdout).unwrap();
    assert_eq!(shown["name"], "<environment variables>");
    assert_eq!(shown["endpoint"], harness.endpoint.as_str());

    let outcome = harness.run(&["zone", "list"], "", false).await;
    assert_eq!(outcome.code, 0, "{}", outcome.stderr);
    assert!(outcome.stdout.contains("de-fra-1"));
}

#[tokio::test]
async fn quiet_mode_hides_mutating_output() {
    let harness = Harness::start(&[]).await;
    let outcome = harness
        .run(
            &["-Q", "compute", "instance", "create", "c", "--template", UBUNTU],
            "",
            false,
        )
        .await;

    assert_eq!(outcome.code, 0, "{}", outcome.stderr);
    assert!(outcome.stdout.is_empty());
    assert_eq!(harness.mock.lock().await.created, ["c"]);
}

#[tokio::test]
async fn half_a_flag_pair_is_a_usage_error() {
    let harness = Harness::start(&[]).await;
    let outcome = harness
        .run(&["dbaas", "update", "db", "--maintenance-dow", "monday"], "", false)
        .await;

    assert_eq!(outcome.code, 2);
    assert!(outcome.stderr.contains("must be specified together"));
    assert!(outcome.stderr.contains("Usage:"));
}

#[tokio::test]
async fn unknown_commands_exit_with_usage_code() {
    let harness = Harness::start(&[]).await;
    let outcome = harness.run(&["compute", "frobnicate"], "", false).await;

    assert_eq!(outcome.code, 2);
    assert!(outcome.stdout.is_empty());
}

#[tokio::test]
async fn malformed_flag_values_fail_before_any_request() {
    let harness = Harness::start(&[]).await;
    let cases: [&[&str]; 3] = [
        &["compute", "instance", "create", "x", "--template", UBUNTU, "--label", "novalue"],
        &["compute", "private-network", "create", "net", "--start-ip", "nope"],
        &["compute", "instance", "update", "x", "--label", "a=1", "--label", "=2"],
    ];

    for args in cases {
        let outcome = harness.run(args, "", false).await;
        assert_eq!(outcome.code, 2, "{args:?}: {}", outcome.stderr);
        assert!(outcome.stderr.contains("invalid value"), "{args:?}: {}", outcome.stderr);
    }

    let mock = harness.mock.lock().await;
    assert_eq!(mock.requests, 0);
    assert!(mock.created.is_empty());
}

#[tokio::test]
async fn well_formed_requests_reach_the_api() {
    let harness = Harness::start(&["foo"]).await;
    let outcome = harness.run(&["compute", "instance", "list"], "", false).await;

    assert_eq!(outcome.code, 0, "{}", outcome.stderr);
    assert!(harness.mock.lock().await.requests > 0);
}
