//! End-to-end tests for the HTTP server.
//!
//! Each test starts a real server on a free port with storage in a temp
//! directory and the completion/code-generation services replaced by
//! `wiremock` servers.

use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use component_harness::config::Config;
use component_harness::server::{run_server_with_extensions, ServerExtensions};
use component_harness_core::loader::{Unit, UnitModule, UnitRegistry};

const KEY_ENV: &str = "CHX_SERVER_TEST_KEY";

const ANALYSIS: &str = r#"Here is my analysis:
{
  "intent": "Weather Dashboard!!",
  "displayType": "card",
  "dataStructure": { "type": "object" }, // shape of the payload
  "instructions": "Show temperature and condition",
  "response": "It is mild in Oslo today.",
}"#;

const GENERATED: &str = "Sure, here is the component.\n\n```tsx\nimport React from 'react'\n\nexport default function WeatherCard({ data }) {\n  return (\n    <div className=\"p-4\">\n      <h2>{data?.location}</h2>\n      <p>{data?.temperature}</p>\n    </div>\n  )\n```\n\nLet me know if you want changes.";

fn chat_reply(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{ "message": { "role": "assistant", "content": content } }]
    }))
}

async fn provider_replying(content: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(chat_reply(content))
        .mount(&server)
        .await;
    server
}

fn test_config(tmp: &TempDir, port: u16, completion: &str, codegen: &str, key_env: &str) -> Config {
    let root = tmp.path().display();
    let content = format!(
        r#"
[storage]
generated_dir = "{root}/generated"
library_dir = "{root}/library"

[server]
bind = "127.0.0.1:{port}"

[providers.completion]
base_url = "{completion}"
model = "test-model"
api_key_env = "{key_env}"
max_retries = 0

[providers.codegen]
base_url = "{codegen}"
model = "v0-1.0-md"
api_key_env = "{key_env}"
max_retries = 0

[providers.sample_data]
enabled = false
base_url = ""
model = ""
api_key_env = ""
"#
    );
    toml::from_str(&content).unwrap()
}

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

async fn start(cfg: Config, extensions: ServerExtensions) -> (tokio::task::JoinHandle<()>, String) {
    let port = cfg
        .server
        .bind
        .rsplit(':')
        .next()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap();
    let handle = tokio::spawn(async move {
        run_server_with_extensions(&cfg, extensions).await.ok();
    });
    wait_for_server(port).await;
    (handle, format!("http://127.0.0.1:{}", port))
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_generate_render_and_library_flow() {
    std::env::set_var(KEY_ENV, "test-key");
    let completion = provider_replying(ANALYSIS).await;
    let codegen = provider_replying(GENERATED).await;
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, find_free_port(), &completion.uri(), &codegen.uri(), KEY_ENV);
    let (server, base) = start(cfg, ServerExtensions::default()).await;
    let client = reqwest::Client::new();

    // Health
    let body: Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");

    // Generate and save
    let resp = client
        .post(format!("{}/api/generate", base))
        .json(&json!({ "messages": [{ "role": "user", "content": "Weather in Oslo?" }] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let turn: Value = resp.json().await.unwrap();
    assert_eq!(turn["responseText"], "It is mild in Oslo today.");
    assert_eq!(turn["unitName"], "WeatherCard");
    assert_eq!(turn["origin"], "generated");
    assert_eq!(turn["analysis"]["displayType"], "card");
    let filename = turn["unitFilename"].as_str().unwrap().to_string();
    assert!(filename.starts_with("weather_dashboard_"), "got {}", filename);
    assert!(filename.ends_with(".tsx"));
    let id = turn["unitId"].as_str().unwrap();
    assert_eq!(filename, format!("weather_dashboard_{}.tsx", id));
    assert!(turn["createdAt"].is_string());
    assert!(tmp.path().join("generated").join(&filename).is_file());

    // Listing and existence
    let body: Value = client
        .get(format!("{}/api/units", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["units"], json!([filename]));

    let body: Value = client
        .get(format!("{}/api/units/{}/exists", base, filename))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["exists"], true);

    let body: Value = client
        .get(format!("{}/api/units/nope.tsx/exists", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["exists"], false);

    // Source, with the narration and fences stripped
    let body: Value = client
        .get(format!("{}/api/units/{}", base, filename))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let source = body["sourceText"].as_str().unwrap();
    assert!(source.starts_with("import React from 'react'"));
    assert!(!source.contains("```"));
    assert!(!source.contains("Let me know"));

    let resp = client
        .get(format!("{}/api/units/missing.tsx", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");

    let resp = client
        .get(format!("{}/api/units/.hidden.tsx", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Render through the sandbox rung
    let body: Value = client
        .post(format!("{}/api/units/{}/render", base, filename))
        .json(&json!({ "data": { "location": "Oslo", "temperature": 21 } }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["strategy"], "sandbox");
    assert_eq!(body["unit"], filename.as_str());
    assert_eq!(body["unitName"], "WeatherCard");
    assert!(body["html"].as_str().unwrap().contains("<iframe"));

    // Missing units still render, as a labeled error panel
    let resp = client
        .post(format!("{}/api/units/missing.tsx/render", base))
        .json(&json!({ "data": { "temperature": 3, "humidity": 80 } }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["strategy"], "error-panel");

    let page = client
        .get(format!("{}/units/{}", base, filename))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(page.starts_with("<!DOCTYPE html>"));

    // Promote twice into the same category
    let promote = |name: &str, auto: bool| {
        json!({ "filename": filename, "unitName": name, "autoExtract": auto })
    };
    let first: Value = client
        .post(format!("{}/api/library", base))
        .json(&promote("Card", false))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(first["success"], true);
    assert_eq!(first["finalName"], "Card");
    assert_eq!(first["nameModified"], false);
    assert_eq!(first["record"]["category"], "general");

    let second: Value = client
        .post(format!("{}/api/library", base))
        .json(&promote("Card", false))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(second["finalName"], "Card_1");
    assert_eq!(second["nameModified"], true);
    assert!(tmp.path().join("library/general/Card_1.tsx").is_file());

    // Auto-extracted metadata
    let auto: Value = client
        .post(format!("{}/api/library", base))
        .json(&promote("WeatherCard", true))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(auto["record"]["description"], "A weather card component");
    assert_eq!(auto["record"]["category"], "ui");
    assert!(auto["record"]["tags"]
        .as_array()
        .unwrap()
        .contains(&json!("weathercard")));

    let resp = client
        .post(format!("{}/api/library", base))
        .json(&json!({ "filename": "missing.tsx", "unitName": "X" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    // List and delete
    let body: Value = client
        .get(format!("{}/api/library", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["records"].as_array().unwrap().len(), 3);
    assert!(tmp.path().join("library/metadata.json").is_file());

    let id = first["record"]["id"].as_str().unwrap();
    let resp = client
        .delete(format!("{}/api/library/{}", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(!tmp.path().join("library/general/Card.tsx").exists());

    let resp = client
        .delete(format!("{}/api/library/{}", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    server.abort();
}

#[tokio::test]
async fn test_codegen_failure_saves_fallback_unit() {
    std::env::set_var(KEY_ENV, "test-key");
    let completion = provider_replying(ANALYSIS).await;
    let codegen = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad model"))
        .expect(1)
        .mount(&codegen)
        .await;

    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, find_free_port(), &completion.uri(), &codegen.uri(), KEY_ENV);
    let (server, base) = start(cfg, ServerExtensions::default()).await;

    let turn: Value = reqwest::Client::new()
        .post(format!("{}/api/generate", base))
        .json(&json!({ "messages": [{ "role": "user", "content": "Weather?" }] }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(turn["origin"], "fallback");
    assert_eq!(turn["unitName"], "WeatherDashboard");
    assert!(turn["fallbackReason"].as_str().unwrap().contains("400"));

    let filename = turn["unitFilename"].as_str().unwrap();
    let saved = std::fs::read_to_string(tmp.path().join("generated").join(filename)).unwrap();
    assert!(saved.contains("export default function WeatherDashboard"));

    server.abort();
}

#[tokio::test]
async fn test_missing_credentials_is_provider_error() {
    let completion = provider_replying(ANALYSIS).await;
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(
        &tmp,
        find_free_port(),
        &completion.uri(),
        &completion.uri(),
        "CHX_SERVER_TEST_KEY_NEVER_SET",
    );
    let (server, base) = start(cfg, ServerExtensions::default()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/generate", base))
        .json(&json!({ "messages": [{ "role": "user", "content": "hi" }] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "provider_error");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("CHX_SERVER_TEST_KEY_NEVER_SET"));

    let resp = client
        .post(format!("{}/api/generate", base))
        .json(&json!({ "messages": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    server.abort();
}

struct StatusUnit;

impl Unit for StatusUnit {
    fn name(&self) -> &str {
        "StatusBadge"
    }

    fn render(&self, data: &Value) -> anyhow::Result<String> {
        Ok(format!(
            "<span class=\"badge\">{}</span>",
            data["status"].as_str().unwrap_or("unknown")
        ))
    }
}

struct PanickingUnit;

impl Unit for PanickingUnit {
    fn name(&self) -> &str {
        "Broken"
    }

    fn render(&self, _data: &Value) -> anyhow::Result<String> {
        panic!("render exploded")
    }
}

#[tokio::test]
async fn test_structured_units_from_extensions() {
    let tmp = TempDir::new().unwrap();
    let unreachable = "http://127.0.0.1:9";
    let cfg = test_config(&tmp, find_free_port(), unreachable, unreachable, KEY_ENV);

    let mut units = UnitRegistry::new();
    units.register(
        "status.tsx",
        UnitModule::new().with_default(Arc::new(StatusUnit)),
    );
    units.register(
        "broken.tsx",
        UnitModule::new().with_default(Arc::new(PanickingUnit)),
    );
    let (server, base) = start(cfg, ServerExtensions { units }).await;
    let client = reqwest::Client::new();

    let body: Value = client
        .post(format!("{}/api/units/status.tsx/render", base))
        .json(&json!({ "data": { "status": "green" } }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["strategy"], "structured");
    assert_eq!(body["unitName"], "StatusBadge");
    assert!(body["html"].as_str().unwrap().contains("green"));

    let body: Value = client
        .post(format!("{}/api/units/broken.tsx/render", base))
        .json(&json!({ "data": { "status": "green" } }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["strategy"], "error-panel");
    assert!(body["html"].as_str().unwrap().contains("render exploded"));

    server.abort();
}

#[tokio::test]
async fn test_render_without_body_shows_no_data() {
    let tmp = TempDir::new().unwrap();
    let unreachable = "http://127.0.0.1:9";
    let mut cfg = test_config(&tmp, find_free_port(), unreachable, unreachable, KEY_ENV);
    cfg.render.sandbox = "disabled".to_string();

    let generated = tmp.path().join("generated");
    std::fs::create_dir_all(&generated).unwrap();
    std::fs::write(
        generated.join("plain_1_abc.tsx"),
        "export default function Plain({ data }) {\n  return <div>{data?.x}</div>\n}",
    )
    .unwrap();

    let (server, base) = start(cfg, ServerExtensions::default()).await;
    let client = reqwest::Client::new();

    // No body, no content type
    let resp = client
        .post(format!("{}/api/units/plain_1_abc.tsx/render", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["strategy"], "no-data");
    assert_eq!(body["unit"], "plain_1_abc.tsx");
    assert_eq!(body["unitName"], "Plain");

    // A body that is not JSON
    let resp = client
        .post(format!("{}/api/units/plain_1_abc.tsx/render", base))
        .header("content-type", "text/plain")
        .body("hello")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["strategy"], "no-data");

    server.abort();
}
