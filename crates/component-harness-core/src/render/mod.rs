//! Ordered fallback chain producing labeled HTML.
//!
//! [`Renderer::render`] never fails. Structured units are called directly
//! with errors and panics converted into an error panel. Raw source walks
//! the configured rungs until one produces output:
//!
//! | Rung | Produces |
//! |------|----------|
//! | [`Rung::Sandbox`] | sandboxed execution of the source |
//! | [`Rung::Heuristic`] | weather card, field grid, item table or scalar text |
//! | [`Rung::JsonDump`] | pretty-printed payload |
//!
//! A JSON dump (or the no-data placeholder) always closes the chain, even
//! when it is not configured, so output is never blank. Every result is
//! wrapped in a section labeled with the strategy and the unit identifier.

pub mod html;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::LoadError;
use crate::loader::{LoadedUnit, Unit};
use crate::sandbox::{default_allowed_bindings, IsolatedDocumentSandbox, Sandbox, SandboxRequest};

/// Which strategy produced a [`RenderedOutput`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RenderStrategy {
    Structured,
    Sandbox,
    WeatherCard,
    FieldGrid,
    ItemTable,
    Scalar,
    JsonDump,
    NoData,
    ErrorPanel,
}

impl RenderStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderStrategy::Structured => "structured",
            RenderStrategy::Sandbox => "sandbox",
            RenderStrategy::WeatherCard => "weather-card",
            RenderStrategy::FieldGrid => "field-grid",
            RenderStrategy::ItemTable => "item-table",
            RenderStrategy::Scalar => "scalar",
            RenderStrategy::JsonDump => "json-dump",
            RenderStrategy::NoData => "no-data",
            RenderStrategy::ErrorPanel => "error-panel",
        }
    }

    /// True for strategies that did not run the unit's own code.
    pub fn is_fallback(&self) -> bool {
        !matches!(self, RenderStrategy::Structured | RenderStrategy::Sandbox)
    }
}

/// One configurable step of the raw-source chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rung {
    Sandbox,
    Heuristic,
    JsonDump,
}

impl FromStr for Rung {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sandbox" => Ok(Rung::Sandbox),
            "heuristic" => Ok(Rung::Heuristic),
            "json-dump" | "json_dump" | "json" => Ok(Rung::JsonDump),
            other => Err(format!(
                "unknown render rung '{}' (expected sandbox, heuristic or json-dump)",
                other
            )),
        }
    }
}

/// Default raw-source chain.
pub fn default_chain() -> Vec<Rung> {
    vec![Rung::Sandbox, Rung::Heuristic, Rung::JsonDump]
}

/// Output of a render, always non-empty.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedOutput {
    pub strategy: RenderStrategy,
    pub unit: String,
    pub unit_name: Option<String>,
    pub html: String,
    /// Why earlier rungs were skipped, in chain order.
    pub notes: Vec<String>,
}

/// Object keys that suggest a weather payload.
const WEATHER_KEYS: &[&str] = &[
    "temperature",
    "temp",
    "humidity",
    "condition",
    "windSpeed",
    "wind_speed",
    "forecast",
    "precipitation",
    "feelsLike",
];

/// Payloads that carry nothing to show.
pub fn is_empty_payload(data: &Value) -> bool {
    match data {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Weather-shaped: two or more weather keys, or one when the source itself
/// mentions weather.
pub fn looks_like_weather(map: &Map<String, Value>, source: Option<&str>) -> bool {
    let score = WEATHER_KEYS.iter().filter(|k| map.contains_key(**k)).count();
    let mentions = source
        .map(|s| s.to_ascii_lowercase().contains("weather"))
        .unwrap_or(false);
    score >= 2 || (mentions && score >= 1)
}

/// Walks the fallback chain for loaded units.
pub struct Renderer {
    chain: Vec<Rung>,
    sandbox: Box<dyn Sandbox>,
    allowed_bindings: Vec<String>,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new(
            default_chain(),
            Box::new(IsolatedDocumentSandbox),
            default_allowed_bindings(),
        )
    }
}

impl Renderer {
    pub fn new(chain: Vec<Rung>, sandbox: Box<dyn Sandbox>, allowed_bindings: Vec<String>) -> Self {
        Self {
            chain,
            sandbox,
            allowed_bindings,
        }
    }

    pub fn chain(&self) -> &[Rung] {
        &self.chain
    }

    pub fn sandbox_kind(&self) -> &str {
        self.sandbox.kind()
    }

    /// Render a loaded unit against `data`.
    pub fn render(&self, unit: &LoadedUnit, data: &Value) -> RenderedOutput {
        match unit {
            LoadedUnit::Structured { filename, unit } => {
                self.render_structured(filename, unit.as_ref(), data)
            }
            LoadedUnit::RawSource {
                filename,
                unit_name,
                source,
            } => self.render_raw(filename, unit_name.as_deref(), source, data),
        }
    }

    /// Call a structured unit, converting errors and panics into an error
    /// panel followed by a schema-free view of the payload.
    pub fn render_structured(
        &self,
        filename: &str,
        unit: &dyn Unit,
        data: &Value,
    ) -> RenderedOutput {
        let name = unit.name().to_string();
        let outcome = catch_unwind(AssertUnwindSafe(|| unit.render(data)));

        let message = match outcome {
            Ok(Ok(html)) if !html.trim().is_empty() => {
                return self.finish(
                    RenderStrategy::Structured,
                    filename,
                    Some(&name),
                    html,
                    vec![],
                );
            }
            Ok(Ok(_)) => "unit rendered no output".to_string(),
            Ok(Err(e)) => format!("{:#}", e),
            Err(panic) => panic_message(panic.as_ref()),
        };

        warn!(filename, unit = %name, error = %message, "structured unit failed");
        self.error_panel(filename, Some(&name), &message, data, None)
    }

    /// Walk the configured chain for raw source.
    pub fn render_raw(
        &self,
        filename: &str,
        unit_name: Option<&str>,
        source: &str,
        data: &Value,
    ) -> RenderedOutput {
        let mut notes = Vec::new();

        for rung in &self.chain {
            match rung {
                Rung::Sandbox => {
                    let req = SandboxRequest {
                        source,
                        data,
                        allowed_bindings: &self.allowed_bindings,
                    };
                    match self.sandbox.execute(&req) {
                        Ok(html) => {
                            return self.finish(
                                RenderStrategy::Sandbox,
                                filename,
                                unit_name,
                                html,
                                notes,
                            )
                        }
                        Err(e) => {
                            debug!(
                                filename,
                                sandbox = self.sandbox.kind(),
                                error = %e,
                                "sandbox rung skipped"
                            );
                            notes.push(format!("sandbox: {}", e));
                        }
                    }
                }
                Rung::Heuristic => {
                    let (strategy, html) = heuristic_view(data, Some(source));
                    return self.finish(strategy, filename, unit_name, html, notes);
                }
                Rung::JsonDump => {
                    let (strategy, html) = dump_view(data);
                    return self.finish(strategy, filename, unit_name, html, notes);
                }
            }
        }

        notes.push("chain exhausted".to_string());
        let (strategy, html) = dump_view(data);
        self.finish(strategy, filename, unit_name, html, notes)
    }

    /// Error panel for a unit that could not be loaded at all.
    pub fn render_load_failure(
        &self,
        filename: &str,
        error: &LoadError,
        data: &Value,
    ) -> RenderedOutput {
        warn!(filename, error = %error, "unit load failed");
        self.error_panel(filename, None, &error.to_string(), data, None)
    }

    fn error_panel(
        &self,
        filename: &str,
        unit_name: Option<&str>,
        message: &str,
        data: &Value,
        source: Option<&str>,
    ) -> RenderedOutput {
        let mut inner = html::error_message(message);
        if !is_empty_payload(data) {
            let (strategy, view) = heuristic_view(data, source);
            inner.push_str(&html::labeled(strategy.as_str(), "payload", false, &view));
        }
        let mut out = self.finish(RenderStrategy::ErrorPanel, filename, unit_name, inner, vec![]);
        out.notes.push(message.to_string());
        out
    }

    fn finish(
        &self,
        strategy: RenderStrategy,
        filename: &str,
        unit_name: Option<&str>,
        inner: String,
        notes: Vec<String>,
    ) -> RenderedOutput {
        let label = match unit_name {
            Some(name) => format!("{} ({})", name, filename),
            None => filename.to_string(),
        };
        let html = html::labeled(
            strategy.as_str(),
            &label,
            strategy == RenderStrategy::ErrorPanel,
            &inner,
        );
        debug!(filename, strategy = strategy.as_str(), "rendered");
        RenderedOutput {
            strategy,
            unit: filename.to_string(),
            unit_name: unit_name.map(str::to_string),
            html,
            notes,
        }
    }
}

/// Schema-free view of `data`, picked by shape.
fn heuristic_view(data: &Value, source: Option<&str>) -> (RenderStrategy, String) {
    if is_empty_payload(data) {
        return (RenderStrategy::NoData, html::no_data());
    }
    match data {
        Value::Object(map) if looks_like_weather(map, source) => {
            (RenderStrategy::WeatherCard, html::weather_card(map))
        }
        Value::Object(map) => (RenderStrategy::FieldGrid, html::field_grid(map)),
        Value::Array(items) => (RenderStrategy::ItemTable, html::item_table(items)),
        other => (RenderStrategy::Scalar, html::scalar(other)),
    }
}

fn dump_view(data: &Value) -> (RenderStrategy, String) {
    if is_empty_payload(data) {
        (RenderStrategy::NoData, html::no_data())
    } else {
        (RenderStrategy::JsonDump, html::json_dump(data))
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("unit panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("unit panicked: {}", s)
    } else {
        "unit panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SandboxError;
    use crate::sandbox::DisabledSandbox;
    use serde_json::json;
    use std::sync::Arc;

    const WEATHER_SRC: &str =
        "import { Card } from '@/components/ui/card'\nexport default function Weather({ data }) {\n  return <Card>{data.city}</Card>\n}";

    fn fallback_only() -> Renderer {
        Renderer::new(default_chain(), Box::new(DisabledSandbox), vec![])
    }

    struct Failing;
    impl Unit for Failing {
        fn name(&self) -> &str {
            "Failing"
        }
        fn render(&self, _data: &Value) -> anyhow::Result<String> {
            anyhow::bail!("missing prop 'city'")
        }
    }

    struct Panicking;
    impl Unit for Panicking {
        fn name(&self) -> &str {
            "Panicking"
        }
        fn render(&self, _data: &Value) -> anyhow::Result<String> {
            panic!("index out of bounds")
        }
    }

    struct Greeting;
    impl Unit for Greeting {
        fn name(&self) -> &str {
            "Greeting"
        }
        fn render(&self, data: &Value) -> anyhow::Result<String> {
            Ok(format!("<p>Hello {}</p>", html::escape_html(&html::value_text(&data["name"]))))
        }
    }

    #[test]
    fn test_structured_success() {
        let out = Renderer::default().render(
            &LoadedUnit::Structured {
                filename: "greet.tsx".into(),
                unit: Arc::new(Greeting),
            },
            &json!({"name": "Ada"}),
        );
        assert_eq!(out.strategy, RenderStrategy::Structured);
        assert!(out.html.contains("Hello Ada"));
        assert!(out.html.contains("data-strategy=\"structured\""));
    }

    #[test]
    fn test_structured_error_becomes_panel() {
        let r = Renderer::default();
        let out = r.render_structured("f.tsx", &Failing, &json!({"a": 1}));
        assert_eq!(out.strategy, RenderStrategy::ErrorPanel);
        assert!(out.html.contains("missing prop"));
        assert!(out.html.contains("chx-error"));
        assert!(out.html.contains("field-grid"));
    }

    #[test]
    fn test_structured_panic_becomes_panel() {
        let out = Renderer::default().render_structured("p.tsx", &Panicking, &json!(null));
        assert_eq!(out.strategy, RenderStrategy::ErrorPanel);
        assert!(out.html.contains("index out of bounds"));
    }

    #[test]
    fn test_sandbox_rung_first() {
        let out = Renderer::default().render_raw(
            "w.tsx",
            Some("Weather"),
            WEATHER_SRC,
            &json!({"city": "Oslo"}),
        );
        assert_eq!(out.strategy, RenderStrategy::Sandbox);
        assert!(out.html.contains("<iframe"));
        assert!(out.html.contains("Weather (w.tsx)"));
    }

    #[test]
    fn test_weather_heuristic_when_sandbox_disabled() {
        let data = json!({"city": "Oslo", "temperature": 4});
        let out = fallback_only().render_raw("w.tsx", Some("Weather"), WEATHER_SRC, &data);
        assert_eq!(out.strategy, RenderStrategy::WeatherCard);
        assert_eq!(out.notes, vec![format!("sandbox: {}", SandboxError::Disabled)]);
    }

    #[test]
    fn test_field_grid_for_plain_object() {
        let data = json!({"name": "Ada", "role": "admin"});
        let out = fallback_only().render_raw("u.tsx", None, "const x = 1", &data);
        assert_eq!(out.strategy, RenderStrategy::FieldGrid);
    }

    #[test]
    fn test_json_dump_only_chain() {
        let r = Renderer::new(vec![Rung::JsonDump], Box::new(DisabledSandbox), vec![]);
        let out = r.render_raw("u.tsx", None, "", &json!([1, 2]));
        assert_eq!(out.strategy, RenderStrategy::JsonDump);
    }

    #[test]
    fn test_exhausted_chain_still_renders() {
        let r = Renderer::new(vec![Rung::Sandbox], Box::new(DisabledSandbox), vec![]);
        let out = r.render_raw("u.tsx", None, "", &json!({"k": "v"}));
        assert_eq!(out.strategy, RenderStrategy::JsonDump);
        assert_eq!(out.notes.last().map(String::as_str), Some("chain exhausted"));
    }

    #[test]
    fn test_total_coverage_of_payload_shapes() {
        let r = fallback_only();
        for data in [
            json!(null),
            json!({}),
            json!([]),
            json!("text"),
            json!(""),
            json!(42),
            json!(true),
            json!([{"a": 1}, {"b": 2}]),
            json!({"nested": {"x": [1, 2]}}),
        ] {
            let out = r.render_raw("any.tsx", None, "not even code", &data);
            assert!(!out.html.trim().is_empty(), "blank output for {}", data);
            assert!(out.html.contains("data-strategy="));
        }
    }

    #[test]
    fn test_no_data_placeholder() {
        let out = fallback_only().render_raw("n.tsx", None, "", &json!({}));
        assert_eq!(out.strategy, RenderStrategy::NoData);
        assert!(!out.html.contains("chx-error"));
    }

    #[test]
    fn test_load_failure_panel() {
        let err = LoadError::NoExport("x.tsx".into());
        let out = Renderer::default().render_load_failure(
            "x.tsx",
            &err,
            &json!({"temp": 3, "humidity": 9}),
        );
        assert_eq!(out.strategy, RenderStrategy::ErrorPanel);
        assert!(out.html.contains("no renderable export"));
        assert!(out.html.contains("weather-card"));
    }

    #[test]
    fn test_rung_from_str() {
        assert_eq!("json-dump".parse::<Rung>(), Ok(Rung::JsonDump));
        assert_eq!("Sandbox".parse::<Rung>(), Ok(Rung::Sandbox));
        assert!("vm".parse::<Rung>().is_err());
    }

    #[test]
    fn test_weather_detection() {
        let one = json!({"temperature": 3});
        assert!(!looks_like_weather(one.as_object().unwrap(), None));
        assert!(looks_like_weather(one.as_object().unwrap(), Some("function Weather()")));
    }
}
