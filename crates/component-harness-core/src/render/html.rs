//! HTML builders for the schema-free rungs of the fallback chain.
//!
//! Every builder escapes payload text; nothing here emits script. The only
//! script-bearing output in the crate is the sandbox iframe, whose document
//! travels inside an escaped `srcdoc` attribute.

use std::fmt::Write;

use serde_json::{Map, Value};

/// Styles shared by every fallback panel and the standalone page.
pub const BASE_STYLES: &str = "body{margin:0;padding:16px;font-family:system-ui,sans-serif;background:#f9fafb;color:#111827;}\
.chx-unit{border:1px solid #e5e7eb;border-radius:8px;background:#fff;margin:0 0 16px;overflow:hidden;}\
.chx-label{display:flex;justify-content:space-between;gap:8px;padding:6px 12px;font-size:12px;background:#f3f4f6;color:#4b5563;border-bottom:1px solid #e5e7eb;}\
.chx-body{padding:12px 16px;}\
.chx-grid{display:grid;grid-template-columns:repeat(auto-fill,minmax(180px,1fr));gap:8px;}\
.chx-field{padding:8px;background:#f9fafb;border-radius:6px;}\
.chx-field dt{font-size:12px;color:#6b7280;text-transform:capitalize;}\
.chx-field dd{margin:4px 0 0;font-weight:600;word-break:break-word;}\
.chx-table{border-collapse:collapse;width:100%;}\
.chx-table th,.chx-table td{border:1px solid #e5e7eb;padding:4px 8px;text-align:left;}\
.chx-table th{background:#f3f4f6;}\
.chx-weather{display:grid;grid-template-columns:repeat(auto-fill,minmax(140px,1fr));gap:8px;}\
.chx-weather .chx-field dd{font-size:20px;}\
.chx-json{white-space:pre-wrap;font-family:monospace;font-size:12px;background:#f3f4f6;padding:8px;border-radius:6px;max-height:360px;overflow:auto;}\
.chx-empty{color:#6b7280;font-style:italic;}\
.chx-error{border-color:#fca5a5;}\
.chx-error .chx-label{background:#fee2e2;color:#991b1b;}\
.chx-error-message{color:#b91c1c;font-family:monospace;white-space:pre-wrap;}\
.chx-frame{width:100%;min-height:320px;border:0;}";

/// Escape text for use in element content and double-quoted attributes.
pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Display form of a JSON value: strings unquoted, everything else compact
/// JSON.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// `camelCase` / `snake_case` key as spaced words.
pub fn humanize_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    let mut prev_lower = false;
    for c in key.chars() {
        if c == '_' || c == '-' {
            out.push(' ');
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower {
            out.push(' ');
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        out.push(c);
    }
    out
}

/// Wrap `inner` in a labeled section naming the strategy and unit.
pub fn labeled(strategy: &str, unit: &str, error: bool, inner: &str) -> String {
    let mut out = String::new();
    let class = if error { "chx-unit chx-error" } else { "chx-unit" };
    let _ = write!(
        out,
        "<section class=\"{}\" data-strategy=\"{}\" data-unit=\"{}\">\
         <header class=\"chx-label\"><span>{}</span><span>{}</span></header>\
         <div class=\"chx-body\">{}</div></section>",
        class,
        escape_html(strategy),
        escape_html(unit),
        escape_html(strategy),
        escape_html(unit),
        inner
    );
    out
}

/// `<dl>` grid of an object's fields.
pub fn field_grid(map: &Map<String, Value>) -> String {
    let mut out = String::from("<dl class=\"chx-grid\">");
    for (key, value) in map {
        let _ = write!(
            out,
            "<div class=\"chx-field\"><dt>{}</dt><dd>{}</dd></div>",
            escape_html(&humanize_key(key)),
            escape_html(&value_text(value))
        );
    }
    out.push_str("</dl>");
    out
}

/// Table over an array. Object items contribute columns in first-seen
/// order; other items render in a single `value` column.
pub fn item_table(items: &[Value]) -> String {
    let mut columns: Vec<String> = Vec::new();
    let mut has_scalars = false;
    for item in items {
        match item {
            Value::Object(map) => {
                for key in map.keys() {
                    if !columns.contains(key) {
                        columns.push(key.clone());
                    }
                }
            }
            _ => has_scalars = true,
        }
    }
    if has_scalars || columns.is_empty() {
        columns.insert(0, "value".to_string());
    }

    let mut out = String::from("<table class=\"chx-table\"><thead><tr><th>#</th>");
    for col in &columns {
        let _ = write!(out, "<th>{}</th>", escape_html(&humanize_key(col)));
    }
    out.push_str("</tr></thead><tbody>");
    for (i, item) in items.iter().enumerate() {
        let _ = write!(out, "<tr><td>{}</td>", i + 1);
        for col in &columns {
            let cell = match item {
                Value::Object(map) => map.get(col).map(value_text).unwrap_or_default(),
                other if col == "value" => value_text(other),
                _ => String::new(),
            };
            let _ = write!(out, "<td>{}</td>", escape_html(&cell));
        }
        out.push_str("</tr>");
    }
    out.push_str("</tbody></table>");
    out
}

/// Domain card for weather-shaped objects.
pub fn weather_card(map: &Map<String, Value>) -> String {
    let location = ["location", "city", "name", "place"]
        .iter()
        .find_map(|k| map.get(*k))
        .map(value_text)
        .unwrap_or_else(|| "Weather Information".to_string());

    let condition = map.get("condition").or_else(|| map.get("description"));
    let icon = condition
        .map(value_text)
        .map(|c| condition_icon(&c.to_lowercase()))
        .unwrap_or("🌤️");

    let mut out = String::new();
    let _ = write!(out, "<h3>{} {}</h3><dl class=\"chx-weather\">", icon, escape_html(&location));

    let fields: &[(&[&str], &str, &str)] = &[
        (&["temperature", "temp"], "Temperature", "°C"),
        (&["condition", "description"], "Condition", ""),
        (&["humidity"], "Humidity", "%"),
        (&["windSpeed", "wind_speed", "wind"], "Wind", " km/h"),
        (&["feelsLike", "feels_like"], "Feels like", "°C"),
    ];
    for (keys, label, unit) in fields {
        if let Some(v) = keys.iter().find_map(|k| map.get(*k)) {
            if v.is_null() {
                continue;
            }
            let _ = write!(
                out,
                "<div class=\"chx-field\"><dt>{}</dt><dd>{}{}</dd></div>",
                label,
                escape_html(&value_text(v)),
                if v.is_number() { *unit } else { "" }
            );
        }
    }
    out.push_str("</dl>");

    if let Some(Value::Array(days)) = map.get("forecast") {
        out.push_str("<h4>Forecast</h4>");
        out.push_str(&item_table(days));
    }
    out
}

fn condition_icon(condition: &str) -> &'static str {
    if condition.contains("sun") || condition.contains("clear") {
        "☀️"
    } else if condition.contains("rain") || condition.contains("shower") {
        "🌧️"
    } else if condition.contains("snow") {
        "❄️"
    } else if condition.contains("cloud") || condition.contains("overcast") {
        "☁️"
    } else {
        "🌤️"
    }
}

/// Scalar payload as a single paragraph.
pub fn scalar(value: &Value) -> String {
    format!("<p>{}</p>", escape_html(&value_text(value)))
}

/// Pretty-printed JSON dump.
pub fn json_dump(value: &Value) -> String {
    let pretty = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    format!("<pre class=\"chx-json\">{}</pre>", escape_html(&pretty))
}

pub fn no_data() -> String {
    "<p class=\"chx-empty\">No data available</p>".to_string()
}

pub fn error_message(message: &str) -> String {
    format!("<p class=\"chx-error-message\">{}</p>", escape_html(message))
}

/// Standalone HTML page around rendered fragments.
pub fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{}</title><style>{}</style></head><body>{}</body></html>",
        escape_html(title),
        BASE_STYLES,
        body
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_escape() {
        assert_eq!(escape_html("<a href=\"x\">&'"), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }

    #[test]
    fn test_humanize_key() {
        assert_eq!(humanize_key("windSpeed"), "wind Speed");
        assert_eq!(humanize_key("feels_like"), "feels like");
    }

    #[test]
    fn test_field_grid_escapes_values() {
        let html = field_grid(json!({"name": "<b>x</b>"}).as_object().unwrap());
        assert!(html.contains("&lt;b&gt;x&lt;/b&gt;"));
        assert!(!html.contains("<b>"));
    }

    #[test]
    fn test_item_table_mixed() {
        let html = item_table(&[json!({"a": 1}), json!(2)]);
        assert!(html.contains("<th>value</th>"));
        assert!(html.contains("<th>a</th>"));
        assert!(html.contains("<td>2</td>"));
    }

    #[test]
    fn test_weather_card() {
        let data = json!({"city": "Oslo", "temperature": 3, "condition": "Light rain", "humidity": 80});
        let html = weather_card(data.as_object().unwrap());
        assert!(html.contains("Oslo"));
        assert!(html.contains("3°C"));
        assert!(html.contains("80%"));
        assert!(html.contains("🌧️"));
    }

    #[test]
    fn test_labeled() {
        let html = labeled("json-dump", "a.tsx", false, "<p>x</p>");
        assert!(html.contains("data-strategy=\"json-dump\""));
        assert!(html.contains("data-unit=\"a.tsx\""));
    }
}
