//! Placeholder units built from an analysis.
//!
//! When code generation fails, or its output has no recognizable unit, the
//! orchestrator saves one of these instead of nothing. The result always
//! carries an `export default function <Name>` declaration and balanced
//! braces, so it passes [`crate::sanitize::extract_unit_name`].

use crate::models::{AnalysisResult, DisplayType};

/// PascalCase callable name derived from an intent.
///
/// Words are split on non-alphanumerics, capitalized and joined; leading
/// digits are dropped. Falls back to `Component`.
pub fn fallback_unit_name(intent: &str) -> String {
    let joined: String = intent
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect();

    let name = joined.trim_start_matches(|c: char| c.is_ascii_digit());
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => "Component".to_string(),
    }
}

/// Text embedded as a JSX expression: a JSON string literal is also a valid
/// JS string literal, so no escaping rules leak into the markup.
fn text_expr(text: &str) -> String {
    let literal = serde_json::to_string(text).unwrap_or_else(|_| "\"\"".to_string());
    format!("{{{}}}", literal)
}

/// Build a minimal, valid unit for `analysis`.
pub fn synthesize_fallback_unit(analysis: &AnalysisResult) -> String {
    let name = fallback_unit_name(&analysis.intent);
    let title = |default: &str| {
        if analysis.intent.trim().is_empty() {
            text_expr(default)
        } else {
            text_expr(&analysis.intent)
        }
    };

    let body = match analysis.display_type {
        DisplayType::Chart => format!(
            r#"<div className="p-6 bg-white rounded-lg shadow-sm border">
      <h3 className="text-xl font-semibold mb-4">{title}</h3>
      <div className="h-64 bg-gray-50 rounded-lg flex items-center justify-center">
        <p className="text-gray-600">Chart visualization unavailable</p>
        {{data && (
          <p className="text-sm text-blue-700">Data: {{JSON.stringify(data).substring(0, 100)}}</p>
        )}}
      </div>
    </div>"#,
            title = title("Chart")
        ),
        DisplayType::Table => format!(
            r#"<div className="p-6 bg-white rounded-lg shadow-sm border">
      <h3 className="text-xl font-semibold mb-4">{title}</h3>
      <table className="w-full border-collapse">
        <thead>
          <tr><th>Key</th><th>Value</th></tr>
        </thead>
        <tbody>
          {{data ? Object.entries(data).map(([key, value]) => (
            <tr key={{key}}><td>{{key}}</td><td>{{String(value)}}</td></tr>
          )) : (
            <tr><td colSpan={{2}}>No data available</td></tr>
          )}}
        </tbody>
      </table>
    </div>"#,
            title = title("Table")
        ),
        DisplayType::Card => format!(
            r#"<div className="p-6 bg-white rounded-lg shadow-sm border">
      <h3 className="text-xl font-semibold mb-4">{title}</h3>
      <div className="grid grid-cols-1 md:grid-cols-2 gap-4">
        {{data ? Object.entries(data).map(([key, value]) => (
          <div key={{key}} className="p-4 bg-gray-50 rounded-lg">
            <h4 className="font-medium">{{key}}</h4>
            <p>{{String(value)}}</p>
          </div>
        )) : (
          <div className="text-gray-500">No data available</div>
        )}}
      </div>
    </div>"#,
            title = title("Card")
        ),
        _ => {
            let response = if analysis.response.trim().is_empty() {
                "Component content"
            } else {
                analysis.response.as_str()
            };
            format!(
                r#"<div className="p-6 bg-white rounded-lg shadow-sm border">
      <h3 className="text-xl font-semibold mb-2">{title}</h3>
      <p className="text-gray-600 mb-4">{response}</p>
      <div className="bg-gray-50 p-4 rounded-lg">
        {{data ? (
          <pre className="text-sm whitespace-pre-wrap">{{JSON.stringify(data, null, 2)}}</pre>
        ) : (
          <p className="text-gray-500">No data available</p>
        )}}
      </div>
    </div>"#,
                title = title("Component"),
                response = text_expr(response)
            )
        }
    };

    format!(
        "import React from 'react'\n\ninterface {name}Props {{\n  data?: any\n}}\n\nexport default function {name}({{ data }}: {name}Props) {{\n  return (\n    {body}\n  )\n}}\n",
        name = name,
        body = body
    )
}
