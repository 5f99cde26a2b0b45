//! Core data models shared by the sanitizer, store, loader and renderer.
//!
//! Wire and on-disk field names are camelCase so the library index and the
//! HTTP responses read the same.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default file extension for persisted units.
pub const DEFAULT_EXTENSION: &str = "tsx";

/// Known library categories. The set is open: classifiers may return other
/// values as long as they are valid path components.
pub mod category {
    pub const GENERAL: &str = "general";
    pub const UI: &str = "ui";
    pub const FORMS: &str = "forms";
    pub const DATA_DISPLAY: &str = "data-display";
    pub const CHARTS: &str = "charts";
    pub const FEEDBACK: &str = "feedback";
    pub const NAVIGATION: &str = "navigation";
}

/// A sanitized unit persisted in the generated-units area.
///
/// Immutable once written; `filename` is the lookup key for its lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedUnit {
    pub id: String,
    pub filename: String,
    pub unit_name: String,
    pub source_text: String,
    pub created_at: String,
}

impl GeneratedUnit {
    /// A fresh unit for `intent` with a newly resolved id and filename.
    pub fn for_intent(
        intent: &str,
        unit_name: impl Into<String>,
        source_text: impl Into<String>,
        ext: &str,
    ) -> Self {
        let (id, filename) = crate::resolve::resolve_filename(intent, ext);
        Self {
            id,
            filename,
            unit_name: unit_name.into(),
            source_text: source_text.into(),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// A promoted, user-curated snapshot of a generated unit.
///
/// One record per entry in the shared library index. `source_text` is a copy
/// taken at promotion time, never a reference back to the generated file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LibraryUnit {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: String,
    pub filename: String,
    pub source_text: String,
    pub created_at: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A role-tagged chat message, as sent to completion providers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Presentation category chosen by intent analysis.
///
/// Unknown values are preserved in [`DisplayType::Other`] so an analysis
/// round-trips without loss.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DisplayType {
    #[default]
    Text,
    Chart,
    Table,
    List,
    Card,
    Form,
    Dashboard,
    Timeline,
    Comparison,
    Progress,
    Calendar,
    Map,
    Gallery,
    Weather,
    Kanban,
    Profile,
    Custom,
    Other(String),
}

impl DisplayType {
    pub fn as_str(&self) -> &str {
        match self {
            DisplayType::Text => "text",
            DisplayType::Chart => "chart",
            DisplayType::Table => "table",
            DisplayType::List => "list",
            DisplayType::Card => "card",
            DisplayType::Form => "form",
            DisplayType::Dashboard => "dashboard",
            DisplayType::Timeline => "timeline",
            DisplayType::Comparison => "comparison",
            DisplayType::Progress => "progress",
            DisplayType::Calendar => "calendar",
            DisplayType::Map => "map",
            DisplayType::Gallery => "gallery",
            DisplayType::Weather => "weather",
            DisplayType::Kanban => "kanban",
            DisplayType::Profile => "profile",
            DisplayType::Custom => "custom",
            DisplayType::Other(s) => s,
        }
    }
}

impl From<String> for DisplayType {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "text" => DisplayType::Text,
            "chart" => DisplayType::Chart,
            "table" => DisplayType::Table,
            "list" => DisplayType::List,
            "card" => DisplayType::Card,
            "form" => DisplayType::Form,
            "dashboard" => DisplayType::Dashboard,
            "timeline" => DisplayType::Timeline,
            "comparison" => DisplayType::Comparison,
            "progress" => DisplayType::Progress,
            "calendar" => DisplayType::Calendar,
            "map" => DisplayType::Map,
            "gallery" => DisplayType::Gallery,
            "weather" => DisplayType::Weather,
            "kanban" => DisplayType::Kanban,
            "profile" => DisplayType::Profile,
            "custom" => DisplayType::Custom,
            _ => DisplayType::Other(s),
        }
    }
}

impl From<DisplayType> for String {
    fn from(d: DisplayType) -> Self {
        d.as_str().to_string()
    }
}

impl fmt::Display for DisplayType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Intent classification produced by the text-completion step.
///
/// Transient: steers code generation and fallback synthesis, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    #[serde(default)]
    pub intent: String,
    #[serde(default)]
    pub display_type: DisplayType,
    #[serde(default)]
    pub data_structure: serde_json::Value,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub response: String,
}

impl AnalysisResult {
    /// Analysis used when the completion reply carried no parseable JSON.
    pub fn text_only(response: impl Into<String>) -> Self {
        Self {
            intent: "general_query".to_string(),
            display_type: DisplayType::Text,
            data_structure: serde_json::json!({ "type": "string" }),
            instructions: "Display as a simple text response".to_string(),
            response: response.into(),
        }
    }
}
