//! Lua-scripted library classifiers.
//!
//! A classifier script defines a global `classifier` table:
//!
//! ```lua
//! classifier = { name = "dashboards" }
//!
//! function classifier.classify(source, unit_name)
//!     if source:find("Chart") then
//!         return { category = "charts", tags = { "chart", "dashboard" } }
//!     end
//!     return { category = "general", tags = {} }
//! end
//! ```
//!
//! The script is loaded once to validate it and then re-run in a fresh
//! sandboxed VM for every call, so no state leaks between promotions. Calls
//! run on tokio's blocking pool.
//! Scripts may use the `json`, `log` and `text` host tables.
//!
//! ```toml
//! [classifier]
//! script = "classifiers/dashboards.lua"
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use mlua::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Duration;

use component_harness_core::classify::{Classification, Classifier, SubstringClassifier};
use component_harness_core::models::category;

use crate::config::ClassifierConfig;
use crate::lua_runtime::{classifier_vm, to_json};

/// Per-call execution budget.
const CLASSIFY_TIMEOUT: Duration = Duration::from_secs(2);

/// A [`Classifier`] backed by a Lua script.
#[derive(Debug, Clone)]
pub struct LuaClassifier {
    name: String,
    script_path: PathBuf,
    script_source: String,
}

impl LuaClassifier {
    /// Read and validate a classifier script.
    pub fn load(path: &Path) -> Result<Self> {
        let script_source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read classifier script: {}", path.display()))?;
        Self::from_source(path, script_source)
    }

    /// Validate `script_source`; `path` is used for names and messages.
    pub fn from_source(path: &Path, script_source: String) -> Result<Self> {
        let lua = classifier_vm("classifier:validate", CLASSIFY_TIMEOUT)?;
        let table = load_classifier_table(&lua, path, &script_source)?;
        table
            .get::<LuaFunction>("classify")
            .map_err(|e| anyhow::anyhow!("classifier.classify function not defined: {}", e))?;

        let name = table.get::<String>("name").unwrap_or_else(|_| {
            path.file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "lua".to_string())
        });

        Ok(Self {
            name,
            script_path: path.to_path_buf(),
            script_source,
        })
    }

    fn run(&self, source: &str, unit_name: &str) -> Result<Classification> {
        let lua = classifier_vm(&format!("classifier:{}", self.name), CLASSIFY_TIMEOUT)?;

        let table = load_classifier_table(&lua, &self.script_path, &self.script_source)?;
        let classify: LuaFunction = table
            .get::<LuaFunction>("classify")
            .map_err(|e| anyhow::anyhow!("classifier.classify function not defined: {}", e))?;

        let result: LuaValue = classify.call::<LuaValue>((source, unit_name)).map_err(|e| {
            anyhow::anyhow!(
                "classifier.classify() failed in '{}': {}",
                self.script_path.display(),
                e
            )
        })?;

        let json = to_json(result)
            .map_err(|e| anyhow::anyhow!("Failed to convert classifier result: {}", e))?;
        classification_from_json(&json)
    }
}

#[async_trait]
impl Classifier for LuaClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn classify(&self, source: &str, unit_name: &str) -> Result<Classification> {
        let classifier = self.clone();
        let source = source.to_string();
        let unit_name = unit_name.to_string();

        tokio::task::spawn_blocking(move || classifier.run(&source, &unit_name))
            .await
            .context("Lua classifier task panicked")?
    }
}

fn load_classifier_table(lua: &Lua, path: &Path, script_source: &str) -> Result<LuaTable> {
    lua.load(script_source)
        .set_name(path.to_string_lossy())
        .exec()
        .map_err(|e| {
            anyhow::anyhow!(
                "Failed to execute classifier script {}: {}",
                path.display(),
                e
            )
        })?;

    lua.globals()
        .get::<LuaTable>("classifier")
        .map_err(|e| anyhow::anyhow!("Script must define a global 'classifier' table: {}", e))
}

/// Accepts `{ category = "...", tags = { ... } }`. A missing category is
/// `general`; non-string tags are ignored.
fn classification_from_json(value: &serde_json::Value) -> Result<Classification> {
    let obj = value
        .as_object()
        .ok_or_else(|| anyhow::anyhow!("classifier must return a table, got {}", value))?;

    let category = obj
        .get("category")
        .and_then(|c| c.as_str())
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(category::GENERAL)
        .to_string();

    let tags = match obj.get("tags") {
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|t| t.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    };

    Ok(Classification { category, tags })
}

/// The classifier selected by `[classifier]`.
pub fn create_classifier(config: &ClassifierConfig) -> Result<Box<dyn Classifier>> {
    match &config.script {
        Some(path) => Ok(Box::new(LuaClassifier::load(path)?)),
        None => Ok(Box::new(SubstringClassifier)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_from_json_defaults() {
        let c = classification_from_json(&serde_json::json!({ "tags": ["a", 1] })).unwrap();
        assert_eq!(c.category, "general");
        assert_eq!(c.tags, vec!["a"]);
        assert!(classification_from_json(&serde_json::json!("ui")).is_err());
    }

    #[test]
    fn test_missing_classify_function() {
        let err = LuaClassifier::from_source(Path::new("x.lua"), "classifier = {}".to_string())
            .err()
            .unwrap();
        assert!(err.to_string().contains("classify"));
    }
}
