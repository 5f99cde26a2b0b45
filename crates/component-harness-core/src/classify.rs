//! Category and tag inference for library promotion.
//!
//! The [`Classifier`] trait keeps promotion independent of how categories
//! are chosen. [`SubstringClassifier`] is the built-in implementation; the
//! application crate adds a Lua-scripted one.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::category;

/// Category and tags inferred from unit source.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Classification {
    pub category: String,
    pub tags: Vec<String>,
}

/// Infers a library category and keyword tags from unit source.
///
/// Implementations that do CPU-bound or blocking work must move it off the
/// async executor themselves.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    async fn classify(&self, source: &str, unit_name: &str) -> Result<Classification>;
}

/// Ordered category rules: the first rule with any matching needle wins.
const CATEGORY_RULES: &[(&str, &[&str])] = &[
    (category::UI, &["Button", "Card", "Input"]),
    (category::FORMS, &["Form", "Select"]),
    (category::DATA_DISPLAY, &["Table", "List", "Grid"]),
    (category::CHARTS, &["Chart", "Graph"]),
    (category::FEEDBACK, &["Modal", "Dialog"]),
    (category::NAVIGATION, &["Nav", "Menu"]),
];

/// Needle to tag, checked independently in order.
const TAG_RULES: &[(&str, &str)] = &[
    ("useState", "state"),
    ("useEffect", "effect"),
    ("Button", "button"),
    ("Card", "card"),
    ("Input", "input"),
    ("Form", "form"),
    ("Table", "table"),
    ("Chart", "chart"),
    ("Modal", "modal"),
    ("Dialog", "dialog"),
    ("Nav", "navigation"),
    ("Menu", "menu"),
];

/// Case-sensitive substring matching over the unit source.
#[derive(Debug, Default, Clone, Copy)]
pub struct SubstringClassifier;

impl SubstringClassifier {
    pub fn classify_source(&self, source: &str) -> Classification {
        let category = CATEGORY_RULES
            .iter()
            .find(|(_, needles)| needles.iter().any(|n| source.contains(n)))
            .map(|(c, _)| *c)
            .unwrap_or(category::GENERAL)
            .to_string();

        let tags = TAG_RULES
            .iter()
            .filter(|(needle, _)| source.contains(needle))
            .map(|(_, tag)| tag.to_string())
            .collect();

        Classification { category, tags }
    }
}

#[async_trait]
impl Classifier for SubstringClassifier {
    fn name(&self) -> &str {
        "substring"
    }

    async fn classify(&self, source: &str, _unit_name: &str) -> Result<Classification> {
        Ok(self.classify_source(source))
    }
}

/// Human description from a PascalCase unit name:
/// `TodoList` becomes `"A todo list component"`.
pub fn describe_unit_name(unit_name: &str) -> String {
    let mut words = String::new();
    let mut prev_lower = false;
    for c in unit_name.chars() {
        if c == '_' || c == '-' {
            words.push(' ');
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower {
            words.push(' ');
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        words.extend(c.to_lowercase());
    }
    let words = words.split_whitespace().collect::<Vec<_>>().join(" ");
    if words.is_empty() {
        "A component".to_string()
    } else {
        format!("A {} component", words)
    }
}

/// Lowercase, de-duplicate, keep first-seen order.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let t = tag.as_ref().trim().to_lowercase();
        if !t.is_empty() && !out.contains(&t) {
            out.push(t);
        }
    }
    out
}
