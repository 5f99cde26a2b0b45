//! Heuristic cleanup of generated text into self-contained unit source.
//!
//! Code-generation providers wrap their output in prose and markdown fences,
//! append narration after the code, and sometimes stop mid-function. The
//! sanitizer runs a fixed sequence of passes, each relying on the previous
//! one having removed the noise that would confuse it:
//!
//! 1. **Preamble** — drop everything before the first `import` line or
//!    client-only directive; failing that, before the first
//!    `interface`/`type`/`export`/`function`/`const` line.
//! 2. **Trailing narration** — scanning backward, cut at the last line that
//!    carries a narration marker (`<Thinking>`, `Let me`, `I will`, ...).
//! 3. **Brace repair** — append one `}` per unmatched `{`, at the end.
//! 4. **Directive strip** — remove `'use client'` / `"use client"` lines.
//! 5. **Fence strip** — remove bounding markdown code fences.
//! 6. **Name extraction** — `export default function <Name>` is required.
//!
//! # Example
//!
//! ```rust
//! use component_harness_core::sanitize::sanitize;
//!
//! let raw = "Here is your card:\n```tsx\nimport React from 'react'\n\
//!            export default function Card() {\n  return <div/>\n\n```\nLet me know!";
//! let unit = sanitize(raw).unwrap();
//! assert_eq!(unit.unit_name, "Card");
//! assert!(unit.source_text.starts_with("import React"));
//! assert!(unit.source_text.ends_with('}'));
//! ```

use regex::Regex;
use std::sync::LazyLock;

use crate::error::SanitizeError;

/// Lines containing any of these (searched from the end) start narration
/// appended after the unit.
pub const NARRATION_MARKERS: &[&str] = &[
    "<Thinking>",
    "Let me",
    "I will",
    "Project Structure:",
    "Components:",
];

/// Declaration prefixes accepted as a unit start when no import is present.
const DECLARATION_PREFIXES: &[&str] = &["interface ", "type ", "export ", "function ", "const "];

static UNIT_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"export\s+default\s+function\s+([A-Za-z_$][A-Za-z0-9_$]*)").expect("valid regex")
});

/// Output of a successful [`sanitize`] run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizedUnit {
    /// Cleaned source, ready to persist.
    pub source_text: String,
    /// Identifier of the default-exported callable.
    pub unit_name: String,
    /// Number of closing braces appended by the repair pass.
    pub braces_added: usize,
}

/// Run every sanitizer pass over `raw` and extract the unit name.
///
/// # Errors
///
/// - [`SanitizeError::Empty`] if nothing survives cleanup.
/// - [`SanitizeError::NoUnitName`] if the cleaned text has no
///   `export default function <Name>` declaration. This is fatal for a save;
///   callers substitute a synthesized unit instead.
pub fn sanitize(raw: &str) -> Result<SanitizedUnit, SanitizeError> {
    if raw.trim().is_empty() {
        return Err(SanitizeError::Empty);
    }

    let lines: Vec<&str> = raw.lines().collect();
    let start = find_unit_start(&lines);
    let body = &lines[start..];
    let end = find_narration_start(body);
    let kept = trim_trailing_fence(&body[..end]);

    let mut text = kept.join("\n");
    let braces_added = repair_braces(&mut text);
    let text = strip_client_directives(&text);
    let text = strip_code_fences(&text);

    if text.trim().is_empty() {
        return Err(SanitizeError::Empty);
    }

    let unit_name = extract_unit_name(&text).ok_or(SanitizeError::NoUnitName)?;

    Ok(SanitizedUnit {
        source_text: text,
        unit_name,
        braces_added,
    })
}

/// Extract the identifier from the first `export default function <Name>`.
pub fn extract_unit_name(source: &str) -> Option<String> {
    UNIT_NAME_RE
        .captures(source)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Index of the first line that looks like unit source.
fn find_unit_start(lines: &[&str]) -> usize {
    let first_import = lines.iter().position(|line| {
        let t = line.trim();
        t.starts_with("import ") || is_client_directive(t)
    });
    if let Some(i) = first_import {
        return i;
    }

    lines
        .iter()
        .position(|line| {
            let t = line.trim();
            DECLARATION_PREFIXES.iter().any(|p| t.starts_with(p))
        })
        .unwrap_or(0)
}

/// Exclusive end index: the last narration-marker line, or `lines.len()`.
fn find_narration_start(lines: &[&str]) -> usize {
    lines
        .iter()
        .rposition(|line| NARRATION_MARKERS.iter().any(|m| line.contains(m)))
        .unwrap_or(lines.len())
}

/// Drop trailing blank lines and a closing fence so brace repair appends
/// after the code, not after the fence.
fn trim_trailing_fence<'a>(lines: &'a [&'a str]) -> &'a [&'a str] {
    let mut end = lines.len();
    while end > 0 && lines[end - 1].trim().is_empty() {
        end -= 1;
    }
    if end > 0 && lines[end - 1].trim().starts_with("```") {
        end -= 1;
        while end > 0 && lines[end - 1].trim().is_empty() {
            end -= 1;
        }
    }
    &lines[..end]
}

/// Count of `{` minus count of `}`. Braces inside strings are counted too.
pub fn brace_balance(text: &str) -> i64 {
    text.chars().fold(0i64, |acc, c| match c {
        '{' => acc + 1,
        '}' => acc - 1,
        _ => acc,
    })
}

/// Append one closing brace per unmatched opening brace. Returns how many
/// were added. Only the end of the text is touched.
fn repair_braces(text: &mut String) -> usize {
    let balance = brace_balance(text);
    if balance <= 0 {
        return 0;
    }
    let missing = balance as usize;
    if !text.ends_with('\n') {
        text.push('\n');
    }
    text.push_str(&"}".repeat(missing));
    missing
}

fn is_client_directive(trimmed: &str) -> bool {
    let t = trimmed.trim_end_matches(';').trim();
    t == "'use client'" || t == "\"use client\""
}

/// Remove every client-only directive line; generated storage has no
/// pragma-processing step.
fn strip_client_directives(text: &str) -> String {
    text.lines()
        .filter(|line| !is_client_directive(line.trim()))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Remove an opening fence (with optional language tag) and a closing fence
/// when they bound the text.
fn strip_code_fences(text: &str) -> String {
    let mut lines: Vec<&str> = text.lines().collect();
    if lines
        .first()
        .map(|l| l.trim_start().starts_with("```"))
        .unwrap_or(false)
    {
        lines.remove(0);
    }
    if lines.last().map(|l| l.trim() == "```").unwrap_or(false) {
        lines.pop();
    }
    lines.join("\n").trim().to_string()
}

// ═══════════════════════════════════════════════════════════════════════
// Shape validation (advisory)
// ═══════════════════════════════════════════════════════════════════════

/// Advisory report on whether sanitized source looks like a complete unit.
///
/// Never fatal: issues are logged by callers so a reader can tell why a
/// unit later fell back to a schema-free rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShapeReport {
    pub has_imports: bool,
    pub has_default_export: bool,
    pub has_return: bool,
    pub has_markup: bool,
    pub has_client_directive: bool,
    pub issues: Vec<String>,
}

impl ShapeReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Inspect `source` for the structural features a renderable unit needs.
pub fn validate_shape(source: &str) -> ShapeReport {
    let has_imports = source.lines().any(|l| l.trim_start().starts_with("import"));
    let has_default_export = extract_unit_name(source).is_some();
    let has_return = source.contains("return");
    let has_markup = source.contains("</") || source.contains("/>");
    let has_client_directive = source.lines().any(|l| is_client_directive(l.trim()));

    let mut issues = Vec::new();
    if !has_default_export {
        issues.push("missing default-exported function".to_string());
    }
    if !has_return {
        issues.push("missing return statement".to_string());
    }
    if !has_markup {
        issues.push("no markup elements found".to_string());
    }
    if has_client_directive {
        issues.push("contains a client-only directive".to_string());
    }
    if brace_balance(source) != 0 {
        issues.push("unbalanced braces".to_string());
    }

    ShapeReport {
        has_imports,
        has_default_export,
        has_return,
        has_markup,
        has_client_directive,
        issues,
    }
}

/// Signals that raw generated text was cut off by the provider.
///
/// Reported for logging only; truncation does not trigger regeneration.
pub fn truncation_hints(raw: &str) -> Vec<String> {
    let mut hints = Vec::new();
    let last = raw
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("");

    if last.contains("...") {
        hints.push("last line ends in an ellipsis".to_string());
    }
    if last.to_ascii_lowercase().contains("truncated") {
        hints.push("last line mentions truncation".to_string());
    }
    if !raw.contains("export default") {
        hints.push("no default export present".to_string());
    }
    let balance = brace_balance(raw);
    if balance > 0 {
        hints.push(format!("{} unclosed brace(s)", balance));
    }
    hints
}
