//! Capability-scoped execution boundary for raw unit source.
//!
//! The renderer never evaluates generated source itself. It hands the
//! source, the payload and the list of bindings the source may import to a
//! [`Sandbox`]; which isolation strategy is used is a configuration choice.
//!
//! [`IsolatedDocumentSandbox`] emits an `<iframe sandbox="allow-scripts">`
//! whose document shims the allowed UI primitives and transpiles the source
//! in the browser. The iframe gets an opaque origin, so the unit cannot
//! reach the embedding page. [`DisabledSandbox`] refuses everything, which
//! sends every raw-source render down the schema-free rungs.

use std::collections::BTreeSet;
use std::fmt::Write;
use std::sync::LazyLock;

use base64::Engine;
use regex::Regex;
use serde_json::Value;

use crate::error::SandboxError;
use crate::render::html::{escape_html, BASE_STYLES};
use crate::sanitize::extract_unit_name;

/// Modules whose imports resolve to the page's own React global.
const REACT_MODULES: &[&str] = &["react", "react-dom"];

const REACT_CDN: &str = "https://unpkg.com/react@18/umd/react.production.min.js";
const REACT_DOM_CDN: &str = "https://unpkg.com/react-dom@18/umd/react-dom.production.min.js";
const BABEL_CDN: &str = "https://unpkg.com/@babel/standalone/babel.min.js";

static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^[ \t]*import\s+(type\s+)?([^'";]*?)\s*from\s*['"]([^'"]+)['"][ \t]*;?"#)
        .expect("valid regex")
});

static SIDE_EFFECT_IMPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?m)^[ \t]*import\s+['"][^'"]+['"][ \t]*;?"#).expect("valid regex"));

static EXPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^([ \t]*)export\s+(default\s+)?").expect("valid regex"));

/// Tag and class for each built-in primitive shim.
const SHIMS: &[(&str, &str, &str)] = &[
    ("Button", "button", "px-4 py-2 rounded bg-blue-500 text-white"),
    ("Input", "input", "border rounded px-3 py-2 w-full"),
    ("Textarea", "textarea", "border rounded px-3 py-2 w-full"),
    ("Label", "label", "text-sm font-medium"),
    ("Checkbox", "input", "w-4 h-4"),
    ("Card", "div", "border rounded-lg p-4"),
    ("CardHeader", "div", "mb-4"),
    ("CardTitle", "h3", "text-xl font-semibold"),
    ("CardDescription", "p", "text-sm text-gray-500"),
    ("CardContent", "div", ""),
    ("CardFooter", "div", "mt-4 flex gap-2"),
    ("Badge", "span", "inline-block px-2 py-1 rounded-full text-xs bg-gray-100"),
    ("Separator", "hr", "my-4"),
    ("Progress", "progress", "w-full"),
];

/// Binding names the sandbox can shim out of the box.
pub fn default_allowed_bindings() -> Vec<String> {
    SHIMS.iter().map(|(name, _, _)| name.to_string()).collect()
}

/// One name bound by an `import` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportBinding {
    /// Name in the exporting module (`default` / `*` for default and
    /// namespace imports).
    pub imported: String,
    /// Name visible in the unit.
    pub local: String,
    pub module: String,
}

/// Collect the value bindings introduced by `source`'s import statements.
/// Type-only imports are skipped.
pub fn parse_imports(source: &str) -> Vec<ImportBinding> {
    let mut out = Vec::new();
    for cap in IMPORT_RE.captures_iter(source) {
        if cap.get(1).is_some() {
            continue;
        }
        let clause = cap.get(2).map(|m| m.as_str()).unwrap_or("");
        let module = cap.get(3).map(|m| m.as_str()).unwrap_or("").to_string();

        let (head, named) = match (clause.find('{'), clause.rfind('}')) {
            (Some(open), Some(close)) if close > open => {
                (&clause[..open], Some(&clause[open + 1..close]))
            }
            _ => (clause, None),
        };

        for part in head.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            if let Some(ns) = part.strip_prefix("* as ") {
                out.push(ImportBinding {
                    imported: "*".to_string(),
                    local: ns.trim().to_string(),
                    module: module.clone(),
                });
            } else {
                out.push(ImportBinding {
                    imported: "default".to_string(),
                    local: part.to_string(),
                    module: module.clone(),
                });
            }
        }

        for spec in named
            .into_iter()
            .flat_map(|n| n.split(','))
            .map(str::trim)
            .filter(|s| !s.is_empty() && !s.starts_with("type "))
        {
            let (imported, local) = match spec.split_once(" as ") {
                Some((i, l)) => (i.trim(), l.trim()),
                None => (spec, spec),
            };
            out.push(ImportBinding {
                imported: imported.to_string(),
                local: local.to_string(),
                module: module.clone(),
            });
        }
    }
    out
}

/// Input to a sandbox run.
#[derive(Debug, Clone, Copy)]
pub struct SandboxRequest<'a> {
    pub source: &'a str,
    pub data: &'a Value,
    pub allowed_bindings: &'a [String],
}

/// An isolation strategy for raw unit source.
pub trait Sandbox: Send + Sync {
    /// Identifier used in config and logs.
    fn kind(&self) -> &str;

    /// Produce an HTML fragment that runs `req.source` against `req.data`.
    fn execute(&self, req: &SandboxRequest<'_>) -> Result<String, SandboxError>;
}

/// Runs units inside a script-only sandboxed iframe.
#[derive(Debug, Default, Clone, Copy)]
pub struct IsolatedDocumentSandbox;

impl IsolatedDocumentSandbox {
    /// Check imports against the allowed set and build the in-frame program.
    fn prepare(&self, req: &SandboxRequest<'_>) -> Result<(String, String), SandboxError> {
        if req.source.trim().is_empty() {
            return Err(SandboxError::EmptySource);
        }
        let unit_name = extract_unit_name(req.source).ok_or(SandboxError::NoUnit)?;

        let bindings = parse_imports(req.source);
        let unbound: BTreeSet<String> = bindings
            .iter()
            .filter(|b| !REACT_MODULES.contains(&b.module.as_str()))
            .filter(|b| {
                let name = if b.imported == "default" || b.imported == "*" {
                    &b.local
                } else {
                    &b.imported
                };
                !req.allowed_bindings.iter().any(|a| a == name)
            })
            .map(|b| b.local.clone())
            .collect();
        if !unbound.is_empty() {
            return Err(SandboxError::UnboundImports(unbound.into_iter().collect()));
        }

        let mut program = String::new();
        for b in &bindings {
            if b.local == "React" && REACT_MODULES.contains(&b.module.as_str()) {
                continue;
            }
            let _ = match (REACT_MODULES.contains(&b.module.as_str()), b.imported.as_str()) {
                (true, "default") | (true, "*") => writeln!(program, "const {} = React;", b.local),
                (true, name) => writeln!(program, "const {} = React.{};", b.local, name),
                (false, "default") | (false, "*") => {
                    writeln!(program, "const {} = __chx[{:?}];", b.local, b.local)
                }
                (false, name) => writeln!(program, "const {} = __chx[{:?}];", b.local, name),
            };
        }

        let body = SIDE_EFFECT_IMPORT_RE.replace_all(req.source, "");
        let body = IMPORT_RE.replace_all(&body, "");
        let body = EXPORT_RE.replace_all(&body, "$1");
        program.push_str(body.trim());
        let _ = write!(program, "\nwindow.__chxUnit = {};\n", unit_name);

        Ok((unit_name, program))
    }
}

impl Sandbox for IsolatedDocumentSandbox {
    fn kind(&self) -> &str {
        "isolated-document"
    }

    fn execute(&self, req: &SandboxRequest<'_>) -> Result<String, SandboxError> {
        let (unit_name, program) = self.prepare(req)?;
        let engine = base64::engine::general_purpose::STANDARD;
        let program_b64 = engine.encode(program.as_bytes());
        let data_json =
            serde_json::to_string(req.data).map_err(|e| SandboxError::Execution(e.to_string()))?;
        let data_b64 = engine.encode(data_json.as_bytes());

        let document = frame_document(&unit_name, &program_b64, &data_b64, req.allowed_bindings);
        Ok(format!(
            "<iframe class=\"chx-frame\" title=\"{}\" sandbox=\"allow-scripts\" srcdoc=\"{}\"></iframe>",
            escape_html(&unit_name),
            escape_html(&document)
        ))
    }
}

/// Refuses every request so raw source always falls through to the
/// schema-free rungs.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledSandbox;

impl Sandbox for DisabledSandbox {
    fn kind(&self) -> &str {
        "disabled"
    }

    fn execute(&self, _req: &SandboxRequest<'_>) -> Result<String, SandboxError> {
        Err(SandboxError::Disabled)
    }
}

/// Build a sandbox by its config name.
pub fn sandbox_for_kind(kind: &str) -> Option<Box<dyn Sandbox>> {
    match kind {
        "isolated-document" => Some(Box::new(IsolatedDocumentSandbox)),
        "disabled" => Some(Box::new(DisabledSandbox)),
        _ => None,
    }
}

fn shim_script(allowed: &[String]) -> String {
    let mut out = String::from("const __chx = {};\n");
    for name in allowed {
        let (tag, class) = SHIMS
            .iter()
            .find(|(n, _, _)| n == name)
            .map(|(_, t, c)| (*t, *c))
            .unwrap_or(("div", ""));
        let _ = writeln!(
            out,
            "__chx[{name:?}] = ({{ children, className = '', onCheckedChange, ...rest }}) => \
             React.createElement({tag:?}, Object.assign({{}}, rest, {{ className: ({class:?} + ' ' + className).trim() }}, \
             onCheckedChange ? {{ type: 'checkbox', onChange: (e) => onCheckedChange(e.target.checked) }} : {{}}), \
             {void} ? undefined : children);",
            name = name,
            tag = tag,
            class = class,
            void = matches!(tag, "input" | "hr" | "progress"),
        );
    }
    out
}

fn frame_document(
    unit_name: &str,
    program_b64: &str,
    data_b64: &str,
    allowed: &[String],
) -> String {
    format!(
        r#"<!DOCTYPE html><html><head><meta charset="utf-8"><title>{title}</title>
<style>{styles}</style>
<script src="{react}"></script>
<script src="{react_dom}"></script>
<script src="{babel}"></script>
</head><body><div id="root"><p class="chx-empty">Loading unit...</p></div>
<script>
(function () {{
  const decode = (b64) => new TextDecoder().decode(Uint8Array.from(atob(b64), (c) => c.charCodeAt(0)));
  const root = document.getElementById('root');
  const fail = (message) => {{
    root.innerHTML = '';
    const p = document.createElement('p');
    p.className = 'chx-error-message';
    p.textContent = 'Unit failed to render: ' + message;
    root.appendChild(p);
  }};
  try {{
    {shims}
    window.__chx = __chx;
    const data = JSON.parse(decode("{data}"));
    const code = Babel.transform(decode("{program}"), {{ presets: ['typescript', 'react'], filename: 'unit.tsx' }}).code;
    (0, eval)(code);
    if (typeof window.__chxUnit !== 'function') {{
      fail('no callable unit');
      return;
    }}
    ReactDOM.createRoot(root).render(React.createElement(window.__chxUnit, {{ data }}));
  }} catch (err) {{
    fail(err && err.message ? err.message : String(err));
  }}
}})();
</script></body></html>"#,
        title = escape_html(unit_name),
        styles = BASE_STYLES,
        react = REACT_CDN,
        react_dom = REACT_DOM_CDN,
        babel = BABEL_CDN,
        shims = shim_script(allowed),
        data = data_b64,
        program = program_b64,
    )
}
