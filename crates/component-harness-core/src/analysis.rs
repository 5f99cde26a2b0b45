//! Lenient parsing of intent-analysis and sample-data replies.
//!
//! Completion providers are asked for a JSON object but routinely embed it
//! in prose, fence it, annotate it with comments or leave trailing commas.
//! Cleanup is string-aware: `//` inside a URL string is left alone.

use serde_json::Value;

use crate::models::AnalysisResult;

/// Parse an [`AnalysisResult`] out of a free-text completion reply.
///
/// Returns `None` when no brace-delimited span parses as an object; callers
/// substitute [`AnalysisResult::text_only`].
pub fn parse_analysis(text: &str) -> Option<AnalysisResult> {
    let value = extract_json_object(text)?;
    serde_json::from_value(value).ok()
}

/// Parse a sample-data reply. Any failure yields an empty object.
pub fn parse_sample_data(text: &str) -> Value {
    extract_json_object(text).unwrap_or_else(|| Value::Object(Default::default()))
}

/// Clean `text` and parse the first JSON object found in it.
///
/// Tries the first balanced `{ ... }` span, then the widest span from the
/// first `{` to the last `}`.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let cleaned = strip_trailing_commas(&strip_comments(text));

    let candidates = [balanced_object_span(&cleaned), widest_object_span(&cleaned)];
    let found = candidates
        .into_iter()
        .flatten()
        .filter_map(|span| serde_json::from_str::<Value>(span).ok())
        .find(Value::is_object);
    found
}

/// Remove `// ...` line comments and `/* ... */` block comments outside of
/// string literals.
pub fn strip_comments(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    let mut in_string = false;

    while i < chars.len() {
        let c = chars[i];
        if in_string {
            out.push(c);
            if c == '\\' && i + 1 < chars.len() {
                out.push(chars[i + 1]);
                i += 2;
                continue;
            }
            if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        match (c, chars.get(i + 1)) {
            ('"', _) => {
                in_string = true;
                out.push(c);
                i += 1;
            }
            ('/', Some('/')) => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            ('/', Some('*')) => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 2;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// Drop commas that directly precede (modulo whitespace) a `}` or `]`,
/// outside of string literals.
pub fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        if c == '"' {
            in_string = true;
            out.push(c);
            continue;
        }
        if c == ',' {
            let next = chars[i + 1..].iter().find(|n| !n.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}

fn balanced_object_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn widest_object_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DisplayType;

    #[test]
    fn test_parses_fenced_json_with_comments_and_trailing_commas() {
        let reply = r#"Sure, here's the analysis:
```json
{
  // what the user wants
  "intent": "weather forecast",
  "displayType": "weather", /* card-ish */
  "dataStructure": { "city": "string", "temps": [1, 2,], },
  "instructions": "Show https://example.com/icons",
  "response": "Here is the forecast.",
}
```
Hope that helps!"#;
        let a = parse_analysis(reply).unwrap();
        assert_eq!(a.intent, "weather forecast");
        assert_eq!(a.display_type, DisplayType::Weather);
        assert_eq!(a.instructions, "Show https://example.com/icons");
        assert_eq!(a.data_structure["temps"], serde_json::json!([1, 2]));
    }

    #[test]
    fn test_no_json_returns_none() {
        assert!(parse_analysis("I can't help with that.").is_none());
        let fallback = AnalysisResult::text_only("I can't help with that.");
        assert_eq!(fallback.intent, "general_query");
        assert_eq!(fallback.display_type, DisplayType::Text);
    }

    #[test]
    fn test_first_balanced_object_wins() {
        let v = extract_json_object(r#"a {"x": 1} then {"y": 2}"#).unwrap();
        assert_eq!(v, serde_json::json!({"x": 1}));
    }

    #[test]
    fn test_braces_inside_strings() {
        let v = extract_json_object(r#"{"s": "a } b", "n": 2}"#).unwrap();
        assert_eq!(v["n"], 2);
    }

    #[test]
    fn test_sample_data_failure_is_empty_object() {
        assert_eq!(parse_sample_data("no data here"), serde_json::json!({}));
        assert_eq!(parse_sample_data("[1, 2]"), serde_json::json!({}));
        assert_eq!(
            parse_sample_data("```json\n{\"temp\": 21}\n```"),
            serde_json::json!({"temp": 21})
        );
    }

    #[test]
    fn test_strip_comments_keeps_strings() {
        let s = strip_comments(r#"{"url": "http://x/y"} // note"#);
        assert_eq!(s.trim(), r#"{"url": "http://x/y"}"#);
    }
}
