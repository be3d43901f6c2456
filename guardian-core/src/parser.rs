//! Tolerant recovery of structured data from oracle output.
//!
//! The oracle is asked for JSON but frequently wraps it in prose, code
//! fences, or emits literal control characters inside strings. This module
//! recovers the intended structure where possible and returns a typed
//! failure where not - it never panics and never propagates a raw parse
//! error into the pipeline.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Maximum characters of raw oracle output kept in a failure for diagnostics.
const RAW_PREVIEW_LIMIT: usize = 500;

/// Machine-readable failure codes for parse failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParseFailureCode {
    JsonParseFailed,
}

/// A typed, non-throwing parse failure.
///
/// Carries a bounded preview of the raw output so callers can surface
/// diagnostics without logging unbounded oracle text.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("{context}: {message}")]
pub struct ParseFailure {
    pub code: ParseFailureCode,
    pub message: String,
    pub raw_preview: String,
    /// Label identifying which oracle call produced the output.
    pub context: String,
}

impl ParseFailure {
    fn new(context: &str, message: impl Into<String>, raw: &str) -> Self {
        Self {
            code: ParseFailureCode::JsonParseFailed,
            message: message.into(),
            raw_preview: raw.chars().take(RAW_PREVIEW_LIMIT).collect(),
            context: context.to_string(),
        }
    }
}

/// Parse free-form oracle output into a JSON value.
///
/// Tolerates code-fence wrapping, surrounding prose, and embedded literal
/// control characters. On unrecoverable input this returns a
/// [`ParseFailure`] rather than an error from `serde_json`.
pub fn parse_structured(raw: &str, context: &str) -> Result<Value, ParseFailure> {
    let unfenced = strip_fences(raw);

    let Some(span) = structural_span(unfenced) else {
        return Err(ParseFailure::new(
            context,
            "no JSON object or array found in output",
            raw,
        ));
    };

    let cleaned = strip_control_chars(span);

    match serde_json::from_str(&cleaned) {
        Ok(value) => Ok(value),
        Err(first_error) => {
            // One rescue pass: the most common corruption is a literal
            // newline inside a string value.
            let rescued = escape_raw_whitespace_in_strings(&cleaned);
            serde_json::from_str(&rescued)
                .map_err(|_| ParseFailure::new(context, first_error.to_string(), raw))
        }
    }
}

/// Parse free-form oracle output directly into a typed value.
pub fn parse_typed<T: DeserializeOwned>(raw: &str, context: &str) -> Result<T, ParseFailure> {
    let value = parse_structured(raw, context)?;
    serde_json::from_value(value)
        .map_err(|e| ParseFailure::new(context, format!("unexpected shape: {e}"), raw))
}

/// Remove leading/trailing markdown code-fence lines.
fn strip_fences(text: &str) -> &str {
    let mut text = text.trim();

    if let Some(rest) = text.strip_prefix("```") {
        // Drop the fence line itself (e.g. "```json").
        text = match rest.find('\n') {
            Some(newline) => &rest[newline + 1..],
            None => rest,
        };
    }

    if let Some(rest) = text.trim_end().strip_suffix("```") {
        text = rest;
    }

    text.trim()
}

/// Locate the first opening brace/bracket and the last matching closer of
/// the same kind, auto-detecting object vs array by whichever opens first.
fn structural_span(text: &str) -> Option<&str> {
    let object_start = text.find('{');
    let array_start = text.find('[');

    let (start, close) = match (object_start, array_start) {
        (Some(o), Some(a)) if o < a => (o, '}'),
        (Some(o), None) => (o, '}'),
        (_, Some(a)) => (a, ']'),
        (None, None) => return None,
    };

    let end = text.rfind(close)?;
    if end <= start {
        return None;
    }

    Some(&text[start..=end])
}

/// Strip non-printable control characters, keeping tab/newline/CR.
fn strip_control_chars(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || matches!(c, '\t' | '\n' | '\r'))
        .collect()
}

/// Escape literal newlines/tabs that appear inside JSON string values.
fn escape_raw_whitespace_in_strings(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
                out.push(c);
                continue;
            }
            match c {
                '\\' => {
                    escaped = true;
                    out.push(c);
                }
                '"' => {
                    in_string = false;
                    out.push(c);
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                _ => out.push(c),
            }
        } else {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Sample {
        name: String,
        #[serde(default)]
        score: f32,
    }

    #[test]
    fn test_parse_plain_object() {
        let value = parse_structured(r#"{"name": "Cipher"}"#, "test").unwrap();
        assert_eq!(value["name"], "Cipher");
    }

    #[test]
    fn test_parse_fenced_with_prose() {
        let raw = "Sure! Here is the result:\n```json\n{\"name\": \"Cipher\", \"score\": 0.9}\n```\nLet me know if you need more.";
        let parsed: Sample = parse_typed(raw, "test").unwrap();
        assert_eq!(parsed.name, "Cipher");
        assert!((parsed.score - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_parse_array_detected_before_object() {
        let raw = r#"[{"name": "a"}, {"name": "b"}]"#;
        let value = parse_structured(raw, "test").unwrap();
        assert!(value.is_array());
        assert_eq!(value.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_parse_strips_control_characters() {
        let raw = "{\"name\": \"Ci\u{0000}pher\u{0007}\"}";
        let parsed: Sample = parse_typed(raw, "test").unwrap();
        assert_eq!(parsed.name, "Cipher");
    }

    #[test]
    fn test_rescue_pass_escapes_raw_newline() {
        let raw = "{\"name\": \"line one\nline two\"}";
        let parsed: Sample = parse_typed(raw, "test").unwrap();
        assert_eq!(parsed.name, "line one\nline two");
    }

    #[test]
    fn test_garbage_returns_typed_failure() {
        let failure = parse_structured("no structure here at all", "claim_extraction")
            .unwrap_err();
        assert_eq!(failure.code, ParseFailureCode::JsonParseFailed);
        assert_eq!(failure.context, "claim_extraction");
        assert!(failure.raw_preview.contains("no structure"));
    }

    #[test]
    fn test_truncated_json_returns_failure_with_preview() {
        let long_garbage = format!("{{\"name\": \"{}", "x".repeat(800));
        let failure = parse_structured(&long_garbage, "test").unwrap_err();
        assert!(failure.raw_preview.chars().count() <= 500);
    }

    #[test]
    fn test_wrong_shape_returns_failure() {
        let failure = parse_typed::<Sample>(r#"{"unrelated": true}"#, "test").unwrap_err();
        assert!(failure.message.contains("unexpected shape"));
    }

    #[test]
    fn test_trailing_prose_after_object() {
        let raw = "{\"name\": \"ok\"} and that is everything I found.";
        let parsed: Sample = parse_typed(raw, "test").unwrap();
        assert_eq!(parsed.name, "ok");
    }
}
