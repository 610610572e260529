//! Defensive parsing of model output.
//!
//! Models wrap JSON in prose or code fences, emit stray braces, and sometimes
//! skip fields entirely. Everything here returns `None` instead of failing so
//! callers can fall back.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Subject and body as returned by the model, before normalization.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawEmailDraft {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
}

/// Result of asking the model whether a reply is safe to auto-answer.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ReplyClassification {
    pub is_simple: bool,
    pub reason: String,
}

impl ReplyClassification {
    /// The fail-closed answer used whenever the model cannot be trusted.
    pub fn not_simple(reason: impl Into<String>) -> Self {
        Self {
            is_simple: false,
            reason: reason.into(),
        }
    }
}

/// Find the first balanced `{...}` span starting at or after `from`.
///
/// Braces inside JSON strings are ignored.
fn balanced_object_at(text: &str, from: usize) -> Option<(usize, usize)> {
    let start = from + text[from..].find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some((start, start + offset + 1));
                }
            }
            _ => {}
        }
    }
    None
}

/// Extract the first balanced JSON object from free-form model output.
pub fn extract_json_object(text: &str) -> Option<&str> {
    balanced_object_at(text, 0).map(|(start, end)| &text[start..end])
}

/// Decode the first `{...}` span in `text` that deserializes as `T`.
///
/// Later spans are tried when an earlier one is not valid JSON, which covers
/// prose like "use {name} here: {...}".
pub fn parse_json_object<T: DeserializeOwned>(text: &str) -> Option<T> {
    let mut from = 0;
    while let Some((start, end)) = balanced_object_at(text, from) {
        if let Ok(value) = serde_json::from_str::<T>(&text[start..end]) {
            return Some(value);
        }
        from = start + 1;
    }
    None
}

/// Parse a `{subject, body}` draft. A missing or blank body is a failure.
pub fn parse_email_draft(raw: &str) -> Option<RawEmailDraft> {
    let draft: RawEmailDraft = parse_json_object(raw)?;
    if draft.body.trim().is_empty() {
        return None;
    }
    Some(draft)
}

/// Parse a classification verdict. Anything but an explicit yes is "not simple".
pub fn parse_classification(raw: &str) -> ReplyClassification {
    let Some(value) = parse_json_object::<Value>(raw) else {
        return ReplyClassification::not_simple("Failed to parse classification");
    };

    let is_simple = match value.get("is_simple") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => {
            let s = s.trim();
            s.eq_ignore_ascii_case("yes") || s.eq_ignore_ascii_case("true")
        }
        _ => false,
    };
    let reason = value
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();

    ReplyClassification { is_simple, reason }
}
