//! Structured-output repair — best-effort recovery of a JSON value from
//! free-form model text.
//!
//! An ordered list of pure strategies is applied until one yields a value;
//! the final fallback wraps the original, unmodified input in
//! `{"raw_text": ...}` so callers can detect a degraded result without
//! ever seeing an error from this module.

use serde_json::{json, Value};
use tracing::warn;

type Strategy = fn(&str) -> Option<Value>;

const STRATEGIES: &[Strategy] = &[
    parse_strict,
    parse_cleaned,
    parse_balanced_braces,
    parse_repaired,
];

/// Parses model output into a JSON value. Never fails: unrepairable input
/// comes back as `{"raw_text": <original>}` with the input preserved
/// byte-for-byte.
pub fn parse(raw: &str) -> Value {
    for strategy in STRATEGIES {
        if let Some(value) = strategy(raw) {
            return value;
        }
    }
    warn!("unparseable model output, returning raw text");
    json!({ "raw_text": raw })
}

/// Returns true when a repaired value is the degraded raw-text fallback.
pub fn is_raw_fallback(value: &Value) -> bool {
    value.get("raw_text").is_some() && value.as_object().map(|o| o.len()) == Some(1)
}

fn parse_strict(raw: &str) -> Option<Value> {
    serde_json::from_str(raw.trim()).ok()
}

fn parse_cleaned(raw: &str) -> Option<Value> {
    serde_json::from_str(&clean(raw)).ok()
}

/// Scans for the first `{` and takes the substring up to the brace that
/// returns nesting depth to zero, honoring JSON string literals.
fn parse_balanced_braces(raw: &str) -> Option<Value> {
    let cleaned = clean(raw);
    let start = cleaned.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in cleaned[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &cleaned[start..start + offset + ch.len_utf8()];
                    return serde_json::from_str(candidate).ok();
                }
            }
            _ => {}
        }
    }
    None
}

/// Collapses newlines and strips trailing commas before closers, then
/// retries the parse.
fn parse_repaired(raw: &str) -> Option<Value> {
    let repaired = clean(raw)
        .replace('\n', " ")
        .replace(",}", "}")
        .replace(", }", "}")
        .replace(",]", "]")
        .replace(", ]", "]");
    serde_json::from_str(&repaired).ok()
}

/// Strips markdown code fences and leading log-prefix noise such as
/// `[2024-01-01 12:00:00] ...` from each line.
fn clean(raw: &str) -> String {
    raw.lines()
        .map(strip_log_prefix)
        .filter(|line| {
            let trimmed = line.trim();
            trimmed != "```" && trimmed != "```json"
        })
        .map(|line| line.replace("```json", "").replace("```", ""))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Drops a leading `[...timestamp...]` prefix when the bracketed text looks
/// like a timestamp rather than JSON.
fn strip_log_prefix(line: &str) -> &str {
    let trimmed = line.trim_start();
    if !trimmed.starts_with('[') {
        return line;
    }
    let Some(close) = trimmed.find(']') else {
        return line;
    };
    let inner = &trimmed[1..close];
    let looks_like_timestamp = !inner.is_empty()
        && inner
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '-' | ':' | '.' | 'T' | 'Z' | ' ' | '/'));
    if looks_like_timestamp {
        trimmed[close + 1..].trim_start()
    } else {
        line
    }
}
