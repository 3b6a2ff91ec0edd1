//! JSON inspection utilities shared by the router and the trace recorder.
//!
//! The router needs short, single-line previews of arbitrary node outputs
//! to include in routing events and advisor prompts; the trace recorder
//! needs the same to keep span snapshots bounded. Both go through
//! [`preview_value`].

use serde_json::Value;

/// Default maximum length for value previews, in characters.
pub const DEFAULT_PREVIEW_LEN: usize = 120;

/// Render a short, single-line preview of a JSON value.
///
/// Strings are shown verbatim (truncated); arrays and objects are shown as
/// a summary of their shape so a megabyte of embeddings never lands in an
/// event payload.
///
/// # Examples
///
/// ```rust
/// use nodeflow::utils::json_ext::preview_value;
/// use serde_json::json;
///
/// assert_eq!(preview_value(&json!("hello"), 40), "hello");
/// assert_eq!(preview_value(&json!([1, 2, 3]), 40), "[3 items]");
/// assert_eq!(preview_value(&json!({"a": 1}), 40), "{1 keys}");
/// ```
#[must_use]
pub fn preview_value(value: &Value, max_len: usize) -> String {
    let rendered = match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => format!("[{} items]", items.len()),
        Value::Object(map) => format!("{{{} keys}}", map.len()),
        other => other.to_string(),
    };
    truncate_chars(&rendered, max_len)
}

/// Truncate a string to at most `max_len` characters, appending `…` when
/// anything was cut.
#[must_use]
pub fn truncate_chars(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_len.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Preview every value of a map, with keys sorted for stable output.
/// Used for span input/output snapshots.
#[must_use]
pub fn preview_map(
    map: &rustc_hash::FxHashMap<String, Value>,
    max_len: usize,
) -> Value {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    let object: serde_json::Map<String, Value> = keys
        .into_iter()
        .map(|k| (k.clone(), Value::String(preview_value(&map[k], max_len))))
        .collect();
    Value::Object(object)
}

/// Extract a non-empty string from a JSON value, accepting only the string
/// variant. Numeric and structured values are not silently stringified;
/// routing decisions depend on that distinction.
#[must_use]
pub fn non_empty_str(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn preview_truncates_long_strings() {
        let long = "x".repeat(300);
        let preview = preview_value(&json!(long), 50);
        assert_eq!(preview.chars().count(), 50);
        assert!(preview.ends_with('…'));
    }

    #[test]
    fn preview_summarises_containers() {
        assert_eq!(preview_value(&json!(vec![0; 8]), 40), "[8 items]");
        assert_eq!(preview_value(&json!({"a": 1, "b": 2}), 40), "{2 keys}");
        assert_eq!(preview_value(&json!(3.5), 40), "3.5");
    }

    #[test]
    fn non_empty_str_rejects_blank_and_non_string() {
        assert_eq!(non_empty_str(&json!("  ")), None);
        assert_eq!(non_empty_str(&json!(42)), None);
        assert_eq!(non_empty_str(&json!("q")), Some("q"));
    }
}
