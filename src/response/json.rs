//! Locating and repairing JSON embedded in free-form model output.
//!
//! Models asked for JSON routinely wrap it in a fenced code block, surround it
//! with prose, or leave a trailing comma before a closing bracket. The helpers
//! here undo those habits before handing the text to `serde_json`.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::PlanError;

/// ```` ```json ... ``` ```` or a bare ```` ``` ... ``` ```` fence.
static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)```").expect("valid fence regex"));

/// From the first opener to the last matching closer of the same kind.
static BRACKETED_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)(\{.*\}|\[.*\])").expect("valid span regex"));

static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([}\]])").expect("valid trailing comma regex"));

/// Pull the most likely JSON payload out of `text` and strip trailing commas.
///
/// A fenced code block wins over a bracketed span. When neither is present the
/// whole text is returned (minus trailing commas) so that `serde_json` reports
/// the failure.
pub fn extract_json_candidate(text: &str) -> String {
    let candidate = if let Some(caps) = FENCED_BLOCK.captures(text) {
        caps[1].trim().to_string()
    } else if let Some(caps) = BRACKETED_SPAN.captures(text) {
        caps[1].trim().to_string()
    } else {
        text.to_string()
    };

    TRAILING_COMMA.replace_all(&candidate, "$1").into_owned()
}

/// Extract and parse the JSON payload in `text`.
pub fn parse_embedded_json(text: &str) -> Result<Value, PlanError> {
    let cleaned = extract_json_candidate(text);
    serde_json::from_str(&cleaned).map_err(PlanError::Malformed)
}

/// Integer coercion for `action_id` values.
///
/// Integers pass through, finite floats truncate toward zero, strings are
/// trimmed and parsed in base 10, booleans map to 0/1.
pub fn coerce_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)
                .map(|f| f.trunc() as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

/// Float coercion for continuous action components.
pub fn coerce_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fenced_block_takes_priority_over_prose_brackets() {
        let text = "I think [maybe] this:\n```json\n{\"a\": 1}\n```\nthanks";
        assert_eq!(extract_json_candidate(text), "{\"a\": 1}");
    }

    #[test]
    fn fence_without_language_tag() {
        let text = "```\n[1, 2]\n```";
        assert_eq!(extract_json_candidate(text), "[1, 2]");
    }

    #[test]
    fn bracketed_span_runs_to_last_closer() {
        let text = "prefix {\"a\": {\"b\": 2}} suffix } tail";
        assert_eq!(extract_json_candidate(text), "{\"a\": {\"b\": 2}} suffix }");
    }

    #[test]
    fn trailing_commas_are_stripped() {
        let text = "{\"plan\": [1, 2, ], \"x\": {\"y\": 3,\n}, }";
        assert_eq!(
            extract_json_candidate(text),
            "{\"plan\": [1, 2], \"x\": {\"y\": 3}}"
        );
    }

    #[test]
    fn text_without_json_is_returned_unchanged() {
        assert_eq!(extract_json_candidate("no json here"), "no json here");
        assert!(parse_embedded_json("no json here").is_err());
    }

    #[test]
    fn integer_coercion_rules() {
        assert_eq!(coerce_integer(&json!(4)), Some(4));
        assert_eq!(coerce_integer(&json!(-2)), Some(-2));
        assert_eq!(coerce_integer(&json!(2.9)), Some(2));
        assert_eq!(coerce_integer(&json!(" 7 ")), Some(7));
        assert_eq!(coerce_integer(&json!("2.5")), None);
        assert_eq!(coerce_integer(&json!("seven")), None);
        assert_eq!(coerce_integer(&json!(true)), Some(1));
        assert_eq!(coerce_integer(&json!(null)), None);
        assert_eq!(coerce_integer(&json!([1])), None);
    }

    #[test]
    fn float_coercion_rules() {
        assert_eq!(coerce_float(&json!(1.5)), Some(1.5));
        assert_eq!(coerce_float(&json!(3)), Some(3.0));
        assert_eq!(coerce_float(&json!("0.25")), Some(0.25));
        assert_eq!(coerce_float(&json!(false)), Some(0.0));
        assert_eq!(coerce_float(&json!({"x": 1})), None);
    }
}
