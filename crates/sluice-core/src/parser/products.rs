//! One-shot extraction of the `[PRODUCTS:<json array>]` payload.

use serde_json::Value;
use tracing::warn;

use super::scanner::{MarkerKind, find_close};

/// Parse the first products marker in `raw`.
///
/// Missing, unterminated, malformed or non-array payloads all yield an
/// empty list.
pub fn extract_products(raw: &str) -> Vec<Value> {
    let opener = MarkerKind::Products.opener();
    let Some(start) = raw.find(opener) else {
        return Vec::new();
    };
    let rest = &raw[start..];
    let Some(close) = find_close(MarkerKind::Products, rest) else {
        warn!("products marker is unterminated");
        return Vec::new();
    };

    match serde_json::from_str::<Value>(rest[opener.len()..close].trim()) {
        Ok(Value::Array(items)) => items,
        Ok(other) => {
            warn!(kind = %json_kind(&other), "products payload is not an array");
            Vec::new()
        }
        Err(e) => {
            warn!(error = %e, "products payload is not valid JSON");
            Vec::new()
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
