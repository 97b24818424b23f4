//! Ready-made merge strategies for JSON entities.

use serde_json::Value;

/// Overlay the top-level fields of `incoming` onto `existing`.
///
/// Fields absent from `incoming` keep their stored value. If either side is
/// not a JSON object, `incoming` replaces `existing` outright.
pub fn shallow_merge(incoming: Value, existing: &Value) -> Value {
    match (incoming, existing) {
        (Value::Object(fields), Value::Object(stored)) => {
            let mut merged = stored.clone();
            merged.extend(fields);
            Value::Object(merged)
        }
        (incoming, _) => incoming,
    }
}
