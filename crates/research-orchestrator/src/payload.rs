use serde_json::{json, Map, Value};

/// Default string cap inside the compact payload.
const STRING_CAP: usize = 300;
/// Narrative fields keep more room.
const LONG_STRING_CAP: usize = 900;

fn cap_for(key: Option<&str>) -> usize {
    match key {
        Some(key) => {
            let lower = key.to_lowercase();
            if lower.contains("summary") || lower.contains("explanation") || lower.contains("mda")
            {
                LONG_STRING_CAP
            } else {
                STRING_CAP
            }
        }
        None => STRING_CAP,
    }
}

fn truncate_chars(s: &str, cap: usize) -> String {
    match s.char_indices().nth(cap) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// Compact one node. `None` means the node is dropped entirely: nulls,
/// non-finite numbers, empty containers and all-null objects disappear.
fn compact(key: Option<&str>, value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(Value::Bool(*b)),
        Value::Number(n) => {
            if n.as_f64().map(f64::is_finite).unwrap_or(true) {
                Some(Value::Number(n.clone()))
            } else {
                None
            }
        }
        Value::String(s) => Some(Value::String(truncate_chars(s, cap_for(key)))),
        Value::Array(items) => {
            let compacted: Vec<Value> =
                items.iter().filter_map(|item| compact(key, item)).collect();
            if compacted.is_empty() {
                None
            } else {
                Some(Value::Array(compacted))
            }
        }
        Value::Object(map) => {
            let mut compacted = Map::new();
            for (k, v) in map {
                if let Some(kept) = compact(Some(k), v) {
                    compacted.insert(k.clone(), kept);
                }
            }
            if compacted.is_empty() {
                None
            } else {
                Some(Value::Object(compacted))
            }
        }
    }
}

/// Slims a payload for the LLM: strings truncated (300 chars, 900 for
/// narrative fields), nulls and empty containers dropped.
pub fn compact_payload(value: &Value) -> Value {
    compact(None, value).unwrap_or_else(|| json!({}))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_truncate_by_field_kind() {
        let payload = json!({
            "note": "x".repeat(1000),
            "mda_summary": "y".repeat(1000),
        });
        let compacted = compact_payload(&payload);
        assert_eq!(compacted["note"].as_str().unwrap().len(), 300);
        assert_eq!(compacted["mda_summary"].as_str().unwrap().len(), 900);
    }

    #[test]
    fn nulls_and_empties_are_dropped() {
        let payload = json!({
            "keep": 1,
            "gone": null,
            "empty_list": [],
            "empty_obj": {},
            "all_null": {"a": null, "b": null},
            "nested": {"keep": "v", "gone": null},
        });
        let compacted = compact_payload(&payload);
        assert_eq!(compacted, json!({"keep": 1, "nested": {"keep": "v"}}));
    }

    #[test]
    fn arrays_keep_surviving_members() {
        let payload = json!({"items": [null, 1, {"x": null}, "a"]});
        let compacted = compact_payload(&payload);
        assert_eq!(compacted["items"], json!([1, "a"]));
    }

    #[test]
    fn unicode_truncation_is_boundary_safe() {
        let payload = json!({"note": "動".repeat(400)});
        let compacted = compact_payload(&payload);
        assert_eq!(compacted["note"].as_str().unwrap().chars().count(), 300);
    }

    #[test]
    fn fully_empty_payload_collapses_to_object() {
        assert_eq!(compact_payload(&json!({"a": null})), json!({}));
    }
}
