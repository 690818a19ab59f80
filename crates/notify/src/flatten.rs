//! Flatten JSON documents into `key.path=value` pairs.

use serde_json::Value;

/// Flatten a JSON value into space-separated `path=value` pairs.
///
/// Object keys are joined with `.`, array elements get an `[i]` suffix, and
/// fields keep document order. Strings are emitted unquoted; empty objects and
/// arrays contribute nothing.
#[must_use]
pub fn flatten_json(value: &Value) -> String {
    let mut pairs = Vec::new();
    collect(value, String::new(), &mut pairs);
    pairs.join(" ")
}

fn collect(value: &Value, prefix: String, pairs: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                collect(child, path, pairs);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                collect(child, format!("{prefix}[{index}]"), pairs);
            }
        }
        Value::String(s) => pairs.push(format!("{prefix}={s}")),
        scalar => pairs.push(format!("{prefix}={scalar}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_object_and_array() {
        let value = json!({"a": {"b": 1}, "c": [2, 3]});
        assert_eq!(flatten_json(&value), "a.b=1 c[0]=2 c[1]=3");
    }

    #[test]
    fn test_preserves_document_order() {
        let value: Value = serde_json::from_str(r#"{"z": 1, "a": 2, "m": {"y": true, "b": null}}"#)
            .unwrap();
        assert_eq!(flatten_json(&value), "z=1 a=2 m.y=true m.b=null");
    }

    #[test]
    fn test_strings_unquoted_and_arrays_of_objects() {
        let value = json!({
            "name": "Brute force",
            "targets": [{"host": "vpn-1"}, {"host": "vpn-2"}],
            "empty": {},
            "none": []
        });
        assert_eq!(
            flatten_json(&value),
            "name=Brute force targets[0].host=vpn-1 targets[1].host=vpn-2"
        );
    }
}
