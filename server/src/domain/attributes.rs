//! Flatten and unflatten dotted attribute keys
//!
//! Storage and filter keys address nested attributes in dot notation:
//! `{"ag": {"metrics": {"tokens": {"total": 15}}}}` round-trips through
//! `{"ag.metrics.tokens.total": 15}`. List elements use numeric path
//! segments (`"tools.0.name"`).

use serde_json::{Map as JsonMap, Value as JsonValue};

/// Flatten a nested JSON value into a single-level map keyed by dot paths.
///
/// Scalars and empty containers are stored as leaves; list positions become
/// numeric segments. The output is order-insensitive with respect to
/// [`unmarshall`].
pub fn marshall(value: &JsonValue) -> JsonMap<String, JsonValue> {
    let mut flat = JsonMap::new();
    flatten_into(&mut flat, String::new(), value);
    flat
}

fn flatten_into(flat: &mut JsonMap<String, JsonValue>, prefix: String, value: &JsonValue) {
    match value {
        JsonValue::Object(map) if !map.is_empty() => {
            for (key, val) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_into(flat, path, val);
            }
        }
        JsonValue::Array(items) if !items.is_empty() => {
            for (idx, val) in items.iter().enumerate() {
                let path = if prefix.is_empty() {
                    idx.to_string()
                } else {
                    format!("{}.{}", prefix, idx)
                };
                flatten_into(flat, path, val);
            }
        }
        leaf => {
            // Root-level scalar has no path to hang it on
            if !prefix.is_empty() {
                flat.insert(prefix, leaf.clone());
            }
        }
    }
}

/// Rebuild a nested JSON value from a flat dot-path map.
///
/// Segments that parse as non-negative integers are treated as list
/// indices. Gaps in a created list are filled with `null` placeholders;
/// a placeholder a later key navigates into becomes a list or a map
/// depending on whether the next segment is numeric.
pub fn unmarshall(flat: &JsonMap<String, JsonValue>) -> JsonValue {
    let mut root = JsonValue::Object(JsonMap::new());
    for (path, value) in flat {
        let segments: Vec<&str> = path.split('.').collect();
        set_path(&mut root, &segments, value.clone());
    }
    root
}

/// Set `value` at a dotted path inside `root`, creating intermediate
/// containers as needed. Also used by metrics propagation to write
/// computed breakdowns back into span attributes.
pub fn set_path(root: &mut JsonValue, segments: &[&str], value: JsonValue) {
    if segments.is_empty() {
        return;
    }

    let mut current = root;
    for (i, segment) in segments.iter().enumerate() {
        let is_last = i == segments.len() - 1;
        let next_is_index = segments
            .get(i + 1)
            .is_some_and(|s| s.parse::<usize>().is_ok());

        match segment.parse::<usize>() {
            Ok(idx) => {
                // Numeric segment: the current container must be a list
                if !current.is_array() {
                    *current = JsonValue::Array(Vec::new());
                }
                let arr = current.as_array_mut().unwrap();
                while arr.len() <= idx {
                    arr.push(JsonValue::Null);
                }
                if is_last {
                    arr[idx] = value;
                    return;
                }
                if arr[idx].is_null() {
                    arr[idx] = empty_container(next_is_index);
                }
                current = &mut arr[idx];
            }
            Err(_) => {
                if !current.is_object() {
                    *current = JsonValue::Object(JsonMap::new());
                }
                let map = current.as_object_mut().unwrap();
                if is_last {
                    map.insert(segment.to_string(), value);
                    return;
                }
                current = map
                    .entry(segment.to_string())
                    .or_insert_with(|| empty_container(next_is_index));
                if current.is_null() {
                    *current = empty_container(next_is_index);
                }
            }
        }
    }
}

fn empty_container(as_list: bool) -> JsonValue {
    if as_list {
        JsonValue::Array(Vec::new())
    } else {
        JsonValue::Object(JsonMap::new())
    }
}

/// Read the value at a dotted path, if present.
pub fn get_path<'a>(root: &'a JsonValue, segments: &[&str]) -> Option<&'a JsonValue> {
    let mut current = root;
    for segment in segments {
        current = match current {
            JsonValue::Object(map) => map.get(*segment)?,
            JsonValue::Array(arr) => arr.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}
