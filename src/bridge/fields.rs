//! FieldsV1 ownership sets
//!
//! Server-side apply records, per field manager, the set of fields the
//! manager owns as a `FieldsV1` trie:
//!
//! ```text
//! {"f:spec": {"f:logLevel": {}, "f:observedConfig": {".": {}, "f:proxy": {}}},
//!  "f:status": {"f:conditions": {"k:{\"type\":\"Available\"}": {".": {}, "f:status": {}}}}}
//! ```
//!
//! - `f:<name>` a field of an object
//! - `k:<json>` a list element identified by its merge key fields
//! - `v:<json>` a set-list element identified by its value
//! - `i:<index>` a list element identified by position
//! - `.` the node itself

use serde_json::{Map, Value};

const SELF_MARKER: &str = ".";

/// Extract the parts of `value` described by the ownership set `set`.
///
/// Returns `None` when nothing in `value` is covered by `set`.
pub fn extract_owned(value: &Value, set: &Value) -> Option<Value> {
    let set = set.as_object()?;
    if is_leaf(set) {
        return Some(value.clone());
    }

    match value {
        Value::Object(fields) => extract_object(fields, set),
        Value::Array(items) => extract_list(items, set),
        // A scalar with child entries was replaced by a different type
        // since the set was recorded; the scalar itself is still owned.
        other => Some(other.clone()),
    }
}

/// Deep union of two ownership sets
pub fn merge_sets(into: &mut Value, other: &Value) {
    match (into, other) {
        (Value::Object(dst), Value::Object(src)) => {
            for (k, v) in src {
                match dst.get_mut(k) {
                    Some(existing) => merge_sets(existing, v),
                    None => {
                        dst.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (dst, src) => *dst = src.clone(),
    }
}

fn is_leaf(set: &Map<String, Value>) -> bool {
    set.keys().all(|k| k == SELF_MARKER)
}

fn extract_object(fields: &Map<String, Value>, set: &Map<String, Value>) -> Option<Value> {
    let mut out = Map::new();
    for (key, child_set) in set {
        let Some(name) = key.strip_prefix("f:") else {
            continue;
        };
        let Some(child) = fields.get(name) else {
            continue;
        };
        if let Some(extracted) = extract_owned(child, child_set) {
            out.insert(name.to_string(), extracted);
        }
    }

    if out.is_empty() {
        None
    } else {
        Some(Value::Object(out))
    }
}

fn extract_list(items: &[Value], set: &Map<String, Value>) -> Option<Value> {
    let mut out: Vec<(usize, Value)> = Vec::new();
    for (key, child_set) in set {
        if let Some(raw) = key.strip_prefix("k:") {
            let Ok(Value::Object(merge_key)) = serde_json::from_str::<Value>(raw) else {
                continue;
            };
            let Some(index) = items.iter().position(|item| matches_key(item, &merge_key)) else {
                continue;
            };
            let mut element = merge_key;
            if let Some(Value::Object(owned)) = extract_owned(&items[index], child_set) {
                element.extend(owned);
            }
            out.push((index, Value::Object(element)));
        } else if let Some(raw) = key.strip_prefix("v:") {
            let Ok(wanted) = serde_json::from_str::<Value>(raw) else {
                continue;
            };
            if let Some(index) = items.iter().position(|item| *item == wanted) {
                out.push((index, wanted));
            }
        } else if let Some(raw) = key.strip_prefix("i:") {
            let Some(index) = raw.parse::<usize>().ok().filter(|i| *i < items.len()) else {
                continue;
            };
            if let Some(extracted) = extract_owned(&items[index], child_set) {
                out.push((index, extracted));
            }
        }
    }

    if out.is_empty() {
        return None;
    }
    // Keep the live list order
    out.sort_by_key(|(index, _)| *index);
    Some(Value::Array(out.into_iter().map(|(_, v)| v).collect()))
}

fn matches_key(item: &Value, merge_key: &Map<String, Value>) -> bool {
    merge_key
        .iter()
        .all(|(k, v)| item.get(k).map_or(false, |actual| actual == v))
}
