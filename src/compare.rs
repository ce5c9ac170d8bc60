//! Structural equality between a draft asset and its published copy.
//!
//! Volatile keys are stripped and list order is ignored. Catalog-native
//! references (anything that is not business metadata) compare by `_id`.

use serde_json::{Map, Number, Value};

use crate::model::types::is_business_metadata;

/// Keys that change on every edit or differ between draft and published copies
pub const DEFAULT_IGNORED_KEYS: &[&str] = &[
    "history",
    "created_on",
    "created_by",
    "modified_on",
    "modified_by",
    "_url",
    "paging",
    "workflow_current_state",
    "workflow_stored_state",
];

/// Compares a draft asset with its published counterpart, ignoring volatile
/// keys and the order of every list.
pub fn same_asset(dev: &Value, published: &Value, ignored_keys: &[&str]) -> bool {
    let dev = strip(dev, ignored_keys);
    let published = strip(published, ignored_keys);
    values_eq(&dev, &published)
}

fn strip(value: &Value, ignored_keys: &[&str]) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| !ignored_keys.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), strip(v, ignored_keys)))
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| strip(v, ignored_keys)).collect())
        }
        other => other.clone(),
    }
}

/// Catalog-native references are never edited through workflow, so their id is enough
fn native_id(map: &Map<String, Value>) -> Option<&str> {
    let asset_type = map.get("_type")?.as_str()?;
    if is_business_metadata(asset_type) {
        return None;
    }
    map.get("_id")?.as_str()
}

fn values_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(a), Value::Object(b)) => {
            if let (Some(id_a), Some(id_b)) = (native_id(a), native_id(b)) {
                return id_a == id_b;
            }
            if a.len() != b.len() {
                return false;
            }
            a.iter().all(|(key, a_value)| match b.get(key) {
                Some(b_value) => values_eq(a_value, b_value),
                None => false,
            })
        }
        (Value::Array(a), Value::Array(b)) => {
            if a.len() != b.len() {
                return false;
            }
            let mut a_sorted: Vec<&Value> = a.iter().collect();
            let mut b_sorted: Vec<&Value> = b.iter().collect();
            a_sorted.sort_by_cached_key(|v| sort_key(v));
            b_sorted.sort_by_cached_key(|v| sort_key(v));
            a_sorted
                .iter()
                .zip(b_sorted)
                .all(|(a_item, b_item)| values_eq(a_item, b_item))
        }
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => a == b,
        },
        _ => a == b,
    }
}

/// Objects sort by `type::name::id` (natives by `type::id`), scalars by
/// value; ties fall back to a canonical rendering so equal lists line up.
fn sort_key(value: &Value) -> (u8, String, String) {
    match value {
        Value::Null => (0, String::new(), String::new()),
        Value::Bool(b) => (1, b.to_string(), String::new()),
        Value::Number(n) => (2, number_key(n), String::new()),
        Value::String(s) => (3, s.clone(), String::new()),
        Value::Array(_) => (4, String::new(), canonical(value)),
        Value::Object(map) => {
            let field = |k: &str| map.get(k).and_then(Value::as_str).unwrap_or_default();
            match native_id(map) {
                Some(id) => (5, format!("{}::{}", field("_type"), id), String::new()),
                None => (
                    5,
                    format!("{}::{}::{}", field("_type"), field("_name"), field("_id")),
                    canonical(value),
                ),
            }
        }
    }
}

/// Orders numbers by value so `1` and `1.0` share a key
fn number_key(n: &Number) -> String {
    match n.as_f64() {
        Some(x) => {
            let bits = (x + 0.0).to_bits();
            let ordered = if bits >> 63 == 1 { !bits } else { bits | (1 << 63) };
            format!("{:016x}", ordered)
        }
        None => n.to_string(),
    }
}

fn canonical(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            if let Some(id) = native_id(map) {
                return format!("<{}>", id);
            }
            let mut entries: Vec<(&String, String)> =
                map.iter().map(|(k, v)| (k, canonical(v))).collect();
            entries.sort();
            let body: Vec<String> = entries
                .into_iter()
                .map(|(k, v)| format!("{:?}:{}", k, v))
                .collect();
            format!("{{{}}}", body.join(","))
        }
        Value::Array(items) => {
            let mut rendered: Vec<String> = items.iter().map(canonical).collect();
            rendered.sort();
            format!("[{}]", rendered.join(","))
        }
        Value::Number(n) => number_key(n),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_list_order_is_ignored() {
        let a = json!({"_type": "term", "_name": "A", "labels": ["pii", "gold"], "n": 1});
        let b = json!({"_type": "term", "_name": "A", "labels": ["gold", "pii"], "n": 1.0});
        assert!(same_asset(&a, &b, DEFAULT_IGNORED_KEYS));
        assert!(same_asset(&b, &a, DEFAULT_IGNORED_KEYS));
    }

    #[test]
    fn test_volatile_keys_are_stripped() {
        let a = json!({"_type": "term", "_name": "A", "modified_on": 1, "history": [1, 2]});
        let b = json!({"_type": "term", "_name": "A", "modified_on": 2});
        assert!(same_asset(&a, &b, DEFAULT_IGNORED_KEYS));
        assert!(!same_asset(&a, &b, &[]));
    }

    #[test]
    fn test_native_objects_compare_by_id() {
        let a = json!({"assigned_assets": [
            {"_type": "database_column", "_name": "ID", "_id": "c1", "_context": [1]},
            {"_type": "database_column", "_name": "NAME", "_id": "c2"}
        ]});
        let b = json!({"assigned_assets": [
            {"_type": "database_column", "_name": "NAME", "_id": "c2"},
            {"_type": "database_column", "_name": "ID (renamed)", "_id": "c1"}
        ]});
        assert!(same_asset(&a, &b, DEFAULT_IGNORED_KEYS));
    }

    #[test]
    fn test_renamed_native_lines_up_by_id() {
        let dev = json!({"l": [
            {"_type": "database_column", "_name": "A", "_id": "id1"},
            {"_type": "database_column", "_name": "B", "_id": "id2"}
        ]});
        let published = json!({"l": [
            {"_type": "database_column", "_name": "Z", "_id": "id1"},
            {"_type": "database_column", "_name": "B", "_id": "id2"}
        ]});
        assert!(same_asset(&dev, &published, DEFAULT_IGNORED_KEYS));
        assert!(same_asset(&published, &dev, DEFAULT_IGNORED_KEYS));
    }

    #[test]
    fn test_integer_and_float_line_up_in_lists() {
        let a = json!({"scores": [{"v": 1}, {"v": 2.5}], "n": [10, 9, 1]});
        let b = json!({"scores": [{"v": 2.5}, {"v": 1.0}], "n": [1.0, 10.0, 9]});
        assert!(same_asset(&a, &b, DEFAULT_IGNORED_KEYS));
        assert!(same_asset(&b, &a, DEFAULT_IGNORED_KEYS));
    }

    #[test]
    fn test_business_metadata_objects_compare_deeply() {
        let a = json!({"synonyms": [{"_type": "term", "_name": "Client", "_id": "t1"}]});
        let b = json!({"synonyms": [{"_type": "term", "_name": "Customer", "_id": "t1"}]});
        assert!(!same_asset(&a, &b, DEFAULT_IGNORED_KEYS));
        assert!(!same_asset(&b, &a, DEFAULT_IGNORED_KEYS));
    }

    #[test]
    fn test_missing_keys_differ() {
        let a = json!({"short_description": "x"});
        let b = json!({"long_description": "x"});
        assert!(!same_asset(&a, &b, DEFAULT_IGNORED_KEYS));
        assert!(!same_asset(&a, &json!({"short_description": "x", "labels": []}), &[]));
    }
}
