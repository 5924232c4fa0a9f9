//! Deep merge and dotted-path helpers for configuration values.
//!
//! Merge policy: objects merge key-wise and recursively; arrays, scalars and
//! `null` on the patch side replace the base value wholesale.

use serde_json::{Map, Value};

use crate::error::{CoreError, CoreResult};

/// Merge `patch` into `base`, returning a new value.
pub fn deep_merge(base: &Value, patch: &Value) -> Value {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            let mut merged = base_map.clone();
            for (key, patch_value) in patch_map {
                let next = match merged.get(key) {
                    Some(existing) => deep_merge(existing, patch_value),
                    None => patch_value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Value::Object(merged)
        }
        _ => patch.clone(),
    }
}

/// Split a dotted path into segments, rejecting empty segments.
pub fn split_path(path: &str) -> CoreResult<Vec<&str>> {
    if path.is_empty() {
        return Ok(Vec::new());
    }
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(CoreError::InvalidPath(path.to_string()));
    }
    Ok(segments)
}

/// Build a nested single-key update object from a dotted path.
///
/// `path_to_update("server.tls.enabled", true)` yields
/// `{"server": {"tls": {"enabled": true}}}`.
pub fn path_to_update(path: &str, value: Value) -> CoreResult<Value> {
    let segments = split_path(path)?;
    if segments.is_empty() {
        return Err(CoreError::InvalidPath(path.to_string()));
    }
    Ok(segments.iter().rev().fold(value, |acc, segment| {
        let mut map = Map::new();
        map.insert((*segment).to_string(), acc);
        Value::Object(map)
    }))
}

/// Look up the value at a dotted path. The empty path is the root.
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let segments = split_path(path).ok()?;
    segments
        .iter()
        .try_fold(value, |current, segment| current.as_object()?.get(*segment))
}

/// Set the value at a dotted path, creating intermediate objects.
///
/// Non-object intermediates are replaced by objects.
pub fn set_path(target: &mut Value, path: &str, value: Value) -> CoreResult<()> {
    let segments = split_path(path)?;
    let Some((last, parents)) = segments.split_last() else {
        *target = value;
        return Ok(());
    };

    let mut current = target;
    for segment in parents {
        current = ensure_object(current)
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    ensure_object(current).insert((*last).to_string(), value);
    Ok(())
}

fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced with an object"),
    }
}

/// Remove the value at a dotted path, returning it if present.
pub fn remove_path(target: &mut Value, path: &str) -> Option<Value> {
    let segments = split_path(path).ok()?;
    let (last, parents) = segments.split_last()?;
    let mut current = target;
    for segment in parents {
        current = current.as_object_mut()?.get_mut(*segment)?;
    }
    current.as_object_mut()?.remove(*last)
}

/// Dotted paths of every leaf in `value`. Empty objects count as leaves.
pub fn leaf_paths(value: &Value) -> Vec<String> {
    fn walk(value: &Value, prefix: &str, out: &mut Vec<String>) {
        match value {
            Value::Object(map) if !map.is_empty() => {
                for (key, child) in map {
                    let path = if prefix.is_empty() {
                        key.clone()
                    } else {
                        format!("{prefix}.{key}")
                    };
                    walk(child, &path, out);
                }
            }
            _ => out.push(prefix.to_string()),
        }
    }

    let mut out = Vec::new();
    walk(value, "", &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deep_merge_objects_recurse() {
        let base = json!({"server": {"name": "s1", "port": 80}, "debug": false});
        let patch = json!({"server": {"port": 8080}, "features": {"beta": true}});
        let merged = deep_merge(&base, &patch);
        assert_eq!(
            merged,
            json!({
                "server": {"name": "s1", "port": 8080},
                "debug": false,
                "features": {"beta": true}
            })
        );
    }

    #[test]
    fn test_deep_merge_replaces_arrays_and_scalars() {
        let base = json!({"hosts": ["a", "b"], "limit": {"max": 1}});
        let patch = json!({"hosts": ["c"], "limit": 5});
        assert_eq!(deep_merge(&base, &patch), json!({"hosts": ["c"], "limit": 5}));
    }

    #[test]
    fn test_deep_merge_null_replaces() {
        let merged = deep_merge(&json!({"a": {"b": 1}}), &json!({"a": null}));
        assert_eq!(merged, json!({"a": null}));
    }

    #[test]
    fn test_path_to_update() {
        let update = path_to_update("server.tls.enabled", json!(true)).unwrap();
        assert_eq!(update, json!({"server": {"tls": {"enabled": true}}}));

        assert!(path_to_update("", json!(1)).is_err());
        assert!(path_to_update("a..b", json!(1)).is_err());
    }

    #[test]
    fn test_get_set_remove_path() {
        let mut value = json!({"a": {"b": 1}});
        assert_eq!(get_path(&value, "a.b"), Some(&json!(1)));
        assert_eq!(get_path(&value, ""), Some(&value.clone()));
        assert!(get_path(&value, "a.c").is_none());

        set_path(&mut value, "a.c.d", json!("x")).unwrap();
        assert_eq!(value, json!({"a": {"b": 1, "c": {"d": "x"}}}));

        set_path(&mut value, "a.b.e", json!(2)).unwrap();
        assert_eq!(get_path(&value, "a.b.e"), Some(&json!(2)));

        assert_eq!(remove_path(&mut value, "a.c"), Some(json!({"d": "x"})));
        assert!(remove_path(&mut value, "missing.key").is_none());
    }

    #[test]
    fn test_leaf_paths() {
        let mut paths = leaf_paths(&json!({"a": {"b": 1, "c": {}}, "d": [1, 2]}));
        paths.sort();
        assert_eq!(paths, vec!["a.b", "a.c", "d"]);
    }
}
