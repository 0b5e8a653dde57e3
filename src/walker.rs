//! Key-addressed tree walker
//!
//! Finds every map that contains a target key and hands that map (the
//! parent of the matched value) to a callback.
//!
//! Traversal rules:
//! - maps in insertion order, sequences in index order
//! - on a match the callback fires once, at the key's position in its map
//! - the matched value is NOT descended into; the walker moves on to the
//!   map's remaining keys and sibling branches
//!
//! The order is fully determined by the document, so "the i-th occurrence"
//! of a key is stable between passes. A key nested inside its own match
//! (e.g. `Nodes` within a `Nodes` value) is never visited.

use serde_json::{Map, Value};

use crate::document::pointer_push;

/// Visit every occurrence of `key`, read-only.
///
/// The callback receives the containing map, the key and the JSON pointer of
/// the matched value.
pub fn for_each_key<F>(doc: &Value, key: &str, mut callback: F)
where
    F: FnMut(&Map<String, Value>, &str, &str),
{
    walk(doc, key, "", &mut callback);
}

fn walk<F>(value: &Value, key: &str, path: &str, callback: &mut F)
where
    F: FnMut(&Map<String, Value>, &str, &str),
{
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                let child = pointer_push(path, k);
                if k == key {
                    callback(map, key, &child);
                } else {
                    walk(v, key, &child, callback);
                }
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                walk(item, key, &pointer_push(path, &i.to_string()), callback);
            }
        }
        _ => {}
    }
}

/// Visit every occurrence of `key` with mutable access to the containing map.
///
/// Same order as [`for_each_key`]. The callback may replace the matched
/// value (or any sibling); keys are snapshotted per map before visiting.
pub fn for_each_key_mut<F>(doc: &mut Value, key: &str, mut callback: F)
where
    F: FnMut(&mut Map<String, Value>, &str, &str),
{
    walk_mut(doc, key, "", &mut callback);
}

fn walk_mut<F>(value: &mut Value, key: &str, path: &str, callback: &mut F)
where
    F: FnMut(&mut Map<String, Value>, &str, &str),
{
    match value {
        Value::Object(map) => {
            let keys: Vec<String> = map.keys().cloned().collect();
            for k in keys {
                let child = pointer_push(path, &k);
                if k == key {
                    callback(map, key, &child);
                } else if let Some(v) = map.get_mut(&k) {
                    walk_mut(v, key, &child, callback);
                }
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter_mut().enumerate() {
                walk_mut(item, key, &pointer_push(path, &i.to_string()), callback);
            }
        }
        _ => {}
    }
}

/// Number of occurrences of `key` under the walker's rules.
pub fn count_key(doc: &Value, key: &str) -> usize {
    let mut count = 0;
    for_each_key(doc, key, |_, _, _| count += 1);
    count
}
