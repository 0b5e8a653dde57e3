//! Keyed replacement
//!
//! `replace_all` sets every occurrence of a key, either to one broadcast
//! value or positionally from a list. The call is all-or-nothing: a dry run
//! checks counts and types before anything is written.

use serde_json::{Map, Value};

use crate::document::ValueKind;
use crate::error::PatchError;
use crate::walker::{for_each_key, for_each_key_mut};

/// Replace the value at every occurrence of `key`.
///
/// - one value: broadcast to all occurrences
/// - n values: the i-th occurrence (walker order) gets the i-th value
///
/// Every occurrence must currently hold the same JSON kind as
/// `new_values[0]`. Returns the number of occurrences replaced.
pub fn replace_all(doc: &mut Value, key: &str, new_values: Vec<Value>) -> Result<usize, PatchError> {
    let Some(sample) = new_values.first() else {
        return Err(PatchError::EmptyReplacement {
            key: key.to_string(),
        });
    };
    let expected = ValueKind::of(sample);

    // Dry run: count and type-check
    let mut occurrences = 0;
    let mut mismatch: Option<PatchError> = None;
    for_each_key(doc, key, |map, key, path| {
        occurrences += 1;
        let actual = ValueKind::of(&map[key]);
        if mismatch.is_none() && actual != expected {
            mismatch = Some(PatchError::TypeMismatch {
                key: key.to_string(),
                path: path.to_string(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }
    });
    if let Some(err) = mismatch {
        return Err(err);
    }

    let values = if new_values.len() == 1 {
        vec![new_values[0].clone(); occurrences]
    } else if new_values.len() == occurrences {
        new_values
    } else {
        return Err(PatchError::CountMismatch {
            key: key.to_string(),
            occurrences,
            values: new_values.len(),
        });
    };

    let mut values = values.into_iter();
    for_each_key_mut(doc, key, |map, key, _| {
        if let Some(value) = values.next() {
            map.insert(key.to_string(), value);
        }
    });

    tracing::debug!(key, occurrences, "replaced key");
    Ok(occurrences)
}

/// Apply `update` to the parent map of every occurrence of `key`.
///
/// The unchecked counterpart of [`replace_all`]; returns the number of
/// occurrences visited.
pub fn update_all<F>(doc: &mut Value, key: &str, mut update: F) -> usize
where
    F: FnMut(&mut Map<String, Value>, &str),
{
    let mut visited = 0;
    for_each_key_mut(doc, key, |map, key, _| {
        visited += 1;
        update(map, key);
    });
    visited
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn build_doc() -> Value {
        json!({
            "Build": {"Destination": "a", "Resolution": 1024},
            "Stages": [
                {"Destination": "b"},
                {"Nested": {"Destination": "c"}}
            ]
        })
    }

    #[test]
    fn broadcast_single_value() {
        let mut doc = build_doc();
        let n = replace_all(&mut doc, "Destination", vec![json!("out")]).unwrap();
        assert_eq!(n, 3);
        assert_eq!(doc["Build"]["Destination"], "out");
        assert_eq!(doc["Stages"][0]["Destination"], "out");
        assert_eq!(doc["Stages"][1]["Nested"]["Destination"], "out");
    }

    #[test]
    fn positional_values() {
        let mut doc = build_doc();
        replace_all(&mut doc, "Destination", vec![json!("x"), json!("y"), json!("z")]).unwrap();
        assert_eq!(doc["Build"]["Destination"], "x");
        assert_eq!(doc["Stages"][0]["Destination"], "y");
        assert_eq!(doc["Stages"][1]["Nested"]["Destination"], "z");
    }

    #[test]
    fn empty_values_rejected() {
        let mut doc = build_doc();
        let err = replace_all(&mut doc, "Destination", vec![]).unwrap_err();
        assert!(matches!(err, PatchError::EmptyReplacement { .. }));
    }

    #[test]
    fn count_mismatch_rejected() {
        let mut doc = build_doc();
        let err = replace_all(&mut doc, "Destination", vec![json!("x"), json!("y")]).unwrap_err();
        match err {
            PatchError::CountMismatch {
                occurrences, values, ..
            } => {
                assert_eq!(occurrences, 3);
                assert_eq!(values, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(doc, build_doc());
    }

    #[test]
    fn type_mismatch_leaves_document_untouched() {
        let mut doc = json!({"a": {"K": "s"}, "b": {"K": 3}});
        let before = doc.clone();
        let err = replace_all(&mut doc, "K", vec![json!("new")]).unwrap_err();
        match err {
            PatchError::TypeMismatch {
                path, expected, actual, ..
            } => {
                assert_eq!(path, "/b/K");
                assert_eq!(expected, "string");
                assert_eq!(actual, "integer");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(doc, before);
    }

    #[test]
    fn integer_is_not_float() {
        let mut doc = json!({"Scale": 1.5});
        assert!(replace_all(&mut doc, "Scale", vec![json!(2)]).is_err());
        assert!(replace_all(&mut doc, "Scale", vec![json!(2.0)]).is_ok());
    }

    #[test]
    fn absent_key_is_a_no_op() {
        let mut doc = build_doc();
        assert_eq!(replace_all(&mut doc, "PostBuildScript", vec![json!("")]).unwrap(), 0);
        assert_eq!(doc, build_doc());
    }

    #[test]
    fn match_does_not_recurse_into_matched_value() {
        let mut doc = json!({"K": {"K": 1}});
        assert_eq!(replace_all(&mut doc, "K", vec![json!({})]).unwrap(), 1);
        assert_eq!(doc, json!({"K": {}}));
    }

    #[test]
    fn update_all_sees_parent_map() {
        let mut doc = json!({"Variables": {"a": "1", "b": "2"}, "x": {"Variables": {"a": "3"}}});
        let visited = update_all(&mut doc, "Variables", |map, key| {
            if let Some(Value::Object(vars)) = map.get_mut(key) {
                if let Some(a) = vars.get_mut("a") {
                    *a = json!("9");
                }
            }
        });
        assert_eq!(visited, 2);
        assert_eq!(doc["Variables"]["a"], "9");
        assert_eq!(doc["Variables"]["b"], "2");
        assert_eq!(doc["x"]["Variables"]["a"], "9");
    }
}
