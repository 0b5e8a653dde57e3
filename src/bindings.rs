//! Binding propagation
//!
//! A terrain file links variables to node properties with records like
//!
//! ```json
//! "Bindings": { "$values": [ { "Node": 183, "Property": "Seed", "Variable": "seed" } ] }
//! ```
//!
//! Nodes live in one or more `Nodes` collections (one per graph/stage),
//! keyed by arbitrary strings and carrying an integer `Id`. Propagation
//! writes each bound variable's value into the matching node's property.
//! A binding whose node cannot be resolved is reported and skipped; the
//! remaining bindings still apply.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::document::pointer_push;
use crate::error::PatchError;
use crate::variables::VariableTable;
use crate::walker::{for_each_key, for_each_key_mut};

pub const BINDINGS_KEY: &str = "Bindings";
pub const NODES_KEY: &str = "Nodes";
pub const ID_KEY: &str = "Id";

/// .NET reference-preserving serializers wrap arrays as `{"$values": [..]}`
const VALUES_KEY: &str = "$values";

/// Link from a variable to one node property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Binding {
    pub node: i64,
    pub property: String,
    pub variable: String,
}

/// Bindings found in a document, plus the records that could not be read.
#[derive(Debug, Default)]
pub struct BindingSet {
    pub bindings: Vec<Binding>,
    pub errors: Vec<PatchError>,
}

/// Gather binding records under every `Bindings` key, in document order.
pub fn collect_bindings(doc: &Value) -> BindingSet {
    let mut set = BindingSet::default();

    for_each_key(doc, BINDINGS_KEY, |map, key, path| {
        let (records, records_path) = match &map[key] {
            Value::Object(wrapper) => match wrapper.get(VALUES_KEY) {
                Some(Value::Array(items)) => (items, pointer_push(path, VALUES_KEY)),
                _ => {
                    set.errors.push(PatchError::InvalidBinding {
                        path: path.to_string(),
                        details: format!("expected a '{}' array", VALUES_KEY),
                    });
                    return;
                }
            },
            Value::Array(items) => (items, path.to_string()),
            Value::Null => return,
            _ => {
                set.errors.push(PatchError::InvalidBinding {
                    path: path.to_string(),
                    details: "expected an array of binding records".to_string(),
                });
                return;
            }
        };

        for (i, record) in records.iter().enumerate() {
            match Binding::deserialize(record) {
                Ok(binding) => set.bindings.push(binding),
                Err(e) => set.errors.push(PatchError::InvalidBinding {
                    path: pointer_push(&records_path, &i.to_string()),
                    details: e.to_string(),
                }),
            }
        }
    });

    for err in &set.errors {
        tracing::warn!("{}", err);
    }
    set
}

/// Outcome of one propagation pass.
#[derive(Debug, Default)]
pub struct PropagationReport {
    /// Bindings written into a node
    pub applied: usize,
    /// Bindings whose variable was not set for this run
    pub unbound: usize,
    /// Bindings that could not be resolved to exactly one node
    pub errors: Vec<PatchError>,
}

/// Write bound variables into their nodes.
///
/// The value is stored in string form, the representation Gaea uses for
/// variable-driven properties. Only the matched node's property changes; a
/// property missing on the node is created.
pub fn propagate(doc: &mut Value, bindings: &[Binding], vars: &VariableTable) -> PropagationReport {
    let mut report = PropagationReport::default();

    for binding in bindings {
        let Some(value) = vars.get(&binding.variable) else {
            report.unbound += 1;
            continue;
        };

        match count_nodes(doc, binding.node) {
            0 => {
                let err = PatchError::NodeNotFound {
                    node_id: binding.node,
                    property: binding.property.clone(),
                    variable: binding.variable.clone(),
                };
                tracing::warn!("{}", err);
                report.errors.push(err);
            }
            1 => {
                set_node_property(doc, binding.node, &binding.property, Value::String(value.to_string()));
                tracing::debug!(
                    node = binding.node,
                    property = %binding.property,
                    variable = %binding.variable,
                    value = %value,
                    "binding applied"
                );
                report.applied += 1;
            }
            matches => {
                let err = PatchError::AmbiguousNode {
                    node_id: binding.node,
                    matches,
                };
                tracing::warn!("{}", err);
                report.errors.push(err);
            }
        }
    }

    report
}

fn node_id(node: &Value) -> Option<i64> {
    node.as_object()?.get(ID_KEY)?.as_i64()
}

/// Entries of a `Nodes` collection: map values or sequence items.
fn collection_entries(collection: &Value) -> Vec<&Value> {
    match collection {
        Value::Object(map) => map.values().collect(),
        Value::Array(items) => items.iter().collect(),
        _ => Vec::new(),
    }
}

fn collection_entries_mut(collection: &mut Value) -> Vec<&mut Value> {
    match collection {
        Value::Object(map) => map.values_mut().collect(),
        Value::Array(items) => items.iter_mut().collect(),
        _ => Vec::new(),
    }
}

fn count_nodes(doc: &Value, id: i64) -> usize {
    let mut matches = 0;
    for_each_key(doc, NODES_KEY, |map, key, _| {
        matches += collection_entries(&map[key])
            .into_iter()
            .filter(|node| node_id(node) == Some(id))
            .count();
    });
    matches
}

fn set_node_property(doc: &mut Value, id: i64, property: &str, value: Value) {
    for_each_key_mut(doc, NODES_KEY, |map, key, _| {
        let Some(collection) = map.get_mut(key) else {
            return;
        };
        for node in collection_entries_mut(collection) {
            if node_id(node) != Some(id) {
                continue;
            }
            if let Value::Object(fields) = node {
                if !fields.contains_key(property) {
                    tracing::debug!(node = id, property, "creating missing node property");
                }
                fields.insert(property.to_string(), value.clone());
            }
        }
    });
}

/// Every node record (object with an `Id`) across all `Nodes` collections.
pub fn node_records(doc: &Value) -> Vec<&Map<String, Value>> {
    let mut nodes = Vec::new();
    collect_node_records(doc, &mut nodes);
    nodes
}

fn collect_node_records<'a>(value: &'a Value, out: &mut Vec<&'a Map<String, Value>>) {
    // Same traversal rules as the walker, written out so the borrows can
    // outlive the callback.
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                if k == NODES_KEY {
                    out.extend(
                        collection_entries(v)
                            .into_iter()
                            .filter(|node| node_id(node).is_some())
                            .filter_map(Value::as_object),
                    );
                } else {
                    collect_node_records(v, out);
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_node_records(item, out)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::VarValue;
    use serde_json::json;

    fn vars(pairs: &[(&str, i64)]) -> VariableTable {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), VarValue::Int(*v)))
            .collect()
    }

    fn two_stage_doc() -> Value {
        json!({
            "Assets": {"$values": [
                {"Terrain": {
                    "Nodes": {"$id": "5", "183": {"Id": 183, "Seed": 0}, "200": {"Id": 200, "Scale": 1.0}},
                    "Automation": {"Bindings": {"$values": [
                        {"Node": 183, "Property": "Seed", "Variable": "seed"},
                        {"Node": 300, "Property": "Strength", "Variable": "strength"},
                        {"Node": 999, "Property": "Seed", "Variable": "missing"}
                    ]}}
                }},
                {"Stage": {"Nodes": {"300": {"Id": 300, "Strength": "0.5"}}}}
            ]}
        })
    }

    #[test]
    fn collects_wrapped_and_bare_bindings() {
        let doc = json!({
            "A": {"Bindings": {"$values": [{"Node": 1, "Property": "P", "Variable": "v"}]}},
            "B": {"Bindings": [{"Node": 2, "Property": "Q", "Variable": "w", "$id": "9"}]}
        });
        let set = collect_bindings(&doc);
        assert!(set.errors.is_empty());
        assert_eq!(
            set.bindings,
            vec![
                Binding { node: 1, property: "P".into(), variable: "v".into() },
                Binding { node: 2, property: "Q".into(), variable: "w".into() },
            ]
        );
    }

    #[test]
    fn malformed_records_are_reported_with_location() {
        let doc = json!({"Bindings": {"$values": [
            {"Node": "x", "Property": "P", "Variable": "v"},
            {"Node": 1, "Property": "P", "Variable": "v"}
        ]}});
        let set = collect_bindings(&doc);
        assert_eq!(set.bindings.len(), 1);
        match &set.errors[0] {
            PatchError::InvalidBinding { path, .. } => assert_eq!(path, "/Bindings/$values/0"),
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn propagates_across_node_collections() {
        let mut doc = two_stage_doc();
        let bindings = collect_bindings(&doc).bindings;
        let report = propagate(&mut doc, &bindings, &vars(&[("seed", 42), ("strength", 3)]));

        assert_eq!(report.applied, 2);
        assert_eq!(report.unbound, 1);
        assert!(report.errors.is_empty());
        let terrain = &doc["Assets"]["$values"][0]["Terrain"];
        assert_eq!(terrain["Nodes"]["183"]["Seed"], "42");
        assert_eq!(terrain["Nodes"]["200"]["Scale"], 1.0);
        assert_eq!(doc["Assets"]["$values"][1]["Stage"]["Nodes"]["300"]["Strength"], "3");
    }

    #[test]
    fn missing_node_is_skipped_and_others_apply() {
        let mut doc = two_stage_doc();
        let bindings = collect_bindings(&doc).bindings;
        let report = propagate(&mut doc, &bindings, &vars(&[("seed", 1), ("missing", 5)]));

        assert_eq!(report.applied, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(report.errors[0], PatchError::NodeNotFound { node_id: 999, .. }));
        assert_eq!(doc["Assets"]["$values"][0]["Terrain"]["Nodes"]["183"]["Seed"], "1");
    }

    #[test]
    fn duplicate_ids_are_not_resolved() {
        let mut doc = json!({
            "a": {"Nodes": {"x": {"Id": 1, "Seed": "0"}}},
            "b": {"Nodes": {"y": {"Id": 1, "Seed": "0"}}}
        });
        let before = doc.clone();
        let bindings = vec![Binding { node: 1, property: "Seed".into(), variable: "s".into() }];
        let report = propagate(&mut doc, &bindings, &vars(&[("s", 9)]));
        assert!(matches!(report.errors[0], PatchError::AmbiguousNode { node_id: 1, matches: 2 }));
        assert_eq!(doc, before);
    }

    #[test]
    fn only_target_property_changes() {
        let mut doc = json!({"Nodes": {
            "a": {"Id": 1, "Seed": "0", "Other": 5},
            "b": {"Id": 2, "Seed": "0"},
            "c": "not a node"
        }});
        let bindings = vec![Binding { node: 1, property: "Seed".into(), variable: "s".into() }];
        propagate(&mut doc, &bindings, &vars(&[("s", 7)]));
        assert_eq!(
            doc,
            json!({"Nodes": {
                "a": {"Id": 1, "Seed": "7", "Other": 5},
                "b": {"Id": 2, "Seed": "0"},
                "c": "not a node"
            }})
        );
    }

    #[test]
    fn node_records_skip_non_nodes() {
        let doc = two_stage_doc();
        let ids: Vec<i64> = node_records(&doc)
            .iter()
            .filter_map(|n| n.get(ID_KEY).and_then(Value::as_i64))
            .collect();
        assert_eq!(ids, vec![183, 200, 300]);
    }
}
