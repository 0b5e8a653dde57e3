//! Terrain document model
//!
//! A terrain file is plain JSON. It is held as a [`serde_json::Value`] built
//! with `preserve_order`, so maps keep the key order Gaea wrote and saving a
//! patched file does not shuffle it.

use std::fs;
use std::path::Path;

use serde_json::Value;

use crate::error::PatchError;

/// The nested map/sequence/scalar tree being patched.
pub type Document = Value;

/// JSON type of a document value, as used by the replacer's type check.
///
/// Integers and floats are distinct: `5` and `5.0` are different kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Null,
    Bool,
    Integer,
    Float,
    String,
    Array,
    Object,
}

impl ValueKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Number(n) if n.is_i64() || n.is_u64() => ValueKind::Integer,
            Value::Number(_) => ValueKind::Float,
            Value::String(_) => ValueKind::String,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Object,
        }
    }
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Integer => "integer",
            ValueKind::Float => "float",
            ValueKind::String => "string",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
        };
        f.write_str(name)
    }
}

/// Load a terrain file from disk.
pub fn load(path: &Path) -> Result<Document, PatchError> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Serialize with 2-space indentation (the layout Swarm is fed in practice).
pub fn to_pretty_string(doc: &Document) -> Result<String, PatchError> {
    Ok(serde_json::to_string_pretty(doc)?)
}

/// Write a document to disk, pretty-printed.
pub fn save(doc: &Document, path: &Path) -> Result<(), PatchError> {
    fs::write(path, to_pretty_string(doc)?)?;
    Ok(())
}

/// Append one RFC 6901 reference token to a JSON pointer.
pub(crate) fn pointer_push(base: &str, token: &str) -> String {
    let escaped = token.replace('~', "~0").replace('/', "~1");
    format!("{}/{}", base, escaped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kinds_distinguish_integer_and_float() {
        assert_eq!(ValueKind::of(&json!(5)), ValueKind::Integer);
        assert_eq!(ValueKind::of(&json!(5.0)), ValueKind::Float);
        assert_eq!(ValueKind::of(&json!(u64::MAX)), ValueKind::Integer);
        assert_eq!(ValueKind::of(&json!(null)), ValueKind::Null);
        assert_eq!(ValueKind::of(&json!({"a": 1})).to_string(), "object");
    }

    #[test]
    fn pretty_output_preserves_key_order() {
        let doc: Document = serde_json::from_str(r#"{"z": 1, "a": 2, "m": {"y": 0, "b": 1}}"#).unwrap();
        let text = to_pretty_string(&doc).unwrap();
        let z = text.find("\"z\"").unwrap();
        let a = text.find("\"a\"").unwrap();
        let y = text.find("\"y\"").unwrap();
        let b = text.find("\"b\"").unwrap();
        assert!(z < a && y < b);
        assert!(text.contains("\n  \"z\": 1"));
    }

    #[test]
    fn pointer_tokens_are_escaped() {
        assert_eq!(pointer_push("", "Nodes"), "/Nodes");
        assert_eq!(pointer_push("/a", "b/c~d"), "/a/b~1c~0d");
    }

    #[test]
    fn load_and_save_roundtrip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.terrain");
        let doc = json!({"Build": {"Destination": "out"}});
        save(&doc, &path).unwrap();
        assert_eq!(load(&path).unwrap(), doc);
    }
}
