//! Wire model of a structured query request.
//!
//! A request is a list of operations plus named, reusable fragments. Each
//! selection is either a concrete field (optionally with arguments and
//! child selections), a spread of a named fragment, or an inline group.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryDocument {
    #[serde(default)]
    pub operations: Vec<Operation>,
    #[serde(default)]
    pub fragments: Vec<FragmentDef>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    #[default]
    Query,
    Mutation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    #[serde(default)]
    pub kind: OperationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub selections: Vec<Selection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentDef {
    pub name: String,
    #[serde(default)]
    pub selections: Vec<Selection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Selection {
    Field(FieldNode),
    Fragment { name: String },
    Inline {
        #[serde(default)]
        selections: Vec<Selection>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldNode {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub args: serde_json::Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selections: Vec<Selection>,
}

impl FieldNode {
    /// Key under which this field's result appears in the response.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Cost multiplier from a `limit`/`first` integer argument; absent or
    /// non-positive values never shrink below 1.
    pub fn list_multiplier(&self) -> u64 {
        for key in ["limit", "first"] {
            if let Some(n) = self.args.get(key).and_then(Value::as_i64) {
                return n.max(1) as u64;
            }
        }
        1
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(Value::as_str)
    }

    pub fn arg_i64(&self, key: &str) -> Option<i64> {
        self.args.get(key).and_then(Value::as_i64)
    }

    pub fn arg_str_list(&self, key: &str) -> Option<Vec<String>> {
        self.args.get(key).and_then(Value::as_array).map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_nested_selections() {
        let doc: QueryDocument = serde_json::from_value(json!({
            "operations": [{
                "selections": [{
                    "kind": "field",
                    "name": "objects",
                    "args": { "type": "Indicator", "first": 50 },
                    "selections": [
                        { "kind": "field", "name": "id" },
                        { "kind": "fragment", "name": "summary" },
                    ]
                }]
            }],
            "fragments": [{
                "name": "summary",
                "selections": [{ "kind": "field", "name": "display_value" }]
            }]
        }))
        .unwrap();

        assert_eq!(doc.operations.len(), 1);
        assert_eq!(doc.operations[0].kind, OperationKind::Query);
        let Selection::Field(field) = &doc.operations[0].selections[0] else {
            panic!("expected field selection");
        };
        assert_eq!(field.list_multiplier(), 50);
        assert_eq!(field.arg_str("type"), Some("Indicator"));
    }

    #[test]
    fn alias_overrides_response_key() {
        let field = FieldNode {
            name: "objects".to_string(),
            alias: Some("indicators".to_string()),
            args: serde_json::Map::new(),
            selections: vec![],
        };
        assert_eq!(field.response_key(), "indicators");
    }

    #[test]
    fn multiplier_clamps_to_one() {
        let field: FieldNode = serde_json::from_value(json!({
            "name": "objects",
            "args": { "limit": -5 }
        }))
        .unwrap();
        assert_eq!(field.list_multiplier(), 1);
    }
}
