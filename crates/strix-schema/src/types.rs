use std::collections::{BTreeMap, BTreeSet};

use serde_json::{json, Map, Value};

/// Numeric range constraints shared by the number and integer variants.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NumberBounds {
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub exclusive_minimum: Option<f64>,
    pub exclusive_maximum: Option<f64>,
}

impl NumberBounds {
    pub fn is_unbounded(&self) -> bool {
        self.minimum.is_none()
            && self.maximum.is_none()
            && self.exclusive_minimum.is_none()
            && self.exclusive_maximum.is_none()
    }
}

/// The variant-specific part of a schema node.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaKind {
    Any,
    Null,
    Bool,
    Number(NumberBounds),
    Integer(NumberBounds),
    String {
        min_length: Option<usize>,
        max_length: Option<usize>,
    },
    AnyOf(Vec<Schema>),
    AllOf(Vec<Schema>),
    Not(Box<Schema>),
    List {
        item: Box<Schema>,
        min_items: Option<usize>,
        max_items: Option<usize>,
    },
    Tuple {
        items: Vec<Schema>,
        /// Tail schema; when absent the tuple length must match exactly.
        additional: Option<Box<Schema>>,
    },
    Object {
        properties: BTreeMap<String, Schema>,
        required: BTreeSet<String>,
        /// Schema for properties outside `properties`; absent means extra
        /// properties pass untouched.
        additional: Option<Box<Schema>>,
    },
    Method {
        params: Vec<Schema>,
        additional_params: Option<Box<Schema>>,
        returns: Option<Box<Schema>>,
    },
}

impl SchemaKind {
    /// The `type` tag used on the wire and in validation hints.
    pub fn type_name(&self) -> &'static str {
        match self {
            SchemaKind::Any => "any",
            SchemaKind::Null => "null",
            SchemaKind::Bool => "bool",
            SchemaKind::Number(_) => "number",
            SchemaKind::Integer(_) => "integer",
            SchemaKind::String { .. } => "string",
            SchemaKind::AnyOf(_) => "anyOf",
            SchemaKind::AllOf(_) => "allOf",
            SchemaKind::Not(_) => "not",
            SchemaKind::List { .. } => "list",
            SchemaKind::Tuple { .. } => "list",
            SchemaKind::Object { .. } => "object",
            SchemaKind::Method { .. } => "method",
        }
    }
}

/// One immutable schema node: a variant plus the name/description mixin
/// every node may carry.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub name: Option<String>,
    pub description: Option<String>,
    pub kind: SchemaKind,
}

impl Schema {
    pub fn new(kind: SchemaKind) -> Self {
        Self {
            name: None,
            description: None,
            kind,
        }
    }

    pub fn any() -> Self {
        Self::new(SchemaKind::Any)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Render the canonical JSON form, the shape `rpc.discover` publishes.
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("type".into(), json!(self.kind.type_name()));
        match &self.kind {
            SchemaKind::Any | SchemaKind::Null | SchemaKind::Bool => {}
            SchemaKind::Number(bounds) | SchemaKind::Integer(bounds) => {
                insert_bounds(&mut obj, bounds);
            }
            SchemaKind::String {
                min_length,
                max_length,
            } => {
                if let Some(n) = min_length {
                    obj.insert("minLength".into(), json!(n));
                }
                if let Some(n) = max_length {
                    obj.insert("maxLength".into(), json!(n));
                }
            }
            SchemaKind::AnyOf(subs) => {
                obj.remove("type");
                obj.insert(
                    "anyOf".into(),
                    Value::Array(subs.iter().map(Schema::to_value).collect()),
                );
            }
            SchemaKind::AllOf(subs) => {
                obj.remove("type");
                obj.insert(
                    "allOf".into(),
                    Value::Array(subs.iter().map(Schema::to_value).collect()),
                );
            }
            SchemaKind::Not(sub) => {
                obj.remove("type");
                obj.insert("not".into(), sub.to_value());
            }
            SchemaKind::List {
                item,
                min_items,
                max_items,
            } => {
                obj.insert("items".into(), item.to_value());
                if let Some(n) = min_items {
                    obj.insert("minItems".into(), json!(n));
                }
                if let Some(n) = max_items {
                    obj.insert("maxItems".into(), json!(n));
                }
            }
            SchemaKind::Tuple { items, additional } => {
                obj.insert(
                    "items".into(),
                    Value::Array(items.iter().map(Schema::to_value).collect()),
                );
                if let Some(a) = additional {
                    obj.insert("additionalItems".into(), a.to_value());
                }
            }
            SchemaKind::Object {
                properties,
                required,
                additional,
            } => {
                let props: Map<String, Value> = properties
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_value()))
                    .collect();
                obj.insert("properties".into(), Value::Object(props));
                if !required.is_empty() {
                    obj.insert(
                        "required".into(),
                        Value::Array(required.iter().map(|r| json!(r)).collect()),
                    );
                }
                if let Some(a) = additional {
                    obj.insert("additionalProperties".into(), a.to_value());
                }
            }
            SchemaKind::Method {
                params,
                additional_params,
                returns,
            } => {
                obj.insert(
                    "params".into(),
                    Value::Array(params.iter().map(Schema::to_value).collect()),
                );
                if let Some(a) = additional_params {
                    obj.insert("additionalParams".into(), a.to_value());
                }
                if let Some(r) = returns {
                    obj.insert("returns".into(), r.to_value());
                }
            }
        }
        if let Some(name) = &self.name {
            obj.insert("name".into(), json!(name));
        }
        if let Some(description) = &self.description {
            obj.insert("description".into(), json!(description));
        }
        Value::Object(obj)
    }
}

fn insert_bounds(obj: &mut Map<String, Value>, bounds: &NumberBounds) {
    if let Some(v) = bounds.minimum {
        obj.insert("minimum".into(), json!(v));
    }
    if let Some(v) = bounds.maximum {
        obj.insert("maximum".into(), json!(v));
    }
    if let Some(v) = bounds.exclusive_minimum {
        obj.insert("exclusiveMinimum".into(), json!(v));
    }
    if let Some(v) = bounds.exclusive_maximum {
        obj.insert("exclusiveMaximum".into(), json!(v));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_form_of_method() {
        let schema = Schema::new(SchemaKind::Method {
            params: vec![
                Schema::new(SchemaKind::Integer(NumberBounds::default())),
                Schema::new(SchemaKind::Integer(NumberBounds::default())),
            ],
            additional_params: None,
            returns: Some(Box::new(Schema::new(SchemaKind::Integer(
                NumberBounds::default(),
            )))),
        })
        .with_name("add");

        let v = schema.to_value();
        assert_eq!(v["type"], "method");
        assert_eq!(v["params"][0]["type"], "integer");
        assert_eq!(v["returns"]["type"], "integer");
        assert_eq!(v["name"], "add");
    }

    #[test]
    fn test_composites_drop_type_tag() {
        let schema = Schema::new(SchemaKind::AnyOf(vec![
            Schema::new(SchemaKind::Null),
            Schema::new(SchemaKind::Bool),
        ]));
        let v = schema.to_value();
        assert!(v.get("type").is_none());
        assert_eq!(v["anyOf"][1]["type"], "bool");
    }
}
