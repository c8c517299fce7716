//! Build immutable schema trees from JSON or YAML descriptors.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::{NumberBounds, Schema, SchemaKind};

#[derive(Debug, Error, PartialEq)]
pub enum SchemaBuildError {
    #[error("schema is not valid JSON: {0}")]
    Json(String),

    #[error("schema is not valid YAML: {0}")]
    Yaml(String),

    #[error("schema error at \"{path}\": {hint}")]
    Invalid { path: String, hint: String },
}

fn invalid(path: &str, hint: impl Into<String>) -> SchemaBuildError {
    SchemaBuildError::Invalid {
        path: path.to_string(),
        hint: hint.into(),
    }
}

/// Stateless builder; all construction state travels on the call stack.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaBuilder;

impl SchemaBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Build from a pre-parsed JSON value.
    pub fn build_value(&self, v: &Value) -> Result<Schema, SchemaBuildError> {
        build_node(v, "")
    }

    /// Build from JSON bytes.
    pub fn build_bytes(&self, bytes: &[u8]) -> Result<Schema, SchemaBuildError> {
        let v: Value =
            serde_json::from_slice(bytes).map_err(|e| SchemaBuildError::Json(e.to_string()))?;
        self.build_value(&v)
    }

    /// Build from YAML bytes. Mapping keys must be strings; a violating key
    /// is reported with its path.
    pub fn build_yaml(&self, bytes: &[u8]) -> Result<Schema, SchemaBuildError> {
        let y: serde_yaml::Value =
            serde_yaml::from_slice(bytes).map_err(|e| SchemaBuildError::Yaml(e.to_string()))?;
        let v = yaml_to_json(&y, "")?;
        self.build_value(&v)
    }
}

fn yaml_to_json(v: &serde_yaml::Value, path: &str) -> Result<Value, SchemaBuildError> {
    match v {
        serde_yaml::Value::Null => Ok(Value::Null),
        serde_yaml::Value::Bool(b) => Ok(Value::Bool(*b)),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Number(i.into()))
            } else if let Some(u) = n.as_u64() {
                Ok(Value::Number(u.into()))
            } else {
                let f = n.as_f64().unwrap_or(f64::NAN);
                serde_json::Number::from_f64(f)
                    .map(Value::Number)
                    .ok_or_else(|| invalid(path, "non-finite number"))
            }
        }
        serde_yaml::Value::String(s) => Ok(Value::String(s.clone())),
        serde_yaml::Value::Sequence(seq) => {
            let mut out = Vec::with_capacity(seq.len());
            for (i, item) in seq.iter().enumerate() {
                out.push(yaml_to_json(item, &format!("{path}[{i}]"))?);
            }
            Ok(Value::Array(out))
        }
        serde_yaml::Value::Mapping(mapping) => {
            let mut out = Map::new();
            for (k, val) in mapping {
                let serde_yaml::Value::String(key) = k else {
                    return Err(invalid(path, format!("non-string mapping key {k:?}")));
                };
                out.insert(key.clone(), yaml_to_json(val, &format!("{path}.{key}"))?);
            }
            Ok(Value::Object(out))
        }
        serde_yaml::Value::Tagged(_) => Err(invalid(path, "unsupported tagged value")),
    }
}

fn build_node(v: &Value, path: &str) -> Result<Schema, SchemaBuildError> {
    match v {
        Value::String(shorthand) => build_shorthand(shorthand, path),
        Value::Object(map) => build_object_node(map, path),
        _ => Err(invalid(path, "schema must be a type name or an object")),
    }
}

fn build_shorthand(name: &str, path: &str) -> Result<Schema, SchemaBuildError> {
    let kind = match name {
        "any" => SchemaKind::Any,
        "null" => SchemaKind::Null,
        "bool" | "boolean" => SchemaKind::Bool,
        "number" => SchemaKind::Number(NumberBounds::default()),
        "integer" => SchemaKind::Integer(NumberBounds::default()),
        "string" => SchemaKind::String {
            min_length: None,
            max_length: None,
        },
        "list" | "array" => SchemaKind::List {
            item: Box::new(Schema::any()),
            min_items: None,
            max_items: None,
        },
        "object" => SchemaKind::Object {
            properties: BTreeMap::new(),
            required: BTreeSet::new(),
            additional: None,
        },
        other => return Err(invalid(path, format!("unknown type {other:?}"))),
    };
    Ok(Schema::new(kind))
}

/// Select the variant: an explicit `type` wins; otherwise infer from the
/// shape (`params` means method, `properties` means object, one of
/// `anyOf`/`allOf`/`not` means that composite).
fn select_type<'a>(map: &'a Map<String, Value>, path: &str) -> Result<&'a str, SchemaBuildError> {
    match map.get("type") {
        Some(Value::String(t)) => Ok(t),
        Some(_) => Err(invalid(path, "type must be a string")),
        None => {
            if map.contains_key("params") {
                Ok("method")
            } else if map.contains_key("properties") {
                Ok("object")
            } else if map.contains_key("anyOf") {
                Ok("anyOf")
            } else if map.contains_key("allOf") {
                Ok("allOf")
            } else if map.contains_key("not") {
                Ok("not")
            } else {
                Ok("any")
            }
        }
    }
}

fn build_object_node(map: &Map<String, Value>, path: &str) -> Result<Schema, SchemaBuildError> {
    let type_name = select_type(map, path)?.to_string();

    // Attributes every node may carry.
    let mut allowed: Vec<&str> = vec!["type", "name", "description"];

    let kind = match type_name.as_str() {
        "any" => SchemaKind::Any,
        "null" => SchemaKind::Null,
        "bool" | "boolean" => SchemaKind::Bool,
        "number" => {
            allowed.extend(BOUND_ATTRS);
            SchemaKind::Number(build_bounds(map, path)?)
        }
        "integer" => {
            allowed.extend(BOUND_ATTRS);
            SchemaKind::Integer(build_bounds(map, path)?)
        }
        "string" => {
            allowed.extend(["minLength", "maxLength"]);
            SchemaKind::String {
                min_length: get_usize(map, "minLength", path)?,
                max_length: get_usize(map, "maxLength", path)?,
            }
        }
        "anyOf" => {
            allowed.push("anyOf");
            SchemaKind::AnyOf(build_sub_list(map, "anyOf", path)?)
        }
        "allOf" => {
            allowed.push("allOf");
            SchemaKind::AllOf(build_sub_list(map, "allOf", path)?)
        }
        "not" => {
            allowed.push("not");
            let sub = map
                .get("not")
                .ok_or_else(|| invalid(path, "not requires a sub schema"))?;
            SchemaKind::Not(Box::new(build_node(sub, &format!("{path}.not"))?))
        }
        "list" | "array" => match map.get("items") {
            Some(Value::Array(items)) => {
                allowed.extend(["items", "additionalItems"]);
                let mut slots = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    slots.push(build_node(item, &format!("{path}.items[{i}]"))?);
                }
                let additional = map
                    .get("additionalItems")
                    .map(|a| build_node(a, &format!("{path}.additionalItems")))
                    .transpose()?
                    .map(Box::new);
                SchemaKind::Tuple {
                    items: slots,
                    additional,
                }
            }
            other => {
                allowed.extend(["items", "minItems", "maxItems"]);
                let item = match other {
                    Some(item) => build_node(item, &format!("{path}.items"))?,
                    None => Schema::any(),
                };
                SchemaKind::List {
                    item: Box::new(item),
                    min_items: get_usize(map, "minItems", path)?,
                    max_items: get_usize(map, "maxItems", path)?,
                }
            }
        },
        "object" => {
            allowed.extend(["properties", "required", "additionalProperties"]);
            let mut properties = BTreeMap::new();
            if let Some(props) = map.get("properties") {
                let Value::Object(props) = props else {
                    return Err(invalid(path, "properties must be an object"));
                };
                for (key, sub) in props {
                    properties.insert(key.clone(), build_node(sub, &format!("{path}.{key}"))?);
                }
            }
            let mut required = BTreeSet::new();
            if let Some(req) = map.get("required") {
                let Value::Array(req) = req else {
                    return Err(invalid(path, "required must be an array of names"));
                };
                for name in req {
                    let Value::String(name) = name else {
                        return Err(invalid(path, "required must be an array of names"));
                    };
                    required.insert(name.clone());
                }
            }
            let additional = build_additional(map, "additionalProperties", path)?;
            SchemaKind::Object {
                properties,
                required,
                additional,
            }
        }
        "method" => {
            allowed.extend(["params", "additionalParams", "returns"]);
            let mut params = Vec::new();
            if let Some(raw) = map.get("params") {
                let Value::Array(raw) = raw else {
                    return Err(invalid(path, "params must be an array of schemas"));
                };
                for (i, sub) in raw.iter().enumerate() {
                    params.push(build_node(sub, &format!("{path}.params[{i}]"))?);
                }
            }
            let additional_params = build_additional(map, "additionalParams", path)?;
            let returns = map
                .get("returns")
                .map(|r| build_node(r, &format!("{path}.returns")))
                .transpose()?
                .map(Box::new);
            SchemaKind::Method {
                params,
                additional_params,
                returns,
            }
        }
        other => return Err(invalid(path, format!("unknown type {other:?}"))),
    };

    for key in map.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(invalid(
                path,
                format!("unknown attribute {key:?} for type {type_name:?}"),
            ));
        }
    }

    let mut schema = Schema::new(kind);
    schema.name = get_string(map, "name", path)?;
    schema.description = get_string(map, "description", path)?;
    Ok(schema)
}

const BOUND_ATTRS: [&str; 4] = [
    "minimum",
    "maximum",
    "exclusiveMinimum",
    "exclusiveMaximum",
];

fn build_bounds(map: &Map<String, Value>, path: &str) -> Result<NumberBounds, SchemaBuildError> {
    Ok(NumberBounds {
        minimum: get_f64(map, "minimum", path)?,
        maximum: get_f64(map, "maximum", path)?,
        exclusive_minimum: get_f64(map, "exclusiveMinimum", path)?,
        exclusive_maximum: get_f64(map, "exclusiveMaximum", path)?,
    })
}

/// `additionalProperties` / `additionalParams` accept a schema or a bool:
/// `true` means "anything", `false` means "nothing passes".
fn build_additional(
    map: &Map<String, Value>,
    attr: &str,
    path: &str,
) -> Result<Option<Box<Schema>>, SchemaBuildError> {
    match map.get(attr) {
        None => Ok(None),
        Some(Value::Bool(true)) => Ok(Some(Box::new(Schema::any()))),
        Some(Value::Bool(false)) => Ok(Some(Box::new(Schema::new(SchemaKind::Not(Box::new(
            Schema::any(),
        )))))),
        Some(sub) => Ok(Some(Box::new(build_node(
            sub,
            &format!("{path}.{attr}"),
        )?))),
    }
}

fn build_sub_list(
    map: &Map<String, Value>,
    attr: &str,
    path: &str,
) -> Result<Vec<Schema>, SchemaBuildError> {
    let raw = map
        .get(attr)
        .ok_or_else(|| invalid(path, format!("{attr} requires a list of schemas")))?;
    let Value::Array(raw) = raw else {
        return Err(invalid(path, format!("{attr} must be an array")));
    };
    let mut subs = Vec::with_capacity(raw.len());
    for (i, sub) in raw.iter().enumerate() {
        subs.push(build_node(sub, &format!("{path}.{attr}[{i}]"))?);
    }
    Ok(subs)
}

fn get_string(
    map: &Map<String, Value>,
    attr: &str,
    path: &str,
) -> Result<Option<String>, SchemaBuildError> {
    match map.get(attr) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(invalid(path, format!("{attr} must be a string"))),
    }
}

fn get_usize(
    map: &Map<String, Value>,
    attr: &str,
    path: &str,
) -> Result<Option<usize>, SchemaBuildError> {
    match map.get(attr) {
        None => Ok(None),
        Some(v) => v
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| invalid(path, format!("{attr} must be a non-negative integer"))),
    }
}

fn get_f64(
    map: &Map<String, Value>,
    attr: &str,
    path: &str,
) -> Result<Option<f64>, SchemaBuildError> {
    match map.get(attr) {
        None => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| invalid(path, format!("{attr} must be a number"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn build(v: Value) -> Result<Schema, SchemaBuildError> {
        SchemaBuilder::new().build_value(&v)
    }

    #[test]
    fn test_shorthand() {
        assert_eq!(build(json!("integer")).unwrap().kind.type_name(), "integer");
        assert_eq!(build(json!("string")).unwrap().kind.type_name(), "string");
        assert!(build(json!("frobnicate")).is_err());
    }

    #[test]
    fn test_type_inference() {
        let m = build(json!({"params": ["integer"]})).unwrap();
        assert!(matches!(m.kind, SchemaKind::Method { .. }));

        let o = build(json!({"properties": {"a": "integer"}})).unwrap();
        assert!(matches!(o.kind, SchemaKind::Object { .. }));

        let c = build(json!({"anyOf": ["null", "integer"]})).unwrap();
        assert!(matches!(c.kind, SchemaKind::AnyOf(ref subs) if subs.len() == 2));

        let n = build(json!({"not": "null"})).unwrap();
        assert!(matches!(n.kind, SchemaKind::Not(_)));
    }

    #[test]
    fn test_items_shape_selects_list_or_tuple() {
        let list = build(json!({"type": "list", "items": "integer", "minItems": 1})).unwrap();
        assert!(matches!(list.kind, SchemaKind::List { .. }));

        let tuple = build(json!({
            "type": "list",
            "items": ["integer", "string"],
            "additionalItems": "bool",
        }))
        .unwrap();
        match tuple.kind {
            SchemaKind::Tuple { items, additional } => {
                assert_eq!(items.len(), 2);
                assert!(additional.is_some());
            }
            other => panic!("expected tuple, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_attribute_rejected() {
        let err = build(json!({"type": "integer", "maxLength": 3})).unwrap_err();
        assert!(matches!(err, SchemaBuildError::Invalid { .. }));
        assert!(err.to_string().contains("maxLength"));
    }

    #[test]
    fn test_mixins_accepted_everywhere() {
        let s = build(json!({
            "type": "string",
            "name": "tag",
            "description": "a tag",
            "minLength": 1,
        }))
        .unwrap();
        assert_eq!(s.name.as_deref(), Some("tag"));
        assert_eq!(s.description.as_deref(), Some("a tag"));
    }

    #[test]
    fn test_yaml_descriptor() {
        let yaml = b"type: method\nparams:\n  - integer\n  - type: integer\nreturns: integer\n";
        let schema = SchemaBuilder::new().build_yaml(yaml).unwrap();
        match schema.kind {
            SchemaKind::Method { params, returns, .. } => {
                assert_eq!(params.len(), 2);
                assert!(returns.is_some());
            }
            other => panic!("expected method, got {other:?}"),
        }
    }

    #[test]
    fn test_yaml_non_string_key_has_path() {
        let yaml = b"type: object\nproperties:\n  inner:\n    type: object\n    properties:\n      2: integer\n";
        let err = SchemaBuilder::new().build_yaml(yaml).unwrap_err();
        match err {
            SchemaBuildError::Invalid { path, hint } => {
                assert_eq!(path, ".properties.inner.properties");
                assert!(hint.contains("non-string"));
            }
            other => panic!("expected Invalid, got {other}"),
        }
    }

    #[test]
    fn test_additional_properties_bool_forms() {
        let open = build(json!({"type": "object", "additionalProperties": true})).unwrap();
        match open.kind {
            SchemaKind::Object { additional, .. } => {
                assert!(matches!(additional.unwrap().kind, SchemaKind::Any))
            }
            _ => unreachable!(),
        }

        let closed = build(json!({"type": "object", "additionalProperties": false})).unwrap();
        match closed.kind {
            SchemaKind::Object { additional, .. } => {
                assert!(matches!(additional.unwrap().kind, SchemaKind::Not(_)))
            }
            _ => unreachable!(),
        }
    }
}
