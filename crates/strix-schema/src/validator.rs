//! Tree-descent validation with precise error positions.

use std::fmt;

use serde_json::{json, Value};

use strix_jsonrpc::{ErrorMessage, RequestMessage, RpcError};

use crate::types::{NumberBounds, Schema, SchemaKind};

/// Where validation failed and why.
///
/// The path is a stack of segments (`.field`, `[3]`, `.params[0]`); joined
/// they form the position string embedded in the error message.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorPos {
    pub path: Vec<String>,
    pub hint: String,
}

impl ErrorPos {
    pub fn path_string(&self) -> String {
        self.path.concat()
    }

    pub fn to_rpc_error(&self) -> RpcError {
        RpcError::InvalidSchema(self.to_string())
    }

    /// Lower to an error message bound to the offending request.
    pub fn to_message(&self, req: &RequestMessage) -> ErrorMessage {
        self.to_rpc_error()
            .to_message(req.id.clone(), req.trace_id.clone())
    }
}

impl fmt::Display for ErrorPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.hint)
        } else {
            write!(f, "{} {}", self.path_string(), self.hint)
        }
    }
}

/// Validate `value` against `schema`.
pub fn validate(schema: &Schema, value: &Value) -> Result<(), ErrorPos> {
    Checker::default().check(schema, value)
}

/// Validate a canonical method envelope, `{"params": [...]}` or
/// `{"result": v}`.
pub fn validate_method_envelope(schema: &Schema, envelope: &Value) -> Result<(), ErrorPos> {
    validate(schema, envelope)
}

/// Validate a positional parameter sequence. Method schemas route through
/// the canonical envelope; any other schema sees the params as a plain
/// list value.
pub fn validate_params(schema: &Schema, params: &[Value]) -> Result<(), ErrorPos> {
    match schema.kind {
        SchemaKind::Method { .. } => validate(schema, &json!({ "params": params })),
        _ => validate(schema, &Value::Array(params.to_vec())),
    }
}

/// Validate a result value against a method schema's `returns`.
pub fn validate_result(schema: &Schema, result: &Value) -> Result<(), ErrorPos> {
    match schema.kind {
        SchemaKind::Method { .. } => validate(schema, &json!({ "result": result })),
        _ => validate(schema, result),
    }
}

#[derive(Default)]
struct Checker {
    path: Vec<String>,
}

impl Checker {
    fn fail(&self, hint: impl Into<String>) -> ErrorPos {
        ErrorPos {
            path: self.path.clone(),
            hint: hint.into(),
        }
    }

    fn enter(
        &mut self,
        segment: String,
        f: impl FnOnce(&mut Self) -> Result<(), ErrorPos>,
    ) -> Result<(), ErrorPos> {
        self.path.push(segment);
        let res = f(self);
        self.path.pop();
        res
    }

    fn check(&mut self, schema: &Schema, value: &Value) -> Result<(), ErrorPos> {
        match &schema.kind {
            SchemaKind::Any => Ok(()),
            SchemaKind::Null => {
                if value.is_null() {
                    Ok(())
                } else {
                    Err(self.fail("data is not null"))
                }
            }
            SchemaKind::Bool => {
                if value.is_boolean() {
                    Ok(())
                } else {
                    Err(self.fail("data is not bool"))
                }
            }
            SchemaKind::Number(bounds) => {
                if !value.is_number() {
                    return Err(self.fail("data is not number"));
                }
                self.check_bounds(value, bounds)
            }
            SchemaKind::Integer(bounds) => {
                if !is_integer(value) {
                    return Err(self.fail("data is not integer"));
                }
                self.check_bounds(value, bounds)
            }
            SchemaKind::String {
                min_length,
                max_length,
            } => {
                let Some(s) = value.as_str() else {
                    return Err(self.fail("data is not string"));
                };
                let len = s.chars().count();
                if let Some(min) = min_length {
                    if len < *min {
                        return Err(self.fail(format!("data length is less than minLength {min}")));
                    }
                }
                if let Some(max) = max_length {
                    if len > *max {
                        return Err(
                            self.fail(format!("data length is greater than maxLength {max}"))
                        );
                    }
                }
                Ok(())
            }
            SchemaKind::AnyOf(subs) => {
                for sub in subs {
                    if self.check(sub, value).is_ok() {
                        return Ok(());
                    }
                }
                Err(self.fail("data does not match any candidate schema"))
            }
            SchemaKind::AllOf(subs) => {
                for sub in subs {
                    self.check(sub, value)?;
                }
                Ok(())
            }
            SchemaKind::Not(sub) => {
                if self.check(sub, value).is_ok() {
                    Err(self.fail("data matches the forbidden schema"))
                } else {
                    Ok(())
                }
            }
            SchemaKind::List {
                item,
                min_items,
                max_items,
            } => {
                let Some(arr) = value.as_array() else {
                    return Err(self.fail("data is not list"));
                };
                if let Some(min) = min_items {
                    if arr.len() < *min {
                        return Err(self.fail(format!("data length is less than minItems {min}")));
                    }
                }
                if let Some(max) = max_items {
                    if arr.len() > *max {
                        return Err(
                            self.fail(format!("data length is greater than maxItems {max}"))
                        );
                    }
                }
                for (i, v) in arr.iter().enumerate() {
                    self.enter(format!("[{i}]"), |c| c.check(item, v))?;
                }
                Ok(())
            }
            SchemaKind::Tuple { items, additional } => {
                let Some(arr) = value.as_array() else {
                    return Err(self.fail("data is not list"));
                };
                if arr.len() < items.len() {
                    return Err(self.fail(format!(
                        "data length is less than the tuple size {}",
                        items.len()
                    )));
                }
                if arr.len() > items.len() && additional.is_none() {
                    return Err(self.fail(format!(
                        "data length is greater than the tuple size {}",
                        items.len()
                    )));
                }
                for (i, (slot, v)) in items.iter().zip(arr.iter()).enumerate() {
                    self.enter(format!("[{i}]"), |c| c.check(slot, v))?;
                }
                if let Some(tail) = additional {
                    for (i, v) in arr.iter().enumerate().skip(items.len()) {
                        self.enter(format!("[{i}]"), |c| c.check(tail, v))?;
                    }
                }
                Ok(())
            }
            SchemaKind::Object {
                properties,
                required,
                additional,
            } => {
                let Some(obj) = value.as_object() else {
                    return Err(self.fail("data is not object"));
                };
                for name in required {
                    if !obj.contains_key(name) {
                        return Err(ErrorPos {
                            path: {
                                let mut p = self.path.clone();
                                p.push(format!(".{name}"));
                                p
                            },
                            hint: "value is required".into(),
                        });
                    }
                }
                for (name, sub) in properties {
                    if let Some(v) = obj.get(name) {
                        self.enter(format!(".{name}"), |c| c.check(sub, v))?;
                    }
                }
                if let Some(extra) = additional {
                    for (name, v) in obj {
                        if !properties.contains_key(name) {
                            self.enter(format!(".{name}"), |c| c.check(extra, v))?;
                        }
                    }
                }
                Ok(())
            }
            SchemaKind::Method {
                params,
                additional_params,
                returns,
            } => {
                let Some(obj) = value.as_object() else {
                    return Err(self.fail("data is not a method envelope"));
                };
                if let Some(raw) = obj.get("params") {
                    let Some(args) = raw.as_array() else {
                        return self
                            .enter(".params".into(), |c| Err(c.fail("data is not list")));
                    };
                    for (i, slot) in params.iter().enumerate() {
                        match args.get(i) {
                            Some(v) => {
                                self.enter(format!(".params[{i}]"), |c| c.check(slot, v))?
                            }
                            None => {
                                return self.enter(format!(".params[{i}]"), |c| {
                                    Err(c.fail("value is required"))
                                });
                            }
                        }
                    }
                    for (i, v) in args.iter().enumerate().skip(params.len()) {
                        match additional_params {
                            Some(extra) => {
                                self.enter(format!(".params[{i}]"), |c| c.check(extra, v))?
                            }
                            None => {
                                return self.enter(format!(".params[{i}]"), |c| {
                                    Err(c.fail("additional param is not allowed"))
                                });
                            }
                        }
                    }
                    Ok(())
                } else if let Some(res) = obj.get("result") {
                    match returns {
                        Some(ret) => self.enter(".result".into(), |c| c.check(ret, res)),
                        None => Ok(()),
                    }
                } else {
                    Err(self.fail("data is not a method envelope"))
                }
            }
        }
    }

    fn check_bounds(&self, value: &Value, bounds: &NumberBounds) -> Result<(), ErrorPos> {
        if bounds.is_unbounded() {
            return Ok(());
        }
        let Some(n) = value.as_f64() else {
            // Out of f64 range; nothing sensible to compare against.
            return Ok(());
        };
        if let Some(min) = bounds.minimum {
            if n < min {
                return Err(self.fail(format!("data is less than minimum {min}")));
            }
        }
        if let Some(max) = bounds.maximum {
            if n > max {
                return Err(self.fail(format!("data is greater than maximum {max}")));
            }
        }
        if let Some(min) = bounds.exclusive_minimum {
            if n <= min {
                return Err(self.fail(format!(
                    "data is less than or equal to exclusiveMinimum {min}"
                )));
            }
        }
        if let Some(max) = bounds.exclusive_maximum {
            if n >= max {
                return Err(self.fail(format!(
                    "data is greater than or equal to exclusiveMaximum {max}"
                )));
            }
        }
        Ok(())
    }
}

/// Lexical integer test so integers wider than 64 bits still qualify.
fn is_integer(value: &Value) -> bool {
    match value {
        Value::Number(n) => {
            let s = n.to_string();
            !s.contains(['.', 'e', 'E'])
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::SchemaBuilder;
    use serde_json::json;

    fn schema(v: Value) -> Schema {
        SchemaBuilder::new().build_value(&v).unwrap()
    }

    #[test]
    fn test_scalars() {
        assert!(validate(&schema(json!("integer")), &json!(5)).is_ok());
        assert!(validate(&schema(json!("integer")), &json!(5.5)).is_err());
        assert!(validate(&schema(json!("number")), &json!(5.5)).is_ok());
        assert!(validate(&schema(json!("bool")), &json!(true)).is_ok());
        assert!(validate(&schema(json!("null")), &json!(null)).is_ok());
        assert!(validate(&schema(json!("any")), &json!({"x": 1})).is_ok());
    }

    #[test]
    fn test_exclusive_bounds() {
        let s = schema(json!({"type": "integer", "exclusiveMinimum": 0, "maximum": 10}));
        assert!(validate(&s, &json!(1)).is_ok());
        assert!(validate(&s, &json!(10)).is_ok());
        assert!(validate(&s, &json!(0)).is_err());
        assert!(validate(&s, &json!(11)).is_err());
    }

    #[test]
    fn test_string_lengths() {
        let s = schema(json!({"type": "string", "minLength": 2, "maxLength": 3}));
        assert!(validate(&s, &json!("ab")).is_ok());
        assert!(validate(&s, &json!("a")).is_err());
        assert!(validate(&s, &json!("abcd")).is_err());
    }

    #[test]
    fn test_list_and_path() {
        let s = schema(json!({"type": "list", "items": "integer", "maxItems": 3}));
        assert!(validate(&s, &json!([1, 2, 3])).is_ok());
        assert!(validate(&s, &json!([1, 2, 3, 4])).is_err());
        let err = validate(&s, &json!([1, "x"])).unwrap_err();
        assert_eq!(err.to_string(), "[1] data is not integer");
    }

    #[test]
    fn test_tuple_exact_or_tail() {
        let exact = schema(json!({"type": "list", "items": ["integer", "string"]}));
        assert!(validate(&exact, &json!([1, "a"])).is_ok());
        assert!(validate(&exact, &json!([1])).is_err());
        assert!(validate(&exact, &json!([1, "a", true])).is_err());

        let tail = schema(json!({
            "type": "list",
            "items": ["integer"],
            "additionalItems": "bool",
        }));
        assert!(validate(&tail, &json!([1, true, false])).is_ok());
        let err = validate(&tail, &json!([1, true, 3])).unwrap_err();
        assert_eq!(err.to_string(), "[2] data is not bool");
    }

    #[test]
    fn test_object_required_and_additional() {
        let s = schema(json!({
            "type": "object",
            "properties": {"name": "string"},
            "required": ["name"],
            "additionalProperties": "integer",
        }));
        assert!(validate(&s, &json!({"name": "x", "age": 3})).is_ok());

        let err = validate(&s, &json!({"age": 3})).unwrap_err();
        assert_eq!(err.to_string(), ".name value is required");

        let err = validate(&s, &json!({"name": "x", "age": "old"})).unwrap_err();
        assert_eq!(err.to_string(), ".age data is not integer");
    }

    #[test]
    fn test_composites() {
        let any_of = schema(json!({"anyOf": ["null", "integer"]}));
        assert!(validate(&any_of, &json!(null)).is_ok());
        assert!(validate(&any_of, &json!(7)).is_ok());
        assert!(validate(&any_of, &json!("x")).is_err());

        let all_of = schema(json!({
            "allOf": [
                {"type": "integer", "minimum": 0},
                {"type": "integer", "maximum": 9},
            ]
        }));
        assert!(validate(&all_of, &json!(5)).is_ok());
        assert!(validate(&all_of, &json!(12)).is_err());

        let not = schema(json!({"not": "string"}));
        assert!(validate(&not, &json!(1)).is_ok());
        assert!(validate(&not, &json!("s")).is_err());
    }

    #[test]
    fn test_method_envelope() {
        let s = schema(json!({"params": ["integer", {"type": "integer"}]}));
        assert!(validate_params(&s, &[json!(1), json!(2)]).is_ok());

        let err = validate_params(&s, &[json!("12"), json!("a str")]).unwrap_err();
        assert_eq!(err.to_string(), ".params[0] data is not integer");
        assert_eq!(
            err.to_rpc_error().to_string(),
            "Validation Error: .params[0] data is not integer"
        );

        // fewer params than declared slots
        let err = validate_params(&s, &[json!(1)]).unwrap_err();
        assert_eq!(err.to_string(), ".params[1] value is required");

        // extras rejected without additionalParams
        assert!(validate_params(&s, &[json!(1), json!(2), json!(3)]).is_err());
    }

    #[test]
    fn test_method_additional_params() {
        let s = schema(json!({
            "params": ["integer"],
            "additionalParams": "string",
        }));
        assert!(validate_params(&s, &[json!(1), json!("a"), json!("b")]).is_ok());
        let err = validate_params(&s, &[json!(1), json!("a"), json!(2)]).unwrap_err();
        assert_eq!(err.to_string(), ".params[2] data is not string");
    }

    #[test]
    fn test_method_result_route() {
        let s = schema(json!({"params": [], "returns": "integer"}));
        assert!(validate_result(&s, &json!(9)).is_ok());
        let err = validate_result(&s, &json!("nine")).unwrap_err();
        assert_eq!(err.to_string(), ".result data is not integer");
    }

    #[test]
    fn test_error_pos_lowers_to_message() {
        use strix_jsonrpc::Params;
        let s = schema(json!({"params": ["integer"]}));
        let err = validate_params(&s, &[json!("x")]).unwrap_err();
        let req = RequestMessage::new(3, "add2num", Params::positional(vec![json!("x")]))
            .unwrap()
            .with_trace_id("tr");
        let msg = err.to_message(&req);
        assert_eq!(msg.error.code, -32633);
        assert_eq!(
            msg.error.message,
            "Validation Error: .params[0] data is not integer"
        );
        assert_eq!(msg.trace_id, "tr");
    }
}
