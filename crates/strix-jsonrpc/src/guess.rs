//! Best-effort conversion of plain string tokens into JSON values, used by
//! CLI front ends to build params without forcing the user to quote JSON.

use serde_json::{Number, Value};

/// Turn a token into a JSON value: booleans first, then numbers (any
/// width), then `[`/`{` dispatch to a full JSON parse, else the original
/// string.
pub fn guess_json(token: &str) -> Value {
    match token {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" => return Value::Null,
        _ => {}
    }
    if let Ok(n) = serde_json::from_str::<Number>(token) {
        return Value::Number(n);
    }
    match token.chars().next() {
        Some('[') | Some('{') => {
            serde_json::from_str(token).unwrap_or_else(|_| Value::String(token.to_string()))
        }
        _ => Value::String(token.to_string()),
    }
}

/// Guess a whole argument list.
pub fn guess_json_array(tokens: &[String]) -> Vec<Value> {
    tokens.iter().map(|t| guess_json(t)).collect()
}
