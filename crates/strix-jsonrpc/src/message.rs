use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Number, Value};

use crate::error::{ErrorBody, RpcError};
use crate::{JSONRPC_VERSION, TRACEID_FIELD};

static METHOD_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9A-Za-z._+:#\-]+$").expect("method name regex"));

/// Whether `name` is a well-formed method name.
pub fn is_valid_method(name: &str) -> bool {
    METHOD_NAME_RE.is_match(name)
}

/// Public methods additionally start with an alphanumeric character;
/// names with a reserved leading character (`.`, `_`, …) are internal and
/// excluded from discovery.
pub fn is_public_method(name: &str) -> bool {
    is_valid_method(name)
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric())
}

/// A request id as it appeared on the wire.
///
/// `Num` keeps the `serde_json::Number` so integer ids survive beyond 64
/// bits; `Null` is a *present* null id, distinct from the absent id of a
/// notify message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MsgId {
    Num(Number),
    Str(String),
    Null,
}

impl MsgId {
    pub fn to_value(&self) -> Value {
        match self {
            MsgId::Num(n) => Value::Number(n.clone()),
            MsgId::Str(s) => Value::String(s.clone()),
            MsgId::Null => Value::Null,
        }
    }

    pub fn from_value(v: &Value) -> Result<MsgId, RpcError> {
        match v {
            Value::Number(n) => Ok(MsgId::Num(n.clone())),
            Value::String(s) => Ok(MsgId::Str(s.clone())),
            Value::Null => Ok(MsgId::Null),
            other => Err(RpcError::InvalidRequest(format!(
                "id must be an integer, a string or null, got {other}"
            ))),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, MsgId::Null)
    }
}

impl fmt::Display for MsgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MsgId::Num(n) => write!(f, "{n}"),
            MsgId::Str(s) => write!(f, "{s}"),
            MsgId::Null => write!(f, "null"),
        }
    }
}

impl From<i64> for MsgId {
    fn from(v: i64) -> Self {
        MsgId::Num(Number::from(v))
    }
}

impl From<u64> for MsgId {
    fn from(v: u64) -> Self {
        MsgId::Num(Number::from(v))
    }
}

impl From<i32> for MsgId {
    fn from(v: i32) -> Self {
        MsgId::Num(Number::from(v))
    }
}

impl From<&str> for MsgId {
    fn from(v: &str) -> Self {
        MsgId::Str(v.to_string())
    }
}

impl From<String> for MsgId {
    fn from(v: String) -> Self {
        MsgId::Str(v)
    }
}

impl From<Number> for MsgId {
    fn from(v: Number) -> Self {
        MsgId::Num(v)
    }
}

/// Request/notify parameters, normalized to a sequence.
///
/// A positional array is kept as-is; a named object becomes a one-element
/// sequence with `by_name` set, so re-encoding restores the original wire
/// shape.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Params {
    values: Vec<Value>,
    by_name: bool,
}

impl Params {
    pub fn positional(values: Vec<Value>) -> Self {
        Self {
            values,
            by_name: false,
        }
    }

    pub fn named(map: Map<String, Value>) -> Self {
        Self {
            values: vec![Value::Object(map)],
            by_name: true,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Accept the raw wire `params` value: array, object, or absent (null).
    pub fn from_value(v: Value) -> Result<Self, RpcError> {
        match v {
            Value::Array(values) => Ok(Self::positional(values)),
            Value::Object(map) => Ok(Self::named(map)),
            Value::Null => Ok(Self::empty()),
            other => Err(RpcError::InvalidRequest(format!(
                "params must be an array or an object, got {other}"
            ))),
        }
    }

    pub fn is_by_name(&self) -> bool {
        self.by_name
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Restore the wire shape.
    pub fn to_value(&self) -> Value {
        if self.by_name {
            self.values
                .first()
                .cloned()
                .unwrap_or(Value::Object(Map::new()))
        } else {
            Value::Array(self.values.clone())
        }
    }
}

impl From<Vec<Value>> for Params {
    fn from(values: Vec<Value>) -> Self {
        Params::positional(values)
    }
}

impl From<Map<String, Value>> for Params {
    fn from(map: Map<String, Value>) -> Self {
        Params::named(map)
    }
}

fn check_method(method: &str) -> Result<(), RpcError> {
    if method.is_empty() {
        return Err(RpcError::InvalidRequest("empty method name".into()));
    }
    if !is_valid_method(method) {
        return Err(RpcError::InvalidRequest(format!(
            "invalid method name {method:?}"
        )));
    }
    Ok(())
}

/// A call expecting a correlated response.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestMessage {
    pub id: MsgId,
    pub method: String,
    pub params: Params,
    pub trace_id: String,
}

impl RequestMessage {
    pub fn new(
        id: impl Into<MsgId>,
        method: impl Into<String>,
        params: impl Into<Params>,
    ) -> Result<Self, RpcError> {
        let method = method.into();
        check_method(&method)?;
        Ok(Self {
            id: id.into(),
            method,
            params: params.into(),
            trace_id: String::new(),
        })
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }
}

/// A call with no id; the peer never replies.
#[derive(Debug, Clone, PartialEq)]
pub struct NotifyMessage {
    pub method: String,
    pub params: Params,
    pub trace_id: String,
}

impl NotifyMessage {
    pub fn new(method: impl Into<String>, params: impl Into<Params>) -> Result<Self, RpcError> {
        let method = method.into();
        check_method(&method)?;
        Ok(Self {
            method,
            params: params.into(),
            trace_id: String::new(),
        })
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }
}

/// A successful response.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultMessage {
    pub id: MsgId,
    pub result: Value,
    pub trace_id: String,
    /// Response-header side channel; HTTP/1 copies `X-`-prefixed entries
    /// through to the wire.
    pub resp_headers: Vec<(String, String)>,
}

impl ResultMessage {
    pub fn new(id: impl Into<MsgId>, result: Value) -> Self {
        Self {
            id: id.into(),
            result,
            trace_id: String::new(),
            resp_headers: Vec::new(),
        }
    }

    /// Build the response for `req`, inheriting its id and trace id.
    pub fn for_request(req: &RequestMessage, result: Value) -> Self {
        Self::new(req.id.clone(), result).with_trace_id(req.trace_id.clone())
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    pub fn with_resp_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.resp_headers.push((name.into(), value.into()));
        self
    }
}

/// A failed response.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorMessage {
    pub id: MsgId,
    pub error: ErrorBody,
    pub trace_id: String,
    pub resp_headers: Vec<(String, String)>,
}

impl ErrorMessage {
    pub fn new(id: impl Into<MsgId>, error: ErrorBody) -> Self {
        Self {
            id: id.into(),
            error,
            trace_id: String::new(),
            resp_headers: Vec::new(),
        }
    }

    pub fn for_request(req: &RequestMessage, error: ErrorBody) -> Self {
        Self::new(req.id.clone(), error).with_trace_id(req.trace_id.clone())
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    pub fn with_resp_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.resp_headers.push((name.into(), value.into()));
        self
    }
}

/// The tagged sum of everything that can cross the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(RequestMessage),
    Notify(NotifyMessage),
    Result(ResultMessage),
    Error(ErrorMessage),
}

impl Message {
    pub fn request(
        id: impl Into<MsgId>,
        method: impl Into<String>,
        params: impl Into<Params>,
    ) -> Result<Message, RpcError> {
        Ok(Message::Request(RequestMessage::new(id, method, params)?))
    }

    pub fn notify(method: impl Into<String>, params: impl Into<Params>) -> Result<Message, RpcError> {
        Ok(Message::Notify(NotifyMessage::new(method, params)?))
    }

    pub fn result(id: impl Into<MsgId>, result: Value) -> Message {
        Message::Result(ResultMessage::new(id, result))
    }

    pub fn error(id: impl Into<MsgId>, error: ErrorBody) -> Message {
        Message::Error(ErrorMessage::new(id, error))
    }

    /// The id, if the variant carries one.
    pub fn id(&self) -> Option<&MsgId> {
        match self {
            Message::Request(m) => Some(&m.id),
            Message::Notify(_) => None,
            Message::Result(m) => Some(&m.id),
            Message::Error(m) => Some(&m.id),
        }
    }

    /// Replace the id. No-op for notify messages.
    pub fn set_id(&mut self, id: MsgId) {
        match self {
            Message::Request(m) => m.id = id,
            Message::Notify(_) => {}
            Message::Result(m) => m.id = id,
            Message::Error(m) => m.id = id,
        }
    }

    pub fn with_id(mut self, id: MsgId) -> Message {
        self.set_id(id);
        self
    }

    pub fn trace_id(&self) -> &str {
        match self {
            Message::Request(m) => &m.trace_id,
            Message::Notify(m) => &m.trace_id,
            Message::Result(m) => &m.trace_id,
            Message::Error(m) => &m.trace_id,
        }
    }

    pub fn set_trace_id(&mut self, trace_id: impl Into<String>) {
        let trace_id = trace_id.into();
        match self {
            Message::Request(m) => m.trace_id = trace_id,
            Message::Notify(m) => m.trace_id = trace_id,
            Message::Result(m) => m.trace_id = trace_id,
            Message::Error(m) => m.trace_id = trace_id,
        }
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Message {
        self.set_trace_id(trace_id);
        self
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request(m) => Some(&m.method),
            Message::Notify(m) => Some(&m.method),
            _ => None,
        }
    }

    pub fn params(&self) -> Option<&Params> {
        match self {
            Message::Request(m) => Some(&m.params),
            Message::Notify(m) => Some(&m.params),
            _ => None,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, Message::Request(_))
    }

    pub fn is_notify(&self) -> bool {
        matches!(self, Message::Notify(_))
    }

    pub fn is_result(&self) -> bool {
        matches!(self, Message::Result(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Message::Error(_))
    }

    /// Requests and notifies carry a method and feed the dispatch engine.
    pub fn is_call(&self) -> bool {
        self.is_request() || self.is_notify()
    }

    pub fn result_value(&self) -> Option<&Value> {
        match self {
            Message::Result(m) => Some(&m.result),
            _ => None,
        }
    }

    pub fn error_body(&self) -> Option<&ErrorBody> {
        match self {
            Message::Error(m) => Some(&m.error),
            _ => None,
        }
    }

    pub fn resp_headers(&self) -> &[(String, String)] {
        match self {
            Message::Result(m) => &m.resp_headers,
            Message::Error(m) => &m.resp_headers,
            _ => &[],
        }
    }

    pub fn expect_request(self) -> Result<RequestMessage, RpcError> {
        match self {
            Message::Request(m) => Ok(m),
            other => Err(RpcError::WrongMessageType(format!(
                "expected a request, got {}",
                other.kind()
            ))),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Message::Request(_) => "request",
            Message::Notify(_) => "notify",
            Message::Result(_) => "result",
            Message::Error(_) => "error",
        }
    }

    /// Render the JSON-RPC 2.0 envelope.
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("jsonrpc".into(), Value::String(JSONRPC_VERSION.into()));
        match self {
            Message::Request(m) => {
                obj.insert("id".into(), m.id.to_value());
                obj.insert("method".into(), Value::String(m.method.clone()));
                if !m.params.is_empty() || m.params.is_by_name() {
                    obj.insert("params".into(), m.params.to_value());
                }
            }
            Message::Notify(m) => {
                obj.insert("method".into(), Value::String(m.method.clone()));
                if !m.params.is_empty() || m.params.is_by_name() {
                    obj.insert("params".into(), m.params.to_value());
                }
            }
            Message::Result(m) => {
                obj.insert("id".into(), m.id.to_value());
                obj.insert("result".into(), m.result.clone());
            }
            Message::Error(m) => {
                obj.insert("id".into(), m.id.to_value());
                obj.insert(
                    "error".into(),
                    serde_json::to_value(&m.error).unwrap_or(Value::Null),
                );
            }
        }
        if !self.trace_id().is_empty() {
            obj.insert(TRACEID_FIELD.into(), Value::String(self.trace_id().into()));
        }
        Value::Object(obj)
    }

    /// Encode to a single-line JSON string.
    pub fn encode(&self) -> String {
        self.to_value().to_string()
    }
}

impl From<RequestMessage> for Message {
    fn from(m: RequestMessage) -> Self {
        Message::Request(m)
    }
}

impl From<NotifyMessage> for Message {
    fn from(m: NotifyMessage) -> Self {
        Message::Notify(m)
    }
}

impl From<ResultMessage> for Message {
    fn from(m: ResultMessage) -> Self {
        Message::Result(m)
    }
}

impl From<ErrorMessage> for Message {
    fn from(m: ErrorMessage) -> Self {
        Message::Error(m)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_name_validation() {
        assert!(is_valid_method("echo"));
        assert!(is_valid_method("rpc.discover"));
        assert!(is_valid_method("ns:op#frag+x-y_z.2"));
        assert!(!is_valid_method(""));
        assert!(!is_valid_method("has space"));
        assert!(!is_valid_method("emoji🚀"));

        assert!(is_public_method("echo"));
        assert!(is_public_method("2fast"));
        assert!(!is_public_method(".internal"));
        assert!(!is_public_method("_hidden"));
    }

    #[test]
    fn test_request_rejects_bad_method() {
        assert!(RequestMessage::new(1, "", Params::empty()).is_err());
        assert!(RequestMessage::new(1, "bad method", Params::empty()).is_err());
    }

    #[test]
    fn test_response_inherits_trace_id() {
        let req = RequestMessage::new(5, "echo", vec![json!("x")])
            .unwrap()
            .with_trace_id("t-42");
        let res = ResultMessage::for_request(&req, json!("x"));
        assert_eq!(res.id, MsgId::from(5));
        assert_eq!(res.trace_id, "t-42");

        let err = ErrorMessage::for_request(&req, ErrorBody::new(100, "boom"));
        assert_eq!(err.trace_id, "t-42");
    }

    #[test]
    fn test_params_shape_is_preserved() {
        let positional = Params::positional(vec![json!(1), json!(2)]);
        assert!(!positional.is_by_name());
        assert_eq!(positional.to_value(), json!([1, 2]));

        let mut map = Map::new();
        map.insert("a".into(), json!(1));
        let named = Params::named(map);
        assert!(named.is_by_name());
        assert_eq!(named.len(), 1);
        assert_eq!(named.to_value(), json!({"a": 1}));
    }

    #[test]
    fn test_envelope_fields() {
        let msg = Message::request(1, "echo", vec![json!("hi")])
            .unwrap()
            .with_trace_id("abc");
        let v = msg.to_value();
        assert_eq!(v["jsonrpc"], "2.0");
        assert_eq!(v["id"], 1);
        assert_eq!(v["method"], "echo");
        assert_eq!(v["params"], json!(["hi"]));
        assert_eq!(v["traceid"], "abc");
    }

    #[test]
    fn test_set_id_rewrites_everything_but_notify() {
        let mut msg = Message::result(1, json!(9));
        msg.set_id(MsgId::from("wire-id"));
        assert_eq!(msg.id(), Some(&MsgId::from("wire-id")));

        let mut notify = Message::notify("tick", Vec::<Value>::new()).unwrap();
        notify.set_id(MsgId::from(3));
        assert_eq!(notify.id(), None);
    }
}
