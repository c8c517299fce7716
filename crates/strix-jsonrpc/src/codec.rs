//! Byte and streaming decoder front ends.
//!
//! Classification happens on a parsed `Value`, never on a serde-derived
//! shape: the wire rules are positional (which fields are present) rather
//! than structural, and the same object can only be told apart by looking
//! at `id`, `method` and `error` together.

use std::io;

use serde_json::de::IoRead;
use serde_json::{Deserializer, StreamDeserializer, Value};

use crate::error::{ErrorBody, RpcError};
use crate::message::{
    ErrorMessage, Message, MsgId, NotifyMessage, Params, RequestMessage, ResultMessage,
};
use crate::TRACEID_FIELD;

/// Message construction and decoding policy.
///
/// The only knob is `id_not_null`: when set, a request whose id is an
/// explicit JSON `null` is rejected at construction and at decode time.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageFactory {
    id_not_null: bool,
}

impl MessageFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject requests carrying an explicit null id.
    pub fn id_not_null(mut self, flag: bool) -> Self {
        self.id_not_null = flag;
        self
    }

    pub fn request(
        &self,
        id: impl Into<MsgId>,
        method: impl Into<String>,
        params: impl Into<Params>,
    ) -> Result<RequestMessage, RpcError> {
        let id = id.into();
        if self.id_not_null && id.is_null() {
            return Err(RpcError::InvalidRequest("null id is not allowed".into()));
        }
        RequestMessage::new(id, method, params)
    }

    /// Classify one parsed JSON value into a message.
    pub fn parse_value(&self, v: Value) -> Result<Message, RpcError> {
        let Value::Object(mut obj) = v else {
            return Err(RpcError::ParseMessage);
        };

        let trace_id = obj
            .get(TRACEID_FIELD)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let method = match obj.remove("method") {
            Some(Value::String(m)) => Some(m),
            Some(_) => {
                return Err(RpcError::InvalidRequest("method must be a string".into()));
            }
            None => None,
        };

        if let Some(id_value) = obj.remove("id") {
            let id = MsgId::from_value(&id_value)?;
            if let Some(method) = method {
                if self.id_not_null && id.is_null() {
                    return Err(RpcError::InvalidRequest("null id is not allowed".into()));
                }
                let params = Params::from_value(obj.remove("params").unwrap_or(Value::Null))?;
                return Ok(RequestMessage::new(id, method, params)?
                    .with_trace_id(trace_id)
                    .into());
            }
            match obj.remove("error") {
                Some(err_value) if !err_value.is_null() => {
                    let body: ErrorBody = serde_json::from_value(err_value).map_err(|e| {
                        RpcError::InvalidRequest(format!("malformed error body: {e}"))
                    })?;
                    Ok(ErrorMessage::new(id, body).with_trace_id(trace_id).into())
                }
                _ => {
                    let result = obj.remove("result").unwrap_or(Value::Null);
                    Ok(ResultMessage::new(id, result)
                        .with_trace_id(trace_id)
                        .into())
                }
            }
        } else if let Some(method) = method {
            let params = Params::from_value(obj.remove("params").unwrap_or(Value::Null))?;
            Ok(NotifyMessage::new(method, params)?
                .with_trace_id(trace_id)
                .into())
        } else {
            Err(RpcError::ParseMessage)
        }
    }

    pub fn parse_str(&self, s: &str) -> Result<Message, RpcError> {
        let v: Value = serde_json::from_str(s).map_err(|_| RpcError::ParseMessage)?;
        self.parse_value(v)
    }

    pub fn parse_bytes(&self, bytes: &[u8]) -> Result<Message, RpcError> {
        let v: Value = serde_json::from_slice(bytes).map_err(|_| RpcError::ParseMessage)?;
        self.parse_value(v)
    }
}

/// Parse one message with the default (permissive) factory.
pub fn parse_value(v: Value) -> Result<Message, RpcError> {
    MessageFactory::default().parse_value(v)
}

pub fn parse_str(s: &str) -> Result<Message, RpcError> {
    MessageFactory::default().parse_str(s)
}

pub fn parse_bytes(bytes: &[u8]) -> Result<Message, RpcError> {
    MessageFactory::default().parse_bytes(bytes)
}

/// Stateful decoder yielding messages one top-level JSON value at a time.
///
/// Values need no separator beyond JSON's own framing, so both
/// newline-delimited streams and back-to-back values decode correctly.
pub struct MessageDecoder<R: io::Read> {
    stream: StreamDeserializer<'static, IoRead<R>, Value>,
    factory: MessageFactory,
}

impl<R: io::Read> MessageDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self::with_factory(reader, MessageFactory::default())
    }

    pub fn with_factory(reader: R, factory: MessageFactory) -> Self {
        Self {
            stream: Deserializer::from_reader(reader).into_iter(),
            factory,
        }
    }

    /// Decode the next message, advancing by exactly one top-level value.
    /// `Ok(None)` is a clean end of stream.
    pub fn next(&mut self) -> Result<Option<Message>, RpcError> {
        match self.stream.next() {
            None => Ok(None),
            Some(Ok(v)) => self.factory.parse_value(v).map(Some),
            Some(Err(_)) => Err(RpcError::ParseMessage),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classification() {
        assert!(parse_str(r#"{"jsonrpc":"2.0","id":1,"method":"echo","params":[1]}"#)
            .unwrap()
            .is_request());
        assert!(parse_str(r#"{"jsonrpc":"2.0","method":"tick","params":[]}"#)
            .unwrap()
            .is_notify());
        assert!(parse_str(r#"{"jsonrpc":"2.0","id":1,"result":null}"#)
            .unwrap()
            .is_result());
        assert!(
            parse_str(r#"{"jsonrpc":"2.0","id":1,"error":{"code":100,"message":"x"}}"#)
                .unwrap()
                .is_error()
        );
        // id + null error is a result, not an error
        assert!(parse_str(r#"{"jsonrpc":"2.0","id":1,"error":null,"result":3}"#)
            .unwrap()
            .is_result());
    }

    #[test]
    fn test_unclassifiable_fails_parse() {
        assert_eq!(parse_str(r#"{"jsonrpc":"2.0"}"#), Err(RpcError::ParseMessage));
        assert_eq!(parse_str("[1,2,3]"), Err(RpcError::ParseMessage));
        assert_eq!(parse_str("not json"), Err(RpcError::ParseMessage));
    }

    #[test]
    fn test_scalar_params_rejected() {
        let err = parse_str(r#"{"id":1,"method":"m","params":42}"#).unwrap_err();
        assert!(matches!(err, RpcError::InvalidRequest(_)));
    }

    #[test]
    fn test_id_fidelity() {
        let m = parse_str(r#"{"id":42,"method":"m"}"#).unwrap();
        assert_eq!(m.id(), Some(&MsgId::from(42)));

        let m = parse_str(r#"{"id":"abc","method":"m"}"#).unwrap();
        assert_eq!(m.id(), Some(&MsgId::from("abc")));

        let m = parse_str(r#"{"id":null,"method":"m"}"#).unwrap();
        assert_eq!(m.id(), Some(&MsgId::Null));

        let m = parse_str(r#"{"method":"m"}"#).unwrap();
        assert_eq!(m.id(), None);
    }

    #[test]
    fn test_id_not_null_factory() {
        let strict = MessageFactory::new().id_not_null(true);
        assert!(strict.parse_str(r#"{"id":null,"method":"m"}"#).is_err());
        assert!(strict.parse_str(r#"{"id":1,"method":"m"}"#).is_ok());
        assert!(strict.request(MsgId::Null, "m", Params::empty()).is_err());
        // null ids on responses stay legal; a parse-error reply has one
        assert!(strict.parse_str(r#"{"id":null,"result":1}"#).is_ok());
    }

    #[test]
    fn test_round_trip_positional_and_named() {
        let wire = r#"{"jsonrpc":"2.0","id":1,"method":"add","params":[1,2],"traceid":"t1"}"#;
        let m = parse_str(wire).unwrap();
        assert!(!m.params().unwrap().is_by_name());
        assert_eq!(m.trace_id(), "t1");
        assert_eq!(parse_str(&m.encode()).unwrap(), m);

        let wire = r#"{"jsonrpc":"2.0","id":2,"method":"add","params":{"a":1,"b":2}}"#;
        let m = parse_str(wire).unwrap();
        assert!(m.params().unwrap().is_by_name());
        assert_eq!(m.params().unwrap().len(), 1);
        assert_eq!(parse_str(&m.encode()).unwrap(), m);
    }

    #[test]
    fn test_large_integer_fidelity() {
        let digits = "1234498219282917838937829383759200002030081000698";
        let wire = format!(r#"{{"id":1,"method":"echo","params":[{digits}]}}"#);
        let m = parse_str(&wire).unwrap();
        let encoded = m.encode();
        assert!(encoded.contains(digits), "large integer was mangled: {encoded}");
        assert_eq!(parse_str(&encoded).unwrap(), m);
    }

    #[test]
    fn test_unknown_fields_ignored_except_traceid() {
        let m = parse_str(r#"{"id":1,"result":7,"bogus":true,"traceid":"zz"}"#).unwrap();
        assert_eq!(m.trace_id(), "zz");
        assert_eq!(m.result_value(), Some(&json!(7)));
    }

    #[test]
    fn test_decoder_yields_one_value_at_a_time() {
        let feed = concat!(
            r#"{"id":1,"method":"a"}"#,
            "\n",
            r#"{"id":2,"method":"b"}"#,
            r#"{"method":"c"}"#,
        );
        let mut dec = MessageDecoder::new(feed.as_bytes());
        assert_eq!(dec.next().unwrap().unwrap().method(), Some("a"));
        assert_eq!(dec.next().unwrap().unwrap().method(), Some("b"));
        assert_eq!(dec.next().unwrap().unwrap().method(), Some("c"));
        assert!(dec.next().unwrap().is_none());
    }

    #[test]
    fn test_decoder_truncated_value_is_parse_error() {
        let mut dec = MessageDecoder::new(&br#"{"id":1,"meth"#[..]);
        assert_eq!(dec.next(), Err(RpcError::ParseMessage));
    }
}
