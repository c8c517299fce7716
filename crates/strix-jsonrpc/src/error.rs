use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error_codes;
use crate::message::{ErrorMessage, MsgId};

/// Wire shape of a JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorBody {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// The closed catalog of protocol and library errors.
///
/// Codes in the `-327xx`/`-326xx` range follow the JSON-RPC 2.0 specification;
/// the small positive codes are library-level values carried in error bodies
/// so peers can distinguish timeouts and auth failures from handler faults.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RpcError {
    #[error("parse error")]
    ParseMessage,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("method not found")]
    MethodNotFound,

    #[error("{0}")]
    InvalidParams(String),

    #[error("internal error: {0}")]
    InternalError(String),

    #[error("Validation Error: {0}")]
    InvalidSchema(String),

    #[error("auth failed")]
    AuthFailed,

    #[error("request timeout")]
    Timeout,

    #[error("server error: {0}")]
    ServerError(String),

    #[error("wrong message type: {0}")]
    WrongMessageType(String),
}

impl RpcError {
    pub fn code(&self) -> i64 {
        match self {
            RpcError::ParseMessage => error_codes::PARSE_ERROR,
            RpcError::InvalidRequest(_) => error_codes::INVALID_REQUEST,
            RpcError::MethodNotFound => error_codes::METHOD_NOT_FOUND,
            RpcError::InvalidParams(_) => error_codes::INVALID_PARAMS,
            RpcError::InternalError(_) => error_codes::INTERNAL_ERROR,
            RpcError::InvalidSchema(_) => error_codes::INVALID_SCHEMA,
            RpcError::AuthFailed => error_codes::AUTH_FAILED,
            RpcError::Timeout => error_codes::TIMEOUT,
            RpcError::ServerError(_) => error_codes::SERVER_ERROR,
            RpcError::WrongMessageType(_) => error_codes::WRONG_MESSAGE_TYPE,
        }
    }

    /// Lower to the wire error body.
    pub fn body(&self) -> ErrorBody {
        ErrorBody::new(self.code(), self.to_string())
    }

    /// Project onto an error message bound to a request id and trace id.
    pub fn to_message(&self, id: MsgId, trace_id: impl Into<String>) -> ErrorMessage {
        ErrorMessage::new(id, self.body()).with_trace_id(trace_id)
    }

    /// Reverse direction: recover a catalog error from a wire body where the
    /// code matches, otherwise keep the peer's code and message as a
    /// server error.
    pub fn from_body(body: &ErrorBody) -> RpcError {
        match body.code {
            error_codes::PARSE_ERROR => RpcError::ParseMessage,
            error_codes::INVALID_REQUEST => RpcError::InvalidRequest(body.message.clone()),
            error_codes::METHOD_NOT_FOUND => RpcError::MethodNotFound,
            error_codes::INVALID_PARAMS => RpcError::InvalidParams(body.message.clone()),
            error_codes::INTERNAL_ERROR => RpcError::InternalError(body.message.clone()),
            error_codes::INVALID_SCHEMA => {
                let detail = body
                    .message
                    .strip_prefix("Validation Error: ")
                    .unwrap_or(&body.message);
                RpcError::InvalidSchema(detail.to_string())
            }
            error_codes::AUTH_FAILED => RpcError::AuthFailed,
            error_codes::TIMEOUT => RpcError::Timeout,
            error_codes::WRONG_MESSAGE_TYPE => RpcError::WrongMessageType(body.message.clone()),
            _ => RpcError::ServerError(body.message.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MsgId;

    #[test]
    fn test_error_codes() {
        assert_eq!(RpcError::ParseMessage.code(), -32700);
        assert_eq!(RpcError::MethodNotFound.code(), -32601);
        assert_eq!(RpcError::InvalidSchema("x".into()).code(), -32633);
        assert_eq!(RpcError::Timeout.code(), 200);
        assert_eq!(RpcError::AuthFailed.code(), 401);
    }

    #[test]
    fn test_projection_binds_id_and_trace() {
        let msg = RpcError::MethodNotFound.to_message(MsgId::from(7), "trace-1");
        assert_eq!(msg.id, MsgId::from(7));
        assert_eq!(msg.trace_id, "trace-1");
        assert_eq!(msg.error.code, -32601);
        assert_eq!(msg.error.message, "method not found");
    }

    #[test]
    fn test_schema_error_rendering() {
        let err = RpcError::InvalidSchema(".params[0] data is not integer".into());
        assert_eq!(
            err.to_string(),
            "Validation Error: .params[0] data is not integer"
        );
        assert_eq!(RpcError::from_body(&err.body()), err);
    }

    #[test]
    fn test_round_trip_through_body() {
        for err in [
            RpcError::ParseMessage,
            RpcError::MethodNotFound,
            RpcError::Timeout,
            RpcError::AuthFailed,
            RpcError::InvalidParams("no enough params size".into()),
        ] {
            assert_eq!(RpcError::from_body(&err.body()), err);
        }
    }
}
