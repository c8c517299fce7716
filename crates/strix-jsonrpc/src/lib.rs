//! # JSON-RPC 2.0 message model and codec
//!
//! Transport-agnostic core of the strix RPC runtime. This crate provides the
//! four-variant message algebra (request, notify, result, error), a codec that
//! decodes exactly one top-level JSON value at a time, and the closed error
//! catalog shared by every transport.
//!
//! ## Features
//! - Lossless round-trip of wire messages, including positional-vs-named
//!   parameter shape and arbitrarily large integers
//! - Integer, string and explicit-null request ids
//! - Out-of-band `traceid` propagation from request to response
//! - Streaming decoder front end for line- and stream-oriented transports

pub mod codec;
pub mod error;
pub mod guess;
pub mod message;

pub use codec::{parse_bytes, parse_str, parse_value, MessageDecoder, MessageFactory};
pub use error::{ErrorBody, RpcError};
pub use guess::{guess_json, guess_json_array};
pub use message::{
    is_public_method, is_valid_method, ErrorMessage, Message, MsgId, NotifyMessage, Params,
    RequestMessage, ResultMessage,
};

/// JSON-RPC 2.0 version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// Wire field carrying the out-of-band trace id.
pub const TRACEID_FIELD: &str = "traceid";

/// HTTP header mirroring the trace id in both directions.
pub const TRACEID_HEADER: &str = "X-Trace-Id";

/// Stable numeric error codes used on the wire.
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const INVALID_SCHEMA: i64 = -32633;

    // Library-level codes outside the reserved JSON-RPC range
    pub const SERVER_ERROR: i64 = 100;
    pub const WRONG_MESSAGE_TYPE: i64 = 105;
    pub const TIMEOUT: i64 = 200;
    pub const AUTH_FAILED: i64 = 401;
}

/// Produce a fresh trace id. Free-form hex, short enough for log lines.
pub fn new_trace_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..16].to_string()
}
