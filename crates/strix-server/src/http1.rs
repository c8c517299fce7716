//! HTTP/1.1 request-response handler.
//!
//! `POST /` with one JSON-RPC message in, one out. Malformed JSON answers
//! 400 with a parse-error body; an unknown method answers 200 with a
//! method-not-found body; non-POST answers 405. The trace id is mirrored via
//! `X-Trace-Id` both ways and `X-`-prefixed response headers from the
//! message's side channel are copied through.

use std::convert::Infallible;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, Method, Request, Response, StatusCode};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Incoming;
use tracing::debug;

use strix_jsonrpc::{
    new_trace_id, parse_bytes, Message, MsgId, ResultMessage, RpcError, TRACEID_HEADER,
};

use crate::actor::Actor;
use crate::context::{RpcContext, TransportKind};
use crate::error::ServerError;
use crate::DISCOVER_METHOD;

pub(crate) type HttpBody = BoxBody<Bytes, Infallible>;

pub(crate) fn full_body(data: impl Into<Bytes>) -> HttpBody {
    Full::new(data.into()).boxed()
}

pub(crate) fn empty_body() -> HttpBody {
    Empty::<Bytes>::new().boxed()
}

pub(crate) fn status_response(status: StatusCode) -> Response<HttpBody> {
    let mut resp = Response::new(empty_body());
    *resp.status_mut() = status;
    resp
}

#[derive(Clone)]
pub struct Http1Handler {
    actor: Actor,
}

impl Http1Handler {
    pub fn new(actor: Actor) -> Self {
        Self { actor }
    }

    pub async fn handle(&self, req: Request<Incoming>) -> Response<HttpBody> {
        if req.method() != Method::POST {
            return status_response(StatusCode::METHOD_NOT_ALLOWED);
        }
        let headers = req.headers().clone();
        let body = match req.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                debug!(error = %e, "failed reading request body");
                return parse_error_response();
            }
        };
        handle_single_message(&self.actor, TransportKind::Http1, headers, &body).await
    }
}

fn parse_error_response() -> Response<HttpBody> {
    let body = Message::Error(RpcError::ParseMessage.to_message(MsgId::Null, String::new()));
    json_response(StatusCode::BAD_REQUEST, &body)
}

/// One-message-in, one-message-out handling shared by the HTTP/1 handler
/// and the HTTP/2 handler's plain request path.
pub(crate) async fn handle_single_message(
    actor: &Actor,
    transport: TransportKind,
    headers: HeaderMap,
    body: &[u8],
) -> Response<HttpBody> {
    let mut msg = match parse_bytes(body) {
        Ok(msg) => msg,
        Err(_) => return parse_error_response(),
    };

    if msg.trace_id().is_empty() {
        let from_header = headers
            .get(TRACEID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if from_header.is_empty() {
            msg.set_trace_id(new_trace_id());
        } else {
            msg.set_trace_id(from_header);
        }
    }

    if let Message::Request(req) = &msg {
        if req.method == DISCOVER_METHOD {
            let resp = Message::from(ResultMessage::for_request(req, actor.discover_payload()));
            return json_response(StatusCode::OK, &resp);
        }
    }

    let req_meta = match &msg {
        Message::Request(req) => Some((req.id.clone(), req.trace_id.clone())),
        _ => None,
    };
    let ctx = RpcContext::new(transport).with_headers(headers);

    match actor.feed(msg, ctx).await {
        Ok(Some(resp)) => json_response(StatusCode::OK, &resp),
        Ok(None) => status_response(StatusCode::OK),
        // Forward a captured upstream response as-is: status plus body.
        Err(ServerError::Upstream { status, body, .. }) => {
            let mut resp = Response::new(full_body(body));
            *resp.status_mut() =
                StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            resp
        }
        Err(e) => match req_meta {
            Some((id, trace_id)) => {
                let reply = RpcError::InternalError(e.to_string()).to_message(id, trace_id);
                json_response(StatusCode::OK, &Message::Error(reply))
            }
            None => status_response(StatusCode::OK),
        },
    }
}

fn json_response(status: StatusCode, msg: &Message) -> Response<HttpBody> {
    let mut resp = Response::new(full_body(msg.encode()));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if !msg.trace_id().is_empty() {
        if let Ok(value) = HeaderValue::from_str(msg.trace_id()) {
            resp.headers_mut().insert(TRACEID_HEADER, value);
        }
    }
    // Only X- response headers cross the boundary.
    for (name, value) in msg.resp_headers() {
        if !name.to_ascii_lowercase().starts_with("x-") {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            resp.headers_mut().insert(name, value);
        }
    }
    resp
}
