//! HTTP/2 handler.
//!
//! An extended `PRI` request opens the long-lived server stream: the request
//! body carries newline-separated messages from the client, the response
//! body streams them back. Any other method gets plain request-response
//! handling over the same connection.

use std::convert::Infallible;

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, StreamBody};
use hyper::body::{Frame, Incoming};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use strix_client::transport::h2::{H2BodyReader, H2BodySender};

use crate::actor::Actor;
use crate::connection::serve_streaming;
use crate::context::TransportKind;
use crate::http1::{handle_single_message, status_response, HttpBody};
use crate::session::Session;

/// Extended method opening the bidirectional stream.
pub const PRI_METHOD: &str = "PRI";

#[derive(Clone)]
pub struct H2Handler {
    actor: Actor,
    cancel: CancellationToken,
}

impl H2Handler {
    pub fn new(actor: Actor, cancel: CancellationToken) -> Self {
        Self { actor, cancel }
    }

    pub async fn handle(&self, req: Request<Incoming>) -> Response<HttpBody> {
        if req.method().as_str() == PRI_METHOD {
            return self.open_stream(req);
        }
        if req.method() == Method::POST {
            let headers = req.headers().clone();
            let body = match req.into_body().collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(_) => return status_response(StatusCode::BAD_REQUEST),
            };
            return handle_single_message(&self.actor, TransportKind::Http2, headers, &body)
                .await;
        }
        status_response(StatusCode::METHOD_NOT_ALLOWED)
    }

    fn open_stream(&self, req: Request<Incoming>) -> Response<HttpBody> {
        let headers = req.headers().clone();
        let inbound = req.into_body();

        let (body_tx, body_rx) = mpsc::channel::<Result<Frame<Bytes>, Infallible>>(16);
        let (session, outbound) = Session::new();

        tokio::spawn(serve_streaming(
            self.actor.clone(),
            TransportKind::Http2,
            headers,
            session,
            outbound,
            H2BodyReader::new(inbound),
            H2BodySender::new(body_tx),
            self.cancel.clone(),
        ));

        let body = StreamBody::new(ReceiverStream::new(body_rx)).boxed();
        let mut resp = Response::new(body);
        resp.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        resp
    }
}
