//! WebSocket handler: hyper upgrade into a tungstenite server stream.
//!
//! Text frames carry one message each; non-text frames are skipped. A frame
//! that fails to parse gets a parse-error reply but leaves the connection
//! up, since frame boundaries survive the bad payload.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use http::{header, Request, Response, StatusCode};
use hyper::body::Incoming;
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::{Message as WsMessage, Role};
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use strix_client::{MessageReader, MessageWriter, TransportError};
use strix_jsonrpc::{parse_str, Message, MsgId};

use crate::actor::Actor;
use crate::connection::serve_streaming;
use crate::context::TransportKind;
use crate::http1::{empty_body, status_response, HttpBody};
use crate::session::Session;

type ServerWs = WebSocketStream<TokioIo<Upgraded>>;

/// Whether this request asks for a WebSocket upgrade.
pub fn is_websocket_upgrade<B>(req: &Request<B>) -> bool {
    req.headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

#[derive(Clone)]
pub struct WsHandler {
    actor: Actor,
    cancel: CancellationToken,
}

impl WsHandler {
    pub fn new(actor: Actor, cancel: CancellationToken) -> Self {
        Self { actor, cancel }
    }

    /// Answer the upgrade and hand the connection to the streaming driver.
    pub fn handle(&self, mut req: Request<Incoming>) -> Response<HttpBody> {
        let Some(key) = req.headers().get(header::SEC_WEBSOCKET_KEY) else {
            return status_response(StatusCode::BAD_REQUEST);
        };
        let accept_key = derive_accept_key(key.as_bytes());
        let headers = req.headers().clone();
        let actor = self.actor.clone();
        let server_cancel = self.cancel.clone();

        tokio::spawn(async move {
            match hyper::upgrade::on(&mut req).await {
                Ok(upgraded) => {
                    let ws = WebSocketStream::from_raw_socket(
                        TokioIo::new(upgraded),
                        Role::Server,
                        None,
                    )
                    .await;
                    serve_ws(actor, headers, ws, server_cancel).await;
                }
                Err(e) => warn!(error = %e, "websocket upgrade failed"),
            }
        });

        let mut resp = Response::new(empty_body());
        *resp.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
        let h = resp.headers_mut();
        h.insert(header::CONNECTION, header::HeaderValue::from_static("Upgrade"));
        h.insert(header::UPGRADE, header::HeaderValue::from_static("websocket"));
        if let Ok(value) = header::HeaderValue::from_str(&accept_key) {
            h.insert(header::SEC_WEBSOCKET_ACCEPT, value);
        }
        resp
    }
}

async fn serve_ws(
    actor: Actor,
    headers: http::HeaderMap,
    ws: ServerWs,
    server_cancel: CancellationToken,
) {
    let (sink, stream) = ws.split();
    let (session, outbound) = Session::new();
    let reader = WsServerReader {
        stream,
        reply: session.sender(),
    };
    let writer = WsServerWriter { sink };
    serve_streaming(
        actor,
        TransportKind::WebSocket,
        headers,
        session,
        outbound,
        reader,
        writer,
        server_cancel,
    )
    .await;
}

struct WsServerReader {
    stream: SplitStream<ServerWs>,
    reply: mpsc::Sender<Message>,
}

#[async_trait]
impl MessageReader for WsServerReader {
    async fn read_message(&mut self) -> Result<Option<Message>, TransportError> {
        loop {
            match self.stream.next().await {
                None => return Ok(None),
                Some(Ok(WsMessage::Text(text))) => match parse_str(text.as_str()) {
                    Ok(msg) => return Ok(Some(msg)),
                    Err(e) => {
                        // Framing survives; answer the bad frame and go on.
                        let reply = Message::Error(e.to_message(MsgId::Null, String::new()));
                        let _ = self.reply.send(reply).await;
                    }
                },
                Some(Ok(WsMessage::Close(_))) => return Ok(None),
                Some(Ok(_)) => {}
                Some(Err(WsError::ConnectionClosed)) | Some(Err(WsError::AlreadyClosed)) => {
                    return Ok(None)
                }
                Some(Err(e)) => return Err(TransportError::Io(e.to_string())),
            }
        }
    }
}

struct WsServerWriter {
    sink: SplitSink<ServerWs, WsMessage>,
}

#[async_trait]
impl MessageWriter for WsServerWriter {
    async fn write_message(&mut self, msg: &Message) -> Result<(), TransportError> {
        self.sink
            .send(WsMessage::text(msg.encode()))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.sink.close().await;
    }
}
