//! Shared driver for streaming connections.
//!
//! Every accepted streaming connection gets a fresh session, one send loop
//! draining the session's bounded channel in FIFO order, and one receive
//! loop feeding the actor. Each inbound message is dispatched on its own
//! task so a slow handler never blocks either loop.

use http::HeaderMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use strix_client::{MessageReader, MessageWriter};
use strix_jsonrpc::{Message, ResultMessage, RpcError};

use crate::actor::Actor;
use crate::context::{RpcContext, TransportKind};
use crate::session::Session;
use crate::DISCOVER_METHOD;

#[allow(clippy::too_many_arguments)]
pub(crate) async fn serve_streaming<R, W>(
    actor: Actor,
    transport: TransportKind,
    headers: HeaderMap,
    session: Session,
    mut outbound: mpsc::Receiver<Message>,
    mut reader: R,
    mut writer: W,
    server_cancel: CancellationToken,
) where
    R: MessageReader + 'static,
    W: MessageWriter + 'static,
{
    let cancel = session.cancel_token();
    debug!(session = session.id(), %transport, "streaming connection open");

    let send_cancel = cancel.clone();
    let send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = send_cancel.cancelled() => break,
                next = outbound.recv() => match next {
                    None => break,
                    Some(msg) => {
                        if let Err(e) = writer.write_message(&msg).await {
                            debug!(error = %e, "write failed, closing connection");
                            send_cancel.cancel();
                            break;
                        }
                    }
                },
            }
        }
        writer.close().await;
    });

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = server_cancel.cancelled() => break,
            next = reader.read_message() => match next {
                Ok(Some(msg)) => dispatch_message(&actor, transport, &headers, &session, msg),
                Ok(None) => break,
                Err(e) => {
                    debug!(error = %e, "read failed, closing connection");
                    break;
                }
            },
        }
    }

    cancel.cancel();
    let _ = send_task.await;
    actor.run_close(session);
    debug!("streaming connection closed");
}

fn dispatch_message(
    actor: &Actor,
    transport: TransportKind,
    headers: &HeaderMap,
    session: &Session,
    msg: Message,
) {
    let actor = actor.clone();
    let session = session.clone();
    let headers = headers.clone();
    tokio::spawn(async move {
        let reply_to = session.sender();

        if let Message::Request(req) = &msg {
            if req.method == DISCOVER_METHOD {
                let resp = ResultMessage::for_request(req, actor.discover_payload());
                let _ = reply_to.send(resp.into()).await;
                return;
            }
        }

        let req_meta = match &msg {
            Message::Request(req) => Some((req.id.clone(), req.trace_id.clone())),
            _ => None,
        };
        let ctx = RpcContext::new(transport)
            .with_headers(headers)
            .with_session(session.clone())
            .with_cancel(session.cancel_token());

        match actor.feed(msg, ctx).await {
            Ok(Some(resp)) => {
                let _ = reply_to.send(resp).await;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "dispatch failed");
                // Streaming transports have no HTTP status to mirror; fail
                // the request with an internal error instead of hanging it.
                if let Some((id, trace_id)) = req_meta {
                    let reply = RpcError::InternalError(e.to_string()).to_message(id, trace_id);
                    let _ = reply_to.send(reply.into()).await;
                }
            }
        }
    });
}
