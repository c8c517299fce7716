//! Protocol-sniffing gateway: one port for HTTP/1.1, WebSocket and HTTP/2.
//!
//! Routing per request: an already-negotiated HTTP/2 connection goes to the
//! HTTP/2 handler; `Upgrade: websocket` goes to the WebSocket handler;
//! `Upgrade: h2c` goes to the HTTP/2 cleartext handler; everything else is
//! plain HTTP/1. Without TLS the HTTP/2 leg is the `h2c` variant.

use std::convert::Infallible;
use std::net::SocketAddr;

use http::{header, Request, Response, Version};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::actor::Actor;
use crate::error::ServerResult;
use crate::http1::{Http1Handler, HttpBody};
use crate::http2::H2Handler;
use crate::websocket::{is_websocket_upgrade, WsHandler};

pub struct Gateway {
    actor: Actor,
    cancel: CancellationToken,
}

impl Gateway {
    pub fn new(actor: Actor) -> Self {
        Self {
            actor,
            cancel: CancellationToken::new(),
        }
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub async fn serve_addr(&self, addr: SocketAddr) -> ServerResult<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Accept loop. Each connection is served by the auto (HTTP/1 +
    /// prior-knowledge HTTP/2) connection builder with upgrades enabled.
    pub async fn serve(&self, listener: TcpListener) -> ServerResult<()> {
        info!(addr = %listener.local_addr()?, "gateway listening");
        let http1 = Http1Handler::new(self.actor.clone());
        let ws = WsHandler::new(self.actor.clone(), self.cancel.clone());
        let h2 = H2Handler::new(self.actor.clone(), self.cancel.clone());

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    debug!(%peer, "gateway connection accepted");
                    let io = TokioIo::new(stream);
                    let http1 = http1.clone();
                    let ws = ws.clone();
                    let h2 = h2.clone();
                    tokio::spawn(async move {
                        let service = service_fn(move |req| {
                            let http1 = http1.clone();
                            let ws = ws.clone();
                            let h2 = h2.clone();
                            async move {
                                Ok::<_, Infallible>(dispatch(req, http1, ws, h2).await)
                            }
                        });
                        let builder =
                            hyper_util::server::conn::auto::Builder::new(TokioExecutor::new());
                        if let Err(e) = builder
                            .serve_connection_with_upgrades(io, service)
                            .await
                        {
                            debug!(error = %e, "connection ended with error");
                        }
                    });
                }
            }
        }
    }
}

async fn dispatch(
    req: Request<Incoming>,
    http1: Http1Handler,
    ws: WsHandler,
    h2: H2Handler,
) -> Response<HttpBody> {
    if req.version() == Version::HTTP_2 {
        return h2.handle(req).await;
    }
    if is_websocket_upgrade(&req) {
        return ws.handle(req);
    }
    if wants_h2c_upgrade(&req) {
        return h2.handle(req).await;
    }
    http1.handle(req).await
}

fn wants_h2c_upgrade<B>(req: &Request<B>) -> bool {
    req.headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("h2c"))
        .unwrap_or(false)
}
