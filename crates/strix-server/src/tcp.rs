//! Raw TCP (and vsock) servers: newline-delimited JSON over stream sockets.

use std::net::SocketAddr;

use http::HeaderMap;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use strix_client::transport::tcp::{LineReader, LineWriter};

use crate::actor::Actor;
use crate::connection::serve_streaming;
use crate::context::TransportKind;
use crate::error::ServerResult;
use crate::session::Session;

pub struct TcpServer {
    actor: Actor,
    cancel: CancellationToken,
}

impl TcpServer {
    pub fn new(actor: Actor) -> Self {
        Self {
            actor,
            cancel: CancellationToken::new(),
        }
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub async fn serve_addr(&self, addr: SocketAddr) -> ServerResult<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    pub async fn serve(&self, listener: TcpListener) -> ServerResult<()> {
        info!(addr = %listener.local_addr()?, "tcp server listening");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    debug!(%peer, "tcp connection accepted");
                    let (read_half, write_half) = stream.into_split();
                    let (session, outbound) = Session::new();
                    tokio::spawn(serve_streaming(
                        self.actor.clone(),
                        TransportKind::Tcp,
                        HeaderMap::new(),
                        session,
                        outbound,
                        LineReader::new(read_half),
                        LineWriter::new(write_half),
                        self.cancel.clone(),
                    ));
                }
            }
        }
    }
}

#[cfg(feature = "vsock")]
pub struct VsockServer {
    actor: Actor,
    cancel: CancellationToken,
}

#[cfg(feature = "vsock")]
impl VsockServer {
    pub fn new(actor: Actor) -> Self {
        Self {
            actor,
            cancel: CancellationToken::new(),
        }
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub async fn serve(&self, mut listener: tokio_vsock::VsockListener) -> ServerResult<()> {
        info!("vsock server listening");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    debug!(?peer, "vsock connection accepted");
                    let (read_half, write_half) = tokio::io::split(stream);
                    let (session, outbound) = Session::new();
                    tokio::spawn(serve_streaming(
                        self.actor.clone(),
                        TransportKind::Vsock,
                        HeaderMap::new(),
                        session,
                        outbound,
                        LineReader::new(read_half),
                        LineWriter::new(write_half),
                        self.cancel.clone(),
                    ));
                }
            }
        }
    }
}
