//! The streaming transport contract and URL scheme dispatch.
//!
//! Every full-duplex transport (WebSocket, HTTP/2, TCP, vsock) connects into
//! a reader/writer half pair; the streaming client drives the halves from
//! its independent receive and send loops. HTTP/1 is request-response only
//! and lives in [`crate::http1`].

use async_trait::async_trait;
use http::HeaderMap;
use url::Url;

use strix_jsonrpc::Message;

use crate::error::TransportError;

pub mod h2;
pub mod tcp;
pub mod ws;

#[cfg(feature = "vsock")]
pub mod vsock;

/// Inbound half of a connected transport.
#[async_trait]
pub trait MessageReader: Send {
    /// Read the next message. `Ok(None)` is a clean end of stream; an error
    /// means the connection is no longer usable.
    async fn read_message(&mut self) -> Result<Option<Message>, TransportError>;
}

/// Outbound half of a connected transport.
#[async_trait]
pub trait MessageWriter: Send {
    async fn write_message(&mut self, msg: &Message) -> Result<(), TransportError>;

    /// Flush and close the outbound side. Idempotent best effort.
    async fn close(&mut self);
}

pub type BoxReader = Box<dyn MessageReader>;
pub type BoxWriter = Box<dyn MessageWriter>;

/// Dials one connection and splits it into halves.
///
/// Connect refusal maps to [`TransportError::ConnectFailed`]; everything
/// after a successful connect surfaces through the halves.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        url: &Url,
        headers: &HeaderMap,
    ) -> Result<(BoxReader, BoxWriter), TransportError>;
}
