//! URL scheme dispatch and the unified client handle.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use url::Url;

use strix_jsonrpc::{Message, RequestMessage};

use crate::error::{ClientError, ClientResult};
use crate::http1::Http1Client;
use crate::streaming::StreamingClient;
use crate::transport::h2::H2Connector;
use crate::transport::tcp::TcpConnector;
use crate::transport::ws::WsConnector;

/// Default server URL for tools: `JSONRPC_CONNECT` or localhost.
pub fn default_server_url() -> String {
    std::env::var("JSONRPC_CONNECT").unwrap_or_else(|_| "http://127.0.0.1:9990".to_string())
}

/// One client surface over both the request-response and the streaming
/// transports. `http|https` map to HTTP/1; everything else is a streaming
/// transport driven by [`StreamingClient`].
pub enum ClientHandle {
    Http1(Http1Client),
    Streaming(StreamingClient),
}

/// Build a client for `url`. Scheme dispatch:
/// `http|https` → HTTP/1, `ws|wss` → WebSocket, `h2|h2c` → HTTP/2,
/// `tcp` → TCP, `vsock` → vsock (feature `vsock`).
pub fn connect_url(url_str: &str) -> ClientResult<ClientHandle> {
    let url = Url::parse(url_str).map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(ClientHandle::Http1(Http1Client::new(url)?)),
        "ws" | "wss" => Ok(ClientHandle::Streaming(StreamingClient::new(
            Arc::new(WsConnector::new()),
            url,
        ))),
        "h2" => Ok(ClientHandle::Streaming(StreamingClient::new(
            Arc::new(H2Connector::tls()),
            url,
        ))),
        "h2c" => Ok(ClientHandle::Streaming(StreamingClient::new(
            Arc::new(H2Connector::cleartext()),
            url,
        ))),
        "tcp" => Ok(ClientHandle::Streaming(StreamingClient::new(
            Arc::new(TcpConnector::new()),
            url,
        ))),
        #[cfg(feature = "vsock")]
        "vsock" => Ok(ClientHandle::Streaming(StreamingClient::new(
            Arc::new(crate::transport::vsock::VsockConnector::new()),
            url,
        ))),
        scheme => Err(ClientError::UrlNotSupported(scheme.to_string())),
    }
}

impl ClientHandle {
    pub async fn call(&self, req: RequestMessage) -> ClientResult<Message> {
        match self {
            ClientHandle::Http1(client) => client.call(req).await,
            ClientHandle::Streaming(client) => client.call(req).await,
        }
    }

    pub async fn unwrap_call<T: DeserializeOwned>(&self, req: RequestMessage) -> ClientResult<T> {
        match self {
            ClientHandle::Http1(client) => client.unwrap_call(req).await,
            ClientHandle::Streaming(client) => client.unwrap_call(req).await,
        }
    }

    pub async fn send(&self, msg: Message) -> ClientResult<()> {
        match self {
            ClientHandle::Http1(client) => client.send(msg).await,
            ClientHandle::Streaming(client) => client.send(msg).await,
        }
    }

    pub fn close(&self) {
        if let ClientHandle::Streaming(client) = self {
            client.close();
        }
    }

    /// The streaming client underneath, when there is one.
    pub fn streaming(&self) -> Option<&StreamingClient> {
        match self {
            ClientHandle::Streaming(client) => Some(client),
            ClientHandle::Http1(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_dispatch() {
        assert!(matches!(
            connect_url("http://127.0.0.1:9990").unwrap(),
            ClientHandle::Http1(_)
        ));
        assert!(matches!(
            connect_url("ws://127.0.0.1:9990").unwrap(),
            ClientHandle::Streaming(_)
        ));
        assert!(matches!(
            connect_url("h2c://127.0.0.1:9990").unwrap(),
            ClientHandle::Streaming(_)
        ));
        assert!(matches!(
            connect_url("tcp://127.0.0.1:9990").unwrap(),
            ClientHandle::Streaming(_)
        ));
    }

    #[test]
    fn test_unsupported_scheme() {
        match connect_url("ftp://127.0.0.1:21") {
            Err(ClientError::UrlNotSupported(scheme)) => assert_eq!(scheme, "ftp"),
            other => panic!("expected unsupported scheme, got {:?}", other.is_ok()),
        }
    }

    #[test]
    fn test_default_server_url_fallback() {
        // Only meaningful when the variable is unset in the test env.
        if std::env::var("JSONRPC_CONNECT").is_err() {
            assert_eq!(default_server_url(), "http://127.0.0.1:9990");
        }
    }
}
