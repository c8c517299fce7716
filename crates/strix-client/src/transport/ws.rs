//! WebSocket streaming transport. One text frame carries one message.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use http::HeaderMap;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::warn;
use url::Url;

use strix_jsonrpc::{parse_str, Message};

use crate::error::TransportError;
use crate::transport::{BoxReader, BoxWriter, Connector, MessageReader, MessageWriter};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dials `ws://` (and, with the `tls` feature, `wss://`) endpoints.
#[derive(Debug, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(
        &self,
        url: &Url,
        headers: &HeaderMap,
    ) -> Result<(BoxReader, BoxWriter), TransportError> {
        if url.scheme() == "wss" && !cfg!(feature = "tls") {
            return Err(TransportError::ConnectFailed(
                "wss requires the tls feature".into(),
            ));
        }
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        for (name, value) in headers {
            request.headers_mut().insert(name.clone(), value.clone());
        }
        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        let (sink, stream) = stream.split();
        Ok((
            Box::new(WsReader { stream }),
            Box::new(WsWriter { sink }),
        ))
    }
}

struct WsReader {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl MessageReader for WsReader {
    async fn read_message(&mut self) -> Result<Option<Message>, TransportError> {
        loop {
            match self.stream.next().await {
                None => return Ok(None),
                Some(Ok(WsMessage::Text(text))) => match parse_str(text.as_str()) {
                    Ok(msg) => return Ok(Some(msg)),
                    // Framing survives a bad frame; drop it and keep reading.
                    Err(e) => warn!(error = %e, "skipping unparseable text frame"),
                },
                Some(Ok(WsMessage::Close(_))) => return Ok(None),
                // Non-text frames are skipped; ping/pong is handled by the
                // protocol layer underneath.
                Some(Ok(_)) => {}
                Some(Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed)) => {
                    return Ok(None)
                }
                Some(Err(e)) => return Err(TransportError::Io(e.to_string())),
            }
        }
    }
}

struct WsWriter {
    sink: SplitSink<WsStream, WsMessage>,
}

#[async_trait]
impl MessageWriter for WsWriter {
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
