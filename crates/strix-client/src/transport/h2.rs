//! HTTP/2 streaming transport.
//!
//! One long-lived stream opened with an extended `PRI` request; both bodies
//! carry newline-separated JSON values. `h2c` speaks prior-knowledge
//! cleartext; `h2` runs the same framing over TLS (feature `tls`).

use std::convert::Infallible;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, Method, Request};
use http_body_util::{BodyExt, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;
use url::Url;

use strix_jsonrpc::{parse_str, Message};

use crate::error::TransportError;
use crate::transport::{BoxReader, BoxWriter, Connector, MessageReader, MessageWriter};

type OutboundBody = StreamBody<ReceiverStream<Result<Frame<Bytes>, Infallible>>>;

/// Extended method opening the server stream.
const PRI_METHOD: &[u8] = b"PRI";

/// Dials `h2c://host:port` (cleartext, prior knowledge) and, with the `tls`
/// feature, `h2://host:port`.
#[derive(Debug, Default)]
pub struct H2Connector {
    tls: bool,
}

impl H2Connector {
    pub fn cleartext() -> Self {
        Self { tls: false }
    }

    pub fn tls() -> Self {
        Self { tls: true }
    }
}

#[async_trait]
impl Connector for H2Connector {
    async fn connect(
        &self,
        url: &Url,
        headers: &HeaderMap,
    ) -> Result<(BoxReader, BoxWriter), TransportError> {
        let host = url
            .host_str()
            .ok_or_else(|| TransportError::ConnectFailed("h2 url requires a host".into()))?;
        let port = url.port().unwrap_or(if self.tls { 443 } else { 80 });
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        if self.tls {
            #[cfg(feature = "tls")]
            {
                let connector = tokio_native_tls::native_tls::TlsConnector::new()
                    .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
                let connector = tokio_native_tls::TlsConnector::from(connector);
                let stream = connector
                    .connect(host, stream)
                    .await
                    .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
                return open_stream(TokioIo::new(stream), url, host, port, headers, true).await;
            }
            #[cfg(not(feature = "tls"))]
            return Err(TransportError::ConnectFailed(
                "h2 requires the tls feature".into(),
            ));
        }
        open_stream(TokioIo::new(stream), url, host, port, headers, false).await
    }
}

async fn open_stream<T>(
    io: T,
    url: &Url,
    host: &str,
    port: u16,
    headers: &HeaderMap,
    tls: bool,
) -> Result<(BoxReader, BoxWriter), TransportError>
where
    T: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let (mut send_request, connection) =
        hyper::client::conn::http2::handshake::<_, _, OutboundBody>(TokioExecutor::new(), io)
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            debug!(error = %e, "h2 connection finished");
        }
    });

    let (body_tx, body_rx) = mpsc::channel::<Result<Frame<Bytes>, Infallible>>(16);
    let body = StreamBody::new(ReceiverStream::new(body_rx));

    let scheme = if tls { "https" } else { "http" };
    let uri = format!("{scheme}://{host}:{port}{}", url.path());
    let mut builder = Request::builder()
        .method(Method::from_bytes(PRI_METHOD).expect("PRI is a valid method"))
        .uri(uri);
    if let Some(request_headers) = builder.headers_mut() {
        for (name, value) in headers {
            request_headers.insert(name.clone(), value.clone());
        }
    }
    let request = builder
        .body(body)
        .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

    let response = send_request
        .send_request(request)
        .await
        .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
    if !response.status().is_success() {
        return Err(TransportError::ConnectFailed(format!(
            "h2 stream rejected with status {}",
            response.status()
        )));
    }
    Ok((
        Box::new(H2BodyReader::new(response.into_body())),
        Box::new(H2BodySender::new(body_tx)),
    ))
}

/// Newline-scans an HTTP/2 body into messages. Shared with the server
/// handler, which reads the request body the same way.
pub struct H2BodyReader {
    body: Incoming,
    buf: BytesMut,
}

impl H2BodyReader {
    pub fn new(body: Incoming) -> Self {
        Self {
            body,
            buf: BytesMut::new(),
        }
    }
}

#[async_trait]
impl MessageReader for H2BodyReader {
    async fn read_message(&mut self) -> Result<Option<Message>, TransportError> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let line = self.buf.split_to(pos + 1);
                let text = String::from_utf8_lossy(&line);
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                // A bad value destroys the newline framing; give up.
                return parse_str(text)
                    .map(Some)
                    .map_err(|e| TransportError::Io(e.to_string()));
            }
            match self.body.frame().await {
                None => {
                    let rest = String::from_utf8_lossy(&self.buf).trim().to_string();
                    self.buf.clear();
                    if rest.is_empty() {
                        return Ok(None);
                    }
                    return parse_str(&rest)
                        .map(Some)
                        .map_err(|e| TransportError::Io(e.to_string()));
                }
                Some(Ok(frame)) => {
                    if let Ok(data) = frame.into_data() {
                        self.buf.extend_from_slice(&data);
                    }
                }
                Some(Err(e)) => return Err(TransportError::Io(e.to_string())),
            }
        }
    }
}

/// Writes newline-terminated messages into a channel-backed HTTP/2 body.
pub struct H2BodySender {
    tx: Option<mpsc::Sender<Result<Frame<Bytes>, Infallible>>>,
}

impl H2BodySender {
    pub fn new(tx: mpsc::Sender<Result<Frame<Bytes>, Infallible>>) -> Self {
        Self { tx: Some(tx) }
    }
}

#[async_trait]
impl MessageWriter for H2BodySender {
    async fn write_message(&mut self, msg: &Message) -> Result<(), TransportError> {
        let Some(tx) = &self.tx else {
            return Err(TransportError::Closed);
        };
        let mut line = msg.encode();
        line.push('\n');
        tx.send(Ok(Frame::data(Bytes::from(line))))
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) {
        // Dropping the sender half-closes the request body.
        self.tx.take();
    }
}
