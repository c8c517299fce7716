//! Raw TCP transport: newline-separated JSON values over a stream socket.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use http::HeaderMap;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use url::Url;

use strix_jsonrpc::{parse_str, Message};

use crate::error::TransportError;
use crate::transport::{BoxReader, BoxWriter, Connector, MessageReader, MessageWriter};

/// Dials `tcp://host:port`.
#[derive(Debug, Default)]
pub struct TcpConnector;

impl TcpConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(
        &self,
        url: &Url,
        _headers: &HeaderMap,
    ) -> Result<(BoxReader, BoxWriter), TransportError> {
        let host = url
            .host_str()
            .ok_or_else(|| TransportError::ConnectFailed("tcp url requires a host".into()))?;
        let port = url
            .port()
            .ok_or_else(|| TransportError::ConnectFailed("tcp url requires a port".into()))?;
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        let (read_half, write_half) = stream.into_split();
        Ok((
            Box::new(LineReader::new(read_half)),
            Box::new(LineWriter::new(write_half)),
        ))
    }
}

/// Line-framed reader for stream sockets; the server side reuses it.
pub struct LineReader<R> {
    framed: FramedRead<R, LinesCodec>,
}

impl<R: AsyncRead + Unpin + Send> LineReader<R> {
    pub fn new(read_half: R) -> Self {
        Self {
            framed: FramedRead::new(read_half, LinesCodec::new()),
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> MessageReader for LineReader<R> {
    async fn read_message(&mut self) -> Result<Option<Message>, TransportError> {
        loop {
            match self.framed.next().await {
                None => return Ok(None),
                Some(Ok(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    // Stream framing is gone after a bad value; tear down.
                    return parse_str(&line)
                        .map(Some)
                        .map_err(|e| TransportError::Io(e.to_string()));
                }
                Some(Err(e)) => return Err(TransportError::Io(e.to_string())),
            }
        }
    }
}

pub struct LineWriter<W> {
    framed: FramedWrite<W, LinesCodec>,
}

impl<W: AsyncWrite + Unpin + Send> LineWriter<W> {
    pub fn new(write_half: W) -> Self {
        Self {
            framed: FramedWrite::new(write_half, LinesCodec::new()),
        }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> MessageWriter for LineWriter<W> {
    async fn write_message(&mut self, msg: &Message) -> Result<(), TransportError> {
        self.framed
            .send(msg.encode())
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = SinkExt::<String>::close(&mut self.framed).await;
    }
}
