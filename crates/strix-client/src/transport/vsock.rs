//! vsock transport: the TCP line framing over an AF_VSOCK socket.
//! URL shape is `vsock://<context-id>:<port>`.

use async_trait::async_trait;
use http::HeaderMap;
use tokio_vsock::{VsockAddr, VsockStream};
use url::Url;

use crate::error::TransportError;
use crate::transport::tcp::{LineReader, LineWriter};
use crate::transport::{BoxReader, BoxWriter, Connector};

#[derive(Debug, Default)]
pub struct VsockConnector;

impl VsockConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for VsockConnector {
    async fn connect(
        &self,
        url: &Url,
        _headers: &HeaderMap,
    ) -> Result<(BoxReader, BoxWriter), TransportError> {
        let cid: u32 = url
            .host_str()
            .and_then(|h| h.parse().ok())
            .ok_or_else(|| {
                TransportError::ConnectFailed("vsock url requires a numeric context id".into())
            })?;
        let port = url
            .port()
            .ok_or_else(|| TransportError::ConnectFailed("vsock url requires a port".into()))?;
        let stream = VsockStream::connect(VsockAddr::new(cid, port as u32))
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        let (read_half, write_half) = tokio::io::split(stream);
        Ok((
            Box::new(LineReader::new(read_half)),
            Box::new(LineWriter::new(write_half)),
        ))
    }
}
