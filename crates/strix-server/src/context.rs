//! Per-message request context handed to every handler.

use std::collections::HashMap;
use std::sync::Arc;

use http::HeaderMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::session::Session;

/// Which wire the message arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Http1,
    WebSocket,
    Http2,
    Tcp,
    Vsock,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransportKind::Http1 => "http1",
            TransportKind::WebSocket => "websocket",
            TransportKind::Http2 => "http2",
            TransportKind::Tcp => "tcp",
            TransportKind::Vsock => "vsock",
        };
        f.write_str(name)
    }
}

/// Context for one inbound message: the transport tag, the inbound headers,
/// the session handle on streaming transports, a free-form data map, and
/// the cancellation context tied to the connection.
#[derive(Clone)]
pub struct RpcContext {
    transport: TransportKind,
    headers: HeaderMap,
    session: Option<Session>,
    data: Arc<Mutex<HashMap<String, Value>>>,
    cancel: CancellationToken,
}

impl RpcContext {
    pub fn new(transport: TransportKind) -> Self {
        Self {
            transport,
            headers: HeaderMap::new(),
            session: None,
            data: Arc::new(Mutex::new(HashMap::new())),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The per-client session, present on streaming transports only.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Cancelled when the connection (or the server) goes away; long-running
    /// handlers should give up once this fires.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn set_data(&self, key: impl Into<String>, value: Value) {
        self.data.lock().insert(key.into(), value);
    }

    pub fn get_data(&self, key: &str) -> Option<Value> {
        self.data.lock().get(key).cloned()
    }
}
