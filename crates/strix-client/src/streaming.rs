//! Transport-agnostic full-duplex client.
//!
//! One connection multiplexes any number of outstanding requests by id.
//! Outbound messages funnel through a single bounded channel drained by one
//! send loop, so wire order equals enqueue order; inbound results and errors
//! are matched against the pending table and delivered to their waiting
//! callers, in whatever order they arrive.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use http::HeaderMap;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use strix_jsonrpc::{Message, MsgId, RequestMessage, RpcError};

use crate::error::{ClientError, ClientResult, TransportError};
use crate::transport::{BoxReader, BoxWriter, Connector};

/// Bound of the outbound send queue. Enqueueing blocks when full.
pub const SEND_QUEUE_SIZE: usize = 100;

/// Default per-call expiry.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

type MessageCallback = Box<dyn Fn(Message) + Send + Sync>;
type ConnectedCallback = Box<dyn Fn() + Send + Sync>;
type CloseCallback = Box<dyn Fn(Option<TransportError>) + Send + Sync>;

struct Pending {
    /// The request as the caller issued it; its id is the caller-visible id.
    request: RequestMessage,
    tx: oneshot::Sender<ClientResult<Message>>,
}

struct Shared {
    pending: Mutex<HashMap<MsgId, Pending>>,
    send_tx: Mutex<Option<mpsc::Sender<Message>>>,
    cancel: Mutex<Option<CancellationToken>>,
    close_reason: Mutex<Option<TransportError>>,
    connected: AtomicBool,
    closed: AtomicBool,
    done: Notify,
    on_message: OnceCell<MessageCallback>,
    on_connected: OnceCell<ConnectedCallback>,
    on_close: OnceCell<CloseCallback>,
}

impl Shared {
    fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            send_tx: Mutex::new(None),
            cancel: Mutex::new(None),
            close_reason: Mutex::new(None),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            done: Notify::new(),
            on_message: OnceCell::new(),
            on_connected: OnceCell::new(),
            on_close: OnceCell::new(),
        }
    }

    fn emit_message(&self, msg: Message) {
        match self.on_message.get() {
            Some(cb) => cb(msg),
            None => debug!(kind = msg.kind(), "unhandled inbound message dropped"),
        }
    }

    /// Route an inbound message: calls go to the message callback, replies
    /// to the pending table. A reply whose wire id was remapped is rewritten
    /// back to the caller-visible id before delivery.
    fn dispatch(&self, msg: Message) {
        if msg.is_call() {
            self.emit_message(msg);
            return;
        }
        let Some(id) = msg.id().cloned() else {
            self.emit_message(msg);
            return;
        };
        let entry = self.pending.lock().remove(&id);
        match entry {
            Some(pending) => {
                let mut msg = msg;
                if pending.request.id != id {
                    msg.set_id(pending.request.id.clone());
                }
                let _ = pending.tx.send(Ok(msg));
            }
            None => self.emit_message(msg),
        }
    }

    /// Tear the connection down exactly once: cancel the connection context,
    /// fail every waiter, record the reason and fire the close callback.
    fn handle_error(&self, err: Option<TransportError>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.connected.store(false, Ordering::SeqCst);
        if let Some(cancel) = self.cancel.lock().take() {
            cancel.cancel();
        }
        *self.send_tx.lock() = None;
        *self.close_reason.lock() = err.clone();

        let drained: Vec<Pending> = self
            .pending
            .lock()
            .drain()
            .map(|(_, pending)| pending)
            .collect();
        for pending in drained {
            let _ = pending
                .tx
                .send(Err(ClientError::Transport(TransportError::Closed)));
        }

        if let Some(cb) = self.on_close.get() {
            cb(err);
        }
        self.done.notify_waiters();
    }
}

/// A full-duplex streaming client over exactly one transport adapter.
pub struct StreamingClient {
    connector: Arc<dyn Connector>,
    url: Url,
    headers: HeaderMap,
    call_timeout: Duration,
    shared: Arc<Shared>,
    connect_lock: tokio::sync::Mutex<()>,
}

impl StreamingClient {
    pub fn new(connector: Arc<dyn Connector>, url: Url) -> Self {
        Self {
            connector,
            url,
            headers: HeaderMap::new(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            shared: Arc::new(Shared::new()),
            connect_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Headers presented at connect time (WebSocket upgrade, HTTP/2 open).
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Override the per-call expiry (default 10 seconds).
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Inbound requests, notifies and uncorrelated replies land here.
    pub fn on_message(&self, cb: impl Fn(Message) + Send + Sync + 'static) -> ClientResult<()> {
        self.shared
            .on_message
            .set(Box::new(cb))
            .map_err(|_| ClientError::CallbackAlreadySet("on_message"))
    }

    pub fn on_connected(&self, cb: impl Fn() + Send + Sync + 'static) -> ClientResult<()> {
        self.shared
            .on_connected
            .set(Box::new(cb))
            .map_err(|_| ClientError::CallbackAlreadySet("on_connected"))
    }

    pub fn on_close(
        &self,
        cb: impl Fn(Option<TransportError>) + Send + Sync + 'static,
    ) -> ClientResult<()> {
        self.shared
            .on_close
            .set(Box::new(cb))
            .map_err(|_| ClientError::CallbackAlreadySet("on_close"))
    }

    /// Open the connection if it is not open yet. Single-flight: concurrent
    /// callers share one dial attempt.
    pub async fn connect(&self) -> ClientResult<()> {
        if self.connected() {
            return Ok(());
        }
        let _guard = self.connect_lock.lock().await;
        if self.connected() {
            return Ok(());
        }
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Transport(TransportError::Closed));
        }

        let (reader, writer) = self.connector.connect(&self.url, &self.headers).await?;
        let (send_tx, send_rx) = mpsc::channel(SEND_QUEUE_SIZE);
        let cancel = CancellationToken::new();

        *self.shared.send_tx.lock() = Some(send_tx);
        *self.shared.cancel.lock() = Some(cancel.clone());
        self.shared.connected.store(true, Ordering::SeqCst);

        tokio::spawn(send_loop(self.shared.clone(), writer, send_rx, cancel.clone()));
        tokio::spawn(recv_loop(self.shared.clone(), reader, cancel));

        debug!(url = %self.url, "streaming client connected");
        if let Some(cb) = self.shared.on_connected.get() {
            cb();
        }
        Ok(())
    }

    /// Send a correlated request and await its reply, the per-call expiry,
    /// or connection teardown, whichever comes first.
    pub async fn call(&self, req: RequestMessage) -> ClientResult<Message> {
        self.connect().await?;

        let caller_id = req.id.clone();
        // Repair id collisions: the wire carries a fresh UUID while the
        // caller keeps seeing the id it chose.
        let wire_id = {
            let pending = self.shared.pending.lock();
            if pending.contains_key(&caller_id) {
                MsgId::from(Uuid::new_v4().to_string())
            } else {
                caller_id.clone()
            }
        };
        let mut wire_req = req.clone();
        wire_req.id = wire_id.clone();

        let (tx, rx) = oneshot::channel();
        self.shared
            .pending
            .lock()
            .insert(wire_id.clone(), Pending { request: req, tx });

        if let Err(e) = self.enqueue(Message::Request(wire_req)).await {
            self.shared.pending.lock().remove(&wire_id);
            return Err(e);
        }

        // Per-call expiry, independent of the connection.
        let shared = self.shared.clone();
        let expiry_id = wire_id.clone();
        let timeout = self.call_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(pending) = shared.pending.lock().remove(&expiry_id) {
                let _ = pending.tx.send(Err(ClientError::Rpc(RpcError::Timeout.body())));
            }
        });

        match rx.await {
            Ok(outcome) => outcome,
            // The sender vanished without a verdict; the connection is gone.
            Err(_) => Err(ClientError::Transport(TransportError::Closed)),
        }
    }

    /// `call`, then decode the result payload into `T`; an error response
    /// comes back as [`ClientError::Rpc`].
    pub async fn unwrap_call<T: DeserializeOwned>(&self, req: RequestMessage) -> ClientResult<T> {
        match self.call(req).await? {
            Message::Result(res) => Ok(serde_json::from_value(res.result)?),
            Message::Error(err) => Err(ClientError::Rpc(err.error)),
            other => Err(ClientError::Protocol(RpcError::WrongMessageType(format!(
                "expected a response, got {}",
                other.kind()
            )))),
        }
    }

    /// Fire-and-forget: notifications, or replies the caller correlated
    /// itself.
    pub async fn send(&self, msg: Message) -> ClientResult<()> {
        self.connect().await?;
        self.enqueue(msg).await
    }

    async fn enqueue(&self, msg: Message) -> ClientResult<()> {
        let sender = self.shared.send_tx.lock().clone();
        let Some(sender) = sender else {
            return Err(ClientError::Transport(TransportError::Closed));
        };
        sender
            .send(msg)
            .await
            .map_err(|_| ClientError::Transport(TransportError::Closed))
    }

    /// Tear the connection down. Every outstanding call fails with
    /// `TransportClosed`.
    pub fn close(&self) {
        self.shared.handle_error(None);
    }

    /// Block until the connection is gone, returning the close reason if the
    /// teardown was caused by an error.
    pub async fn wait(&self) -> Result<(), TransportError> {
        let notified = self.shared.done.notified();
        tokio::pin!(notified);
        // Register interest before checking the flag, or a teardown landing
        // in between would be missed.
        notified.as_mut().enable();
        if !self.shared.closed.load(Ordering::SeqCst) {
            notified.await;
        }
        match self.shared.close_reason.lock().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Ids currently awaiting a reply. Diagnostics only.
    pub fn pending_ids(&self) -> Vec<MsgId> {
        self.shared.pending.lock().keys().cloned().collect()
    }
}

async fn send_loop(
    shared: Arc<Shared>,
    mut writer: BoxWriter,
    mut rx: mpsc::Receiver<Message>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                None => break,
                Some(msg) => {
                    if let Err(e) = writer.write_message(&msg).await {
                        warn!(error = %e, "write failed, closing connection");
                        shared.handle_error(Some(e));
                        break;
                    }
                }
            },
        }
    }
    writer.close().await;
}

async fn recv_loop(shared: Arc<Shared>, mut reader: BoxReader, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = reader.read_message() => match next {
                Ok(Some(msg)) => shared.dispatch(msg),
                Ok(None) => {
                    shared.handle_error(None);
                    break;
                }
                Err(e) => {
                    shared.handle_error(Some(e));
                    break;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use strix_jsonrpc::ResultMessage;

    use crate::transport::{BoxReader, BoxWriter, MessageReader, MessageWriter};

    /// Loopback transport: writes land on `outbound`, reads come from
    /// `inbound`.
    struct MockConnector {
        outbound: mpsc::UnboundedSender<Message>,
        inbound: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
    }

    struct MockReader {
        rx: mpsc::UnboundedReceiver<Message>,
    }

    struct MockWriter {
        tx: mpsc::UnboundedSender<Message>,
    }

    #[async_trait]
    impl MessageReader for MockReader {
        async fn read_message(&mut self) -> Result<Option<Message>, TransportError> {
            Ok(self.rx.recv().await)
        }
    }

    #[async_trait]
    impl MessageWriter for MockWriter {
        async fn write_message(&mut self, msg: &Message) -> Result<(), TransportError> {
            self.tx
                .send(msg.clone())
                .map_err(|_| TransportError::Closed)
        }

        async fn close(&mut self) {}
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn connect(
            &self,
            _url: &Url,
            _headers: &HeaderMap,
        ) -> Result<(BoxReader, BoxWriter), TransportError> {
            let rx = self
                .inbound
                .lock()
                .take()
                .ok_or_else(|| TransportError::ConnectFailed("already connected".into()))?;
            Ok((
                Box::new(MockReader { rx }),
                Box::new(MockWriter {
                    tx: self.outbound.clone(),
                }),
            ))
        }
    }

    struct Harness {
        client: StreamingClient,
        wire_rx: mpsc::UnboundedReceiver<Message>,
        peer_tx: mpsc::UnboundedSender<Message>,
    }

    fn harness() -> Harness {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(MockConnector {
            outbound: out_tx,
            inbound: Mutex::new(Some(in_rx)),
        });
        let client = StreamingClient::new(connector, Url::parse("tcp://127.0.0.1:1").unwrap());
        Harness {
            client,
            wire_rx: out_rx,
            peer_tx: in_tx,
        }
    }

    fn request(id: i64, method: &str) -> RequestMessage {
        RequestMessage::new(id, method, strix_jsonrpc::Params::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_call_correlates_by_id() {
        let mut h = harness();
        let client = h.client;

        let call = tokio::spawn(async move { client.call(request(1, "echo")).await });

        let sent = h.wire_rx.recv().await.unwrap();
        assert_eq!(sent.id(), Some(&MsgId::from(1)));
        h.peer_tx
            .send(Message::Result(ResultMessage::new(1, json!("pong"))))
            .unwrap();

        let res = call.await.unwrap().unwrap();
        assert_eq!(res.result_value(), Some(&json!("pong")));
    }

    #[tokio::test]
    async fn test_pending_table_tracks_outstanding_calls() {
        let mut h = harness();
        let client = Arc::new(h.client);

        let c = client.clone();
        let call = tokio::spawn(async move { c.call(request(7, "slow")).await });
        let _ = h.wire_rx.recv().await.unwrap();
        assert_eq!(client.pending_ids(), vec![MsgId::from(7)]);

        h.peer_tx
            .send(Message::Result(ResultMessage::new(7, json!(null))))
            .unwrap();
        call.await.unwrap().unwrap();
        assert!(client.pending_ids().is_empty());
    }

    #[tokio::test]
    async fn test_id_collision_uses_fresh_wire_id() {
        let mut h = harness();
        let client = Arc::new(h.client);

        let c1 = client.clone();
        let first = tokio::spawn(async move { c1.call(request(5, "a")).await });
        let on_wire_1 = h.wire_rx.recv().await.unwrap();
        assert_eq!(on_wire_1.id(), Some(&MsgId::from(5)));

        let c2 = client.clone();
        let second = tokio::spawn(async move { c2.call(request(5, "b")).await });
        let on_wire_2 = h.wire_rx.recv().await.unwrap();
        let wire_id_2 = on_wire_2.id().cloned().unwrap();
        assert_ne!(wire_id_2, MsgId::from(5));

        // Answer the remapped request first; the caller still sees id 5.
        h.peer_tx
            .send(Message::Result(ResultMessage::new(
                wire_id_2,
                json!("second"),
            )))
            .unwrap();
        let res2 = second.await.unwrap().unwrap();
        assert_eq!(res2.id(), Some(&MsgId::from(5)));
        assert_eq!(res2.result_value(), Some(&json!("second")));

        h.peer_tx
            .send(Message::Result(ResultMessage::new(5, json!("first"))))
            .unwrap();
        let res1 = first.await.unwrap().unwrap();
        assert_eq!(res1.result_value(), Some(&json!("first")));
    }

    #[tokio::test]
    async fn test_send_order_is_fifo() {
        let mut h = harness();
        let client = h.client;
        client.connect().await.unwrap();

        for i in 0..20i64 {
            client
                .send(Message::notify("tick", vec![json!(i)]).unwrap())
                .await
                .unwrap();
        }
        for i in 0..20i64 {
            let msg = h.wire_rx.recv().await.unwrap();
            assert_eq!(msg.params().unwrap().get(0), Some(&json!(i)));
        }
    }

    #[tokio::test]
    async fn test_call_times_out() {
        let mut h = harness();
        let client = h
            .client
            .with_call_timeout(Duration::from_millis(50));

        let res = client.call(request(9, "never")).await;
        let _ = h.wire_rx.recv().await.unwrap();
        match res {
            Err(ClientError::Rpc(body)) => assert_eq!(body.code, 200),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(client.pending_ids().is_empty());
    }

    #[tokio::test]
    async fn test_close_fails_every_waiter() {
        let mut h = harness();
        let client = Arc::new(h.client);

        let c = client.clone();
        let call = tokio::spawn(async move { c.call(request(3, "stuck")).await });
        let _ = h.wire_rx.recv().await.unwrap();

        client.close();
        match call.await.unwrap() {
            Err(ClientError::Transport(TransportError::Closed)) => {}
            other => panic!("expected closed, got {other:?}"),
        }
        assert!(client.wait().await.is_ok());
        // the client stays closed; later calls fail fast
        assert!(client.call(request(4, "late")).await.is_err());
    }

    #[tokio::test]
    async fn test_peer_eof_surfaces_on_wait_and_callback() {
        let h = harness();
        let client = h.client;
        let closes = Arc::new(AtomicBool::new(false));
        let seen = closes.clone();
        client
            .on_close(move |_| {
                seen.store(true, Ordering::SeqCst);
            })
            .unwrap();
        client.connect().await.unwrap();

        drop(h.peer_tx);
        client.wait().await.unwrap();
        assert!(closes.load(Ordering::SeqCst));
        assert!(!client.connected());
    }

    #[tokio::test]
    async fn test_inbound_calls_reach_on_message() {
        let h = harness();
        let client = h.client;
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        client
            .on_message(move |msg| {
                let _ = seen_tx.send(msg);
            })
            .unwrap();
        client.connect().await.unwrap();

        h.peer_tx
            .send(Message::notify("notify4", strix_jsonrpc::Params::empty()).unwrap())
            .unwrap();
        h.peer_tx
            .send(Message::notify("notify5", strix_jsonrpc::Params::empty()).unwrap())
            .unwrap();

        assert_eq!(seen_rx.recv().await.unwrap().method(), Some("notify4"));
        assert_eq!(seen_rx.recv().await.unwrap().method(), Some("notify5"));
    }

    #[tokio::test]
    async fn test_callbacks_set_at_most_once() {
        let h = harness();
        let client = h.client;
        client.on_message(|_| {}).unwrap();
        assert!(matches!(
            client.on_message(|_| {}),
            Err(ClientError::CallbackAlreadySet("on_message"))
        ));
    }
}
