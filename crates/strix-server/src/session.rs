//! Server-side identity for a connected streaming client.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use strix_jsonrpc::Message;

use crate::error::{ServerError, ServerResult};

/// Bound of the per-connection outbound queue; pushes block when full.
pub const SESSION_QUEUE_SIZE: usize = 100;

struct SessionInner {
    id: String,
    sender: mpsc::Sender<Message>,
    cancel: CancellationToken,
}

/// A handle to one connected client on a streaming transport.
///
/// Cloning is cheap; handlers may stash a clone and push messages to the
/// client later, independent of any request. Pushes are interleaved FIFO
/// with replies because both funnel through the same send channel.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Create a session plus the receiving end of its send channel. The
    /// caller owns the receiver and drains it onto the wire.
    pub fn new() -> (Self, mpsc::Receiver<Message>) {
        let (sender, receiver) = mpsc::channel(SESSION_QUEUE_SIZE);
        let session = Self {
            inner: Arc::new(SessionInner {
                id: Uuid::new_v4().to_string(),
                sender,
                cancel: CancellationToken::new(),
            }),
        };
        (session, receiver)
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Queue a message for this client.
    pub async fn push(&self, msg: Message) -> ServerResult<()> {
        self.inner
            .sender
            .send(msg)
            .await
            .map_err(|_| ServerError::handler("session closed"))
    }

    pub(crate) fn sender(&self) -> mpsc::Sender<Message> {
        self.inner.sender.clone()
    }

    /// Tear the connection down.
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("id", &self.inner.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_push_reaches_receiver_in_order() {
        let (session, mut rx) = Session::new();
        session
            .push(Message::notify("notify4", strix_jsonrpc::Params::empty()).unwrap())
            .await
            .unwrap();
        session
            .push(Message::result(1, json!("r")))
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().method(), Some("notify4"));
        assert!(rx.recv().await.unwrap().is_result());
    }

    #[tokio::test]
    async fn test_push_fails_after_receiver_drops() {
        let (session, rx) = Session::new();
        drop(rx);
        assert!(session
            .push(Message::notify("x", strix_jsonrpc::Params::empty()).unwrap())
            .await
            .is_err());
    }

    #[test]
    fn test_ids_are_unique() {
        let (a, _ra) = Session::new();
        let (b, _rb) = Session::new();
        assert_ne!(a.id(), b.id());
    }
}
