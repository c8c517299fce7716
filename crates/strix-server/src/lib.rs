//! # JSON-RPC server runtime
//!
//! The dispatch engine ([`Actor`]) plus everything needed to put it on a
//! wire: typed handler registration, schema gating, per-client sessions on
//! streaming transports, handlers for HTTP/1.1, WebSocket, HTTP/2 and raw
//! TCP, and a protocol-sniffing [`Gateway`] multiplexing the HTTP family on
//! one port.
//!
//! ```no_run
//! use strix_server::{Actor, Gateway};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let actor = Actor::new();
//! actor.register_typed("add", |_ctx, (a, b): (i64, i64)| async move { Ok(a + b) })?;
//! Gateway::new(actor).serve_addr("127.0.0.1:9990".parse()?).await?;
//! # Ok(())
//! # }
//! ```

pub mod actor;
mod connection;
pub mod context;
pub mod error;
pub mod gateway;
pub mod http1;
pub mod http2;
pub mod session;
pub mod tcp;
pub mod typed;
pub mod websocket;

pub use actor::{Actor, HandlerOutcome, RpcHandler};
pub use context::{RpcContext, TransportKind};
pub use error::{ServerError, ServerResult};
pub use gateway::Gateway;
pub use http1::Http1Handler;
pub use http2::H2Handler;
pub use session::{Session, SESSION_QUEUE_SIZE};
pub use tcp::TcpServer;
pub use typed::FromParams;
pub use websocket::WsHandler;

// Re-export the building blocks handlers usually need.
pub use strix_jsonrpc::{Message, MsgId, Params, RpcError};
pub use strix_schema::{Schema, SchemaBuilder};

/// Discovery method intercepted by every transport handler.
pub const DISCOVER_METHOD: &str = "rpc.discover";
