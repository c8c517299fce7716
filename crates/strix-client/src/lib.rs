//! # Multi-transport JSON-RPC client
//!
//! A request-response HTTP/1 client plus a full-duplex streaming client
//! that multiplexes any number of outstanding calls over one connection.
//! Streaming transports: WebSocket text frames, HTTP/2 bidirectional
//! streams (`h2`/`h2c`), raw TCP and vsock line-framed JSON.
//!
//! ```no_run
//! use serde_json::json;
//! use strix_client::connect_url;
//! use strix_jsonrpc::RequestMessage;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = connect_url("ws://127.0.0.1:9990")?;
//! let sum: i64 = client
//!     .unwrap_call(RequestMessage::new(1, "add", vec![json!(6), json!(3)])?)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod handle;
pub mod http1;
pub mod streaming;
pub mod transport;

pub use error::{ClientError, ClientResult, TransportError};
pub use handle::{connect_url, default_server_url, ClientHandle};
pub use http1::Http1Client;
pub use streaming::{StreamingClient, DEFAULT_CALL_TIMEOUT, SEND_QUEUE_SIZE};
pub use transport::{BoxReader, BoxWriter, Connector, MessageReader, MessageWriter};
