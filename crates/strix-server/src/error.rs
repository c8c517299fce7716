//! Server-side error type.
//!
//! Handler failures fall into three buckets with different propagation:
//! typed [`RpcError`]s become error messages preserving their code, an
//! [`Upstream`](ServerError::Upstream) response is surfaced unchanged so a
//! proxy forwards exactly what it received, and anything else becomes a
//! generic internal error.

use thiserror::Error;

use strix_client::ClientError;
use strix_jsonrpc::RpcError;
use strix_schema::SchemaBuildError;

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// A captured non-2xx HTTP response from an upstream call.
    #[error("upstream response {status}")]
    Upstream {
        status: u16,
        headers: Vec<(String, String)>,
        body: String,
    },

    /// Untyped handler failure; lowered to `internal error` on the wire.
    #[error("handler error: {0}")]
    Handler(String),

    #[error("method already registered: {0}")]
    DuplicateMethod(String),

    #[error("{0} callback may be set only once")]
    CallbackAlreadySet(&'static str),

    #[error(transparent)]
    Schema(#[from] SchemaBuildError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] hyper::Error),
}

impl ServerError {
    pub fn handler(message: impl Into<String>) -> Self {
        ServerError::Handler(message.into())
    }
}

/// Lets a proxying handler forward upstream client failures with `?`.
impl From<ClientError> for ServerError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Upstream {
                status,
                headers,
                body,
            } => ServerError::Upstream {
                status,
                headers,
                body,
            },
            ClientError::Rpc(body) => ServerError::Rpc(RpcError::from_body(&body)),
            ClientError::Protocol(e) => ServerError::Rpc(e),
            other => ServerError::Handler(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strix_jsonrpc::ErrorBody;

    #[test]
    fn test_upstream_passes_through() {
        let client_err = ClientError::Upstream {
            status: 502,
            headers: vec![("content-type".into(), "text/plain".into())],
            body: "bad gateway".into(),
        };
        match ServerError::from(client_err) {
            ServerError::Upstream { status, body, .. } => {
                assert_eq!(status, 502);
                assert_eq!(body, "bad gateway");
            }
            other => panic!("expected upstream, got {other}"),
        }
    }

    #[test]
    fn test_rpc_error_code_is_preserved() {
        let err = ServerError::from(ClientError::Rpc(ErrorBody::new(200, "request timeout")));
        match err {
            ServerError::Rpc(rpc) => assert_eq!(rpc.code(), 200),
            other => panic!("expected rpc, got {other}"),
        }
    }
}
