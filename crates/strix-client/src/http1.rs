//! HTTP/1.1 request-response client. Not multiplexed: every call is one
//! POST with a JSON body and one JSON body back.

use std::time::Duration;

use http::header::{ACCEPT, CONTENT_TYPE};
use http::HeaderMap;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use strix_jsonrpc::{parse_bytes, Message, RequestMessage, RpcError, TRACEID_HEADER};

use crate::error::{ClientError, ClientResult, TransportError};

const JSON_CONTENT_TYPE: &str = "application/json";

pub struct Http1Client {
    http: reqwest::Client,
    url: Url,
    headers: HeaderMap,
}

impl Http1Client {
    pub fn new(url: Url) -> ClientResult<Self> {
        Self::with_timeout(url, None)
    }

    /// `timeout` is the transport-level request timeout; when it fires the
    /// caller sees an upstream 408, not the RPC-level code-200 timeout.
    pub fn with_timeout(url: Url, timeout: Option<Duration>) -> ClientResult<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| ClientError::Transport(TransportError::ConnectFailed(e.to_string())))?;
        Ok(Self {
            http,
            url,
            headers: HeaderMap::new(),
        })
    }

    /// Headers attached to every request (auth, routing).
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// POST one request message, await the correlated response message.
    pub async fn call(&self, req: RequestMessage) -> ClientResult<Message> {
        let trace_id = req.trace_id.clone();
        let response = self.post(Message::Request(req)).await?;

        let wire_trace = response
            .headers()
            .get(TRACEID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let status = response.status();
        if !status.is_success() {
            return Err(wrap_response(status.as_u16(), response).await);
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ClientError::Transport(TransportError::Io(e.to_string())))?;
        let mut msg = parse_bytes(&bytes).map_err(ClientError::Protocol)?;
        if msg.trace_id().is_empty() {
            if let Some(trace) = wire_trace.or(Some(trace_id)).filter(|t| !t.is_empty()) {
                msg.set_trace_id(trace);
            }
        }
        Ok(msg)
    }

    /// `call`, then decode the result payload.
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

    /// Fire-and-forget; the response body, if any, is discarded.
    pub async fn send(&self, msg: Message) -> ClientResult<()> {
        let response = self.post(msg).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(wrap_response(status.as_u16(), response).await);
        }
        Ok(())
    }

    async fn post(&self, msg: Message) -> ClientResult<reqwest::Response> {
        let mut headers = self.headers.clone();
        if !msg.trace_id().is_empty() {
            if let Ok(value) = msg.trace_id().parse() {
                headers.insert(TRACEID_HEADER, value);
            }
        }
        debug!(url = %self.url, kind = msg.kind(), "posting message");
        self.http
            .post(self.url.clone())
            .headers(headers)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .header(ACCEPT, JSON_CONTENT_TYPE)
            .body(msg.encode())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ClientError::Upstream {
                        status: 408,
                        headers: Vec::new(),
                        body: String::new(),
                    }
                } else if e.is_connect() {
                    ClientError::Transport(TransportError::ConnectFailed(e.to_string()))
                } else {
                    ClientError::Transport(TransportError::Io(e.to_string()))
                }
            })
    }
}

/// Capture a non-2xx response whole, so a proxying server can forward it.
async fn wrap_response(status: u16, response: reqwest::Response) -> ClientError {
    let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.to_string(), v.to_string()))
        })
        .collect();
    let body = response.text().await.unwrap_or_default();
    ClientError::Upstream {
        status,
        headers,
        body,
    }
}
