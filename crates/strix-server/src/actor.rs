//! The dispatch engine: a method registry plus the `feed` operation.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use strix_jsonrpc::{
    is_public_method, is_valid_method, Message, NotifyMessage, RequestMessage, ResultMessage,
    RpcError,
};
use strix_schema::{validate_params, Schema, SchemaBuilder};

use crate::context::RpcContext;
use crate::error::{ServerError, ServerResult};
use crate::session::Session;
use crate::typed::FromParams;

/// What a handler hands back: a plain value to wrap into a result message,
/// or a complete message used verbatim.
pub enum HandlerOutcome {
    Value(Value),
    Message(Message),
}

impl From<Value> for HandlerOutcome {
    fn from(v: Value) -> Self {
        HandlerOutcome::Value(v)
    }
}

impl From<Message> for HandlerOutcome {
    fn from(m: Message) -> Self {
        HandlerOutcome::Message(m)
    }
}

/// The generic handler contract. Most callers go through [`Actor::register`]
/// or [`Actor::register_typed`] rather than implementing this directly.
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(&self, ctx: RpcContext, params: Vec<Value>) -> ServerResult<HandlerOutcome>;
}

type HandlerFn =
    Box<dyn Fn(RpcContext, Vec<Value>) -> BoxFuture<'static, ServerResult<HandlerOutcome>> + Send + Sync>;

struct FnHandler {
    f: HandlerFn,
}

#[async_trait]
impl RpcHandler for FnHandler {
    async fn handle(&self, ctx: RpcContext, params: Vec<Value>) -> ServerResult<HandlerOutcome> {
        (self.f)(ctx, params).await
    }
}

type MissingFn = Box<
    dyn Fn(RpcContext, Message) -> BoxFuture<'static, ServerResult<Option<Message>>> + Send + Sync,
>;

type CloseFn = Box<dyn Fn(Session) + Send + Sync>;

#[derive(Clone)]
struct HandlerEntry {
    handler: Arc<dyn RpcHandler>,
    schema: Option<Arc<Schema>>,
}

struct ActorInner {
    handlers: RwLock<HashMap<String, HandlerEntry>>,
    children: RwLock<Vec<Actor>>,
    on_missing: OnceCell<MissingFn>,
    on_close: OnceCell<CloseFn>,
    validate_schema: AtomicBool,
    recover_from_panic: AtomicBool,
}

/// Method registry plus dispatch loop. Cloning shares the registry.
///
/// Registration is expected to finish before the first `feed`; dispatch
/// takes read locks only.
#[derive(Clone)]
pub struct Actor {
    inner: Arc<ActorInner>,
}

impl Default for Actor {
    fn default() -> Self {
        Self::new()
    }
}

impl Actor {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ActorInner {
                handlers: RwLock::new(HashMap::new()),
                children: RwLock::new(Vec::new()),
                on_missing: OnceCell::new(),
                on_close: OnceCell::new(),
                validate_schema: AtomicBool::new(true),
                recover_from_panic: AtomicBool::new(false),
            }),
        }
    }

    /// Toggle schema gating of registered methods (on by default).
    pub fn set_validate_schema(&self, on: bool) {
        self.inner.validate_schema.store(on, Ordering::Relaxed);
    }

    /// Catch handler panics whose payload is an [`RpcError`] and convert
    /// them into error responses. Any other panic payload is re-raised.
    pub fn set_recover_from_panic(&self, on: bool) {
        self.inner.recover_from_panic.store(on, Ordering::Relaxed);
    }

    /// Attach a child actor; lookups walk children depth-first after the
    /// local registry misses.
    pub fn add_child(&self, child: Actor) {
        self.inner.children.write().push(child);
    }

    /// The base registration everything else funnels through. Fails on an
    /// invalid method name or a name already registered on this actor
    /// (children may still define it).
    pub fn register_handler(
        &self,
        method: &str,
        handler: Arc<dyn RpcHandler>,
        schema: Option<Schema>,
    ) -> ServerResult<()> {
        if !is_valid_method(method) {
            return Err(RpcError::InvalidRequest(format!("invalid method name {method:?}")).into());
        }
        let mut handlers = self.inner.handlers.write();
        if handlers.contains_key(method) {
            return Err(ServerError::DuplicateMethod(method.to_string()));
        }
        handlers.insert(
            method.to_string(),
            HandlerEntry {
                handler,
                schema: schema.map(Arc::new),
            },
        );
        Ok(())
    }

    pub fn register<F, Fut, R>(&self, method: &str, f: F) -> ServerResult<()>
    where
        F: Fn(RpcContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServerResult<R>> + Send + 'static,
        R: Into<HandlerOutcome> + 'static,
    {
        self.register_handler(method, fn_handler(f), None)
    }

    pub fn register_with_schema<F, Fut, R>(
        &self,
        method: &str,
        schema: Schema,
        f: F,
    ) -> ServerResult<()>
    where
        F: Fn(RpcContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServerResult<R>> + Send + 'static,
        R: Into<HandlerOutcome> + 'static,
    {
        self.register_handler(method, fn_handler(f), Some(schema))
    }

    /// Schema straight from a JSON descriptor.
    pub fn register_with_json_schema<F, Fut, R>(
        &self,
        method: &str,
        json: &[u8],
        f: F,
    ) -> ServerResult<()>
    where
        F: Fn(RpcContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServerResult<R>> + Send + 'static,
        R: Into<HandlerOutcome> + 'static,
    {
        let schema = SchemaBuilder::new().build_bytes(json)?;
        self.register_handler(method, fn_handler(f), Some(schema))
    }

    /// Schema straight from a YAML descriptor.
    pub fn register_with_yaml_schema<F, Fut, R>(
        &self,
        method: &str,
        yaml: &[u8],
        f: F,
    ) -> ServerResult<()>
    where
        F: Fn(RpcContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServerResult<R>> + Send + 'static,
        R: Into<HandlerOutcome> + 'static,
    {
        let schema = SchemaBuilder::new().build_yaml(yaml)?;
        self.register_handler(method, fn_handler(f), Some(schema))
    }

    /// Register a strongly-typed callback; positional params decode into the
    /// tuple `P`, the return value re-encodes into the result.
    pub fn register_typed<F, Fut, P, R>(&self, method: &str, f: F) -> ServerResult<()>
    where
        F: Fn(RpcContext, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServerResult<R>> + Send + 'static,
        P: FromParams + 'static,
        R: Serialize + 'static,
    {
        self.register_handler(method, typed_handler(f), None)
    }

    pub fn register_typed_with_schema<F, Fut, P, R>(
        &self,
        method: &str,
        schema: Schema,
        f: F,
    ) -> ServerResult<()>
    where
        F: Fn(RpcContext, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServerResult<R>> + Send + 'static,
        P: FromParams + 'static,
        R: Serialize + 'static,
    {
        self.register_handler(method, typed_handler(f), Some(schema))
    }

    pub fn unregister(&self, method: &str) -> bool {
        self.inner.handlers.write().remove(method).is_some()
    }

    /// Whether this actor or any descendant defines `method`.
    pub fn has(&self, method: &str) -> bool {
        self.find_entry(method).is_some()
    }

    /// All method names, set-union with children, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.handlers.read().keys().cloned().collect();
        for child in self.inner.children.read().iter() {
            names.extend(child.list());
        }
        names.sort();
        names.dedup();
        names
    }

    /// Fallback for unmatched methods and non-call messages. May be set at
    /// most once.
    pub fn on_missing<F, Fut>(&self, f: F) -> ServerResult<()>
    where
        F: Fn(RpcContext, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServerResult<Option<Message>>> + Send + 'static,
    {
        let wrapped: MissingFn = Box::new(move |ctx, msg| f(ctx, msg).boxed());
        self.inner
            .on_missing
            .set(wrapped)
            .map_err(|_| ServerError::CallbackAlreadySet("on_missing"))
    }

    /// Per-client cleanup hook, invoked with the session when a streaming
    /// connection closes. May be set at most once.
    pub fn on_close<F>(&self, f: F) -> ServerResult<()>
    where
        F: Fn(Session) + Send + Sync + 'static,
    {
        self.inner
            .on_close
            .set(Box::new(f))
            .map_err(|_| ServerError::CallbackAlreadySet("on_close"))
    }

    /// Fire the close hook for a finished session.
    pub fn run_close(&self, session: Session) {
        if let Some(cb) = self.inner.on_close.get() {
            cb(session);
        }
    }

    fn find_entry(&self, method: &str) -> Option<HandlerEntry> {
        if let Some(entry) = self.inner.handlers.read().get(method) {
            return Some(entry.clone());
        }
        for child in self.inner.children.read().iter() {
            if let Some(entry) = child.find_entry(method) {
                return Some(entry);
            }
        }
        None
    }

    /// Dispatch one message, producing the response message when there is
    /// one. Upstream proxy errors pass through as `Err` so the transport
    /// can forward the original response.
    pub async fn feed(&self, msg: Message, ctx: RpcContext) -> ServerResult<Option<Message>> {
        match msg {
            Message::Request(req) => self.feed_request(req, ctx).await,
            Message::Notify(notify) => self.feed_notify(notify, ctx).await,
            other => match self.inner.on_missing.get() {
                Some(missing) => missing(ctx, other).await,
                None => {
                    debug!(kind = other.kind(), "dropping non-call message");
                    Ok(None)
                }
            },
        }
    }

    async fn feed_request(
        &self,
        req: RequestMessage,
        ctx: RpcContext,
    ) -> ServerResult<Option<Message>> {
        let Some(entry) = self.find_entry(&req.method) else {
            return match self.inner.on_missing.get() {
                Some(missing) => missing(ctx, Message::Request(req)).await,
                None => Ok(Some(
                    RpcError::MethodNotFound
                        .to_message(req.id.clone(), req.trace_id.clone())
                        .into(),
                )),
            };
        };

        if let Some(schema) = &entry.schema {
            if self.inner.validate_schema.load(Ordering::Relaxed) {
                if let Err(pos) = validate_params(schema, req.params.values()) {
                    return Ok(Some(pos.to_message(&req).into()));
                }
            }
        }

        let params = req.params.values().to_vec();
        match self.invoke(&entry, ctx, params).await {
            Ok(HandlerOutcome::Message(m)) => Ok(Some(m)),
            Ok(HandlerOutcome::Value(v)) => Ok(Some(ResultMessage::for_request(&req, v).into())),
            Err(ServerError::Rpc(e)) => Ok(Some(
                e.to_message(req.id.clone(), req.trace_id.clone()).into(),
            )),
            // Surface the captured upstream response unchanged.
            Err(upstream @ ServerError::Upstream { .. }) => Err(upstream),
            Err(other) => {
                warn!(method = %req.method, error = %other, "handler failed");
                Ok(Some(
                    RpcError::InternalError(other.to_string())
                        .to_message(req.id.clone(), req.trace_id.clone())
                        .into(),
                ))
            }
        }
    }

    async fn feed_notify(
        &self,
        notify: NotifyMessage,
        ctx: RpcContext,
    ) -> ServerResult<Option<Message>> {
        let Some(entry) = self.find_entry(&notify.method) else {
            return match self.inner.on_missing.get() {
                Some(missing) => missing(ctx, Message::Notify(notify)).await,
                None => {
                    debug!(method = %notify.method, "dropping notify for unknown method");
                    Ok(None)
                }
            };
        };

        if let Some(schema) = &entry.schema {
            if self.inner.validate_schema.load(Ordering::Relaxed) {
                if let Err(pos) = validate_params(schema, notify.params.values()) {
                    return Err(pos.to_rpc_error().into());
                }
            }
        }

        let params = notify.params.values().to_vec();
        if let Err(e) = self.invoke(&entry, ctx, params).await {
            warn!(method = %notify.method, error = %e, "notify handler failed");
        }
        Ok(None)
    }

    async fn invoke(
        &self,
        entry: &HandlerEntry,
        ctx: RpcContext,
        params: Vec<Value>,
    ) -> ServerResult<HandlerOutcome> {
        let fut = entry.handler.handle(ctx, params);
        if self.inner.recover_from_panic.load(Ordering::Relaxed) {
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => match payload.downcast::<RpcError>() {
                    Ok(err) => Err(ServerError::Rpc(*err)),
                    Err(payload) => std::panic::resume_unwind(payload),
                },
            }
        } else {
            fut.await
        }
    }

    /// `rpc.discover` payload: every public method with its schema, or a
    /// minimal descriptor when none was registered.
    pub fn discover_payload(&self) -> Value {
        let mut methods = Vec::new();
        for name in self.list() {
            if !is_public_method(&name) {
                continue;
            }
            let Some(entry) = self.find_entry(&name) else {
                continue;
            };
            let mut desc = match &entry.schema {
                Some(schema) => schema.to_value(),
                None => json!({"params": [], "returns": {"type": "any"}}),
            };
            if let Value::Object(map) = &mut desc {
                map.insert("name".into(), json!(name));
            }
            methods.push(desc);
        }
        json!({ "methods": methods })
    }
}

fn fn_handler<F, Fut, R>(f: F) -> Arc<dyn RpcHandler>
where
    F: Fn(RpcContext, Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ServerResult<R>> + Send + 'static,
    R: Into<HandlerOutcome> + 'static,
{
    Arc::new(FnHandler {
        f: Box::new(move |ctx, params| {
            let fut = f(ctx, params);
            async move { fut.await.map(Into::into) }.boxed()
        }),
    })
}

fn typed_handler<F, Fut, P, R>(f: F) -> Arc<dyn RpcHandler>
where
    F: Fn(RpcContext, P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ServerResult<R>> + Send + 'static,
    P: FromParams + 'static,
    R: Serialize + 'static,
{
    let f = Arc::new(f);
    Arc::new(FnHandler {
        f: Box::new(move |ctx, params| {
            let f = f.clone();
            async move {
                let parsed = P::from_params(&params).map_err(ServerError::Rpc)?;
                let out = f(ctx, parsed).await?;
                Ok(HandlerOutcome::Value(serde_json::to_value(out)?))
            }
            .boxed()
        }),
    })
}
