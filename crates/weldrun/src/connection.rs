//! # Connection Engine
//!
//! One [`Connection`] is one peer session. It owns the call registry, the
//! handler table, the callback bridge, and the readiness gate, and it is the
//! sole entry and exit point for traffic: outbound via [`Connection::call`],
//! inbound via [`Connection::on_message`].
//!
//! ## Invariants
//!
//! - A pending call is registered before its request is transmitted.
//! - Inbound messages are processed in strict arrival order; nothing is
//!   dispatched while the readiness gate is closed or while an earlier
//!   deferred message is unprocessed.
//! - Dispatch never blocks waiting for a reply; outbound calls are
//!   register-then-fire and results arrive via a later Response message.
//! - Conversion and dispatch failures for a request that expects a reply are
//!   reported to the peer, never thrown past the dispatch boundary.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::warn;

use weldtype::FunctionSig;
use weldtype::Schema;
use weldwire::Message;
use weldwire::NO_CALL_ID;
use weldwire::Value;
use weldwire::WireCodec;

use crate::bridge::Callback;
use crate::bridge::CallbackBridge;
use crate::bridge::RemoteCallable;
use crate::handler::CallContext;
use crate::handler::MethodHandler;
use crate::handler::NativeArg;
use crate::handler::ParamSpec;
use crate::registry::CallError;
use crate::registry::CallHandle;
use crate::registry::CallRegistry;
use crate::transport;
use crate::transport::Transport;

#[derive(Debug)]
pub enum Error {
    /// The connection has been closed; no further traffic is possible.
    Closed,
    Transport(transport::Error),
    Codec(weldwire::Error),
    Type(weldtype::Error),
    /// The loaded schema knows the service but declares no such function.
    UnknownFunction { service: String, function: String },
    /// Outbound argument count does not match the declared signature.
    ArgumentCount { expected: usize, received: usize },
    /// The peer reported a fault not attributable to any call: the two
    /// sides disagree on protocol state.
    Fault(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Connection is closed"),
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Codec(e) => write!(f, "Codec error: {}", e),
            Self::Type(e) => write!(f, "{}", e),
            Self::UnknownFunction { service, function } => {
                write!(f, "Function {}.{} is not declared by the schema", service, function)
            }
            Self::ArgumentCount { expected, received } => write!(
                f,
                "Incorrect number of arguments for a method. Expected: {}. Received: {}",
                expected, received
            ),
            Self::Fault(reason) => write!(f, "Protocol fault: {}", reason),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Codec(e) => Some(e),
            Self::Type(e) => Some(e),
            _ => None,
        }
    }
}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        Self::Transport(e)
    }
}

impl From<weldwire::Error> for Error {
    fn from(e: weldwire::Error) -> Self {
        Self::Codec(e)
    }
}

impl From<weldtype::Error> for Error {
    fn from(e: weldtype::Error) -> Self {
        Self::Type(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// An outbound call argument: a plain value, or a function value that will
/// travel as a reference token.
pub enum CallArg {
    Value(Value),
    Callback(Callback),
}

impl From<Value> for CallArg {
    fn from(value: Value) -> Self {
        CallArg::Value(value)
    }
}

impl From<Callback> for CallArg {
    fn from(callback: Callback) -> Self {
        CallArg::Callback(callback)
    }
}

/// Readiness gate plus the deferred FIFO it guards.
struct Gate {
    ready: bool,
    /// Set while `mark_ready` is replaying the queue, so concurrent arrivals
    /// append behind the backlog instead of jumping it.
    draining: bool,
    deferred: VecDeque<Message>,
}

struct ConnectionInner {
    transport: Arc<dyn Transport>,
    codec: Arc<dyn WireCodec>,
    schema: Option<Schema>,
    registry: CallRegistry,
    handlers: DashMap<String, Arc<MethodHandler>>,
    bridge: CallbackBridge,
    one_way: DashMap<String, bool>,
    gate: Mutex<Gate>,
    closed: AtomicBool,
}

/// The per-peer RPC engine. Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// A connection with no schema: arguments pass through with best-effort
    /// coercion only, and every method expects a reply.
    pub fn new(transport: Arc<dyn Transport>, codec: Arc<dyn WireCodec>) -> Self {
        Self::build(transport, codec, None)
    }

    /// A connection converting through the given schema.
    pub fn with_schema(
        transport: Arc<dyn Transport>,
        codec: Arc<dyn WireCodec>,
        schema: Schema,
    ) -> Self {
        Self::build(transport, codec, Some(schema))
    }

    fn build(
        transport: Arc<dyn Transport>,
        codec: Arc<dyn WireCodec>,
        schema: Option<Schema>,
    ) -> Self {
        Connection {
            inner: Arc::new(ConnectionInner {
                transport,
                codec,
                schema,
                registry: CallRegistry::new(),
                handlers: DashMap::new(),
                bridge: CallbackBridge::new(),
                one_way: DashMap::new(),
                gate: Mutex::new(Gate {
                    ready: false,
                    draining: false,
                    deferred: VecDeque::new(),
                }),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Registers (or replaces) the handler for a method name.
    pub fn register(&self, method: impl Into<String>, handler: MethodHandler) {
        self.inner.handlers.insert(method.into(), Arc::new(handler));
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn outstanding_calls(&self) -> usize {
        self.inner.registry.outstanding()
    }

    /// Issues an outbound call.
    ///
    /// Function-valued arguments are replaced by reference tokens and their
    /// positions recorded; plain values convert through the schema signature
    /// when one is loaded for the method, otherwise they pass through with
    /// numeric normalization only. If the method's declared return type is
    /// void the call is one-way: no pending entry is registered and the
    /// returned handle settles immediately.
    pub async fn call(&self, method: &str, args: Vec<CallArg>) -> Result<CallHandle> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let signature = self.signature_of(method)?;
        if let Some(signature) = &signature {
            if signature.params.len() != args.len() {
                return Err(Error::ArgumentCount {
                    expected: signature.params.len(),
                    received: args.len(),
                });
            }
        }
        let one_way = self.is_one_way(method);

        let mut callback_indices = Vec::new();
        let mut wire_args = Vec::with_capacity(args.len());
        for (position, arg) in args.into_iter().enumerate() {
            match arg {
                CallArg::Callback(callback) => {
                    let token = self.inner.bridge.token_for(&callback, &self.inner.handlers);
                    callback_indices.push(position);
                    wire_args.push(Value::Str(token));
                }
                CallArg::Value(value) => {
                    let converted = match &signature {
                        Some(signature) => signature.params[position].assign_from_native(&value)?,
                        None => value.normalized(),
                    };
                    wire_args.push(converted);
                }
            }
        }

        let id = self.inner.registry.allocate_id();
        // Register before transmitting: a reply must never find no entry.
        let handle = if one_way {
            CallHandle::one_way()
        } else {
            CallHandle::awaited(self.inner.registry.register(id))
        };

        let message = Message::Request {
            id,
            method: method.to_string(),
            callback_indices,
            args: wire_args,
        };
        let frame = match self.inner.codec.serialize(&message) {
            Ok(frame) => frame,
            Err(e) => {
                self.inner.registry.abandon(id);
                return Err(e.into());
            }
        };
        if let Err(e) = self.inner.transport.send(&frame).await {
            self.inner.registry.abandon(id);
            return Err(e.into());
        }
        Ok(handle)
    }

    /// Feeds one raw inbound frame into the engine.
    ///
    /// Frames that fail to deserialize are logged and discarded. While the
    /// connection is not ready (or a backlog is still draining) the parsed
    /// message is deferred in arrival order. Returns an error only for a
    /// protocol fault the surrounding application must see.
    pub async fn on_message(&self, raw: &str) -> Result<()> {
        if self.is_closed() {
            debug!("ignoring message on a closed connection");
            return Ok(());
        }
        let message = match self.inner.codec.deserialize(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "discarding message that failed to deserialize");
                return Ok(());
            }
        };
        let message = {
            let mut gate = self.inner.gate.lock().await;
            if !gate.ready || gate.draining || !gate.deferred.is_empty() {
                gate.deferred.push_back(message);
                return Ok(());
            }
            message
        };
        self.dispatch(message).await
    }

    /// Declares the connection ready and replays the deferred backlog, one
    /// message at a time, in arrival order. Messages arriving during the
    /// drain append behind the backlog and are replayed in the same pass.
    pub async fn mark_ready(&self) -> Result<()> {
        {
            let mut gate = self.inner.gate.lock().await;
            gate.ready = true;
            gate.draining = true;
        }
        loop {
            let next = {
                let mut gate = self.inner.gate.lock().await;
                match gate.deferred.pop_front() {
                    Some(message) => Some(message),
                    None => {
                        gate.draining = false;
                        None
                    }
                }
            };
            let Some(message) = next else { break };
            if let Err(e) = self.dispatch(message).await {
                let mut gate = self.inner.gate.lock().await;
                gate.draining = false;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Closes the connection: every outstanding call fails with a
    /// connection-closed error. The deferred queue is not flushed.
    pub fn close(&self) {
        self.close_with(CallError::Closed);
    }

    fn close_with(&self, error: CallError) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.registry.fail_all(error);
    }

    /// Spawns the background reader that feeds transport frames into
    /// `on_message`. The task stops when the stream closes, the transport
    /// fails, or a protocol fault surfaces; outstanding calls are failed
    /// accordingly.
    pub fn spawn_pump(&self) -> JoinHandle<()> {
        let connection = self.clone();
        tokio::spawn(async move {
            loop {
                match connection.inner.transport.recv().await {
                    Ok(Some(frame)) => {
                        if let Err(fault) = connection.on_message(&frame).await {
                            error!(%fault, "connection fault, stopping pump");
                            connection.close_with(CallError::Fault(fault.to_string()));
                            break;
                        }
                    }
                    Ok(None) => {
                        connection.close();
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "transport failed, closing connection");
                        connection.close();
                        break;
                    }
                }
            }
        })
    }

    async fn dispatch(&self, message: Message) -> Result<()> {
        match message {
            Message::Request { id, method, callback_indices, args } => {
                self.dispatch_request(id, method, callback_indices, args).await
            }
            Message::Response { id, outcome } => self.dispatch_response(id, outcome).await,
            Message::Error { id, reason } => self.dispatch_error(id, reason).await,
        }
    }

    async fn dispatch_request(
        &self,
        id: i64,
        method: String,
        callback_indices: Vec<usize>,
        args: Vec<Value>,
    ) -> Result<()> {
        let one_way = self.is_one_way(&method);
        let Some(handler) = self.inner.handlers.get(&method).map(|entry| entry.value().clone())
        else {
            if one_way {
                debug!(%method, "dropping one-way call to unregistered method");
            } else {
                self.send_error(id, format!("Method {} is not registered", method)).await?;
            }
            return Ok(());
        };

        if let Some(specs) = handler.params() {
            if specs.len() != args.len() {
                let reason = format!(
                    "Incorrect number of arguments for a method. Expected: {}. Received: {}",
                    specs.len(),
                    args.len()
                );
                if one_way {
                    debug!(%method, %reason, "dropping one-way call");
                } else {
                    self.send_error(id, reason).await?;
                }
                return Ok(());
            }
        }

        // A handler may exist for a method the schema does not declare (a
        // callback token, or an undeclared service); conversion then falls
        // back to the handler's own shapes.
        let signature = self.signature_of(&method).ok().flatten();
        let native =
            match self.convert_request_args(&handler, signature.as_deref(), &callback_indices, args)
            {
                Ok(native) => native,
                Err(e) => {
                    if one_way {
                        debug!(%method, error = %e, "dropping one-way call");
                    } else {
                        self.send_error(id, e.to_string()).await?;
                    }
                    return Ok(());
                }
            };

        let context = CallContext {
            connection: handler.takes_connection().then(|| self.clone()),
        };

        if one_way {
            // No id to report against: handler failures are swallowed.
            if let Err(e) = handler.invoke(context, native) {
                warn!(%method, error = %e, "one-way handler failed");
            }
            return Ok(());
        }

        let outcome = match handler.invoke(context, native) {
            Ok(Some(value)) => match signature.as_ref().and_then(|s| s.ret.as_ref()) {
                Some(descriptor) => match descriptor.assign_from_native(&value) {
                    Ok(converted) => Ok(Some(converted)),
                    Err(e) => Err(Value::Str(e.to_string())),
                },
                None => Ok(Some(value.normalized())),
            },
            Ok(None) => Ok(None),
            Err(message) => Err(Value::Str(message)),
        };
        self.send_response(id, outcome).await
    }

    fn convert_request_args(
        &self,
        handler: &MethodHandler,
        signature: Option<&FunctionSig>,
        callback_indices: &[usize],
        args: Vec<Value>,
    ) -> std::result::Result<Vec<NativeArg>, weldtype::Error> {
        let mut native = Vec::with_capacity(args.len());
        for (position, value) in args.into_iter().enumerate() {
            if callback_indices.contains(&position) {
                let Value::Str(token) = value else {
                    return Err(weldtype::Error::TypeCast {
                        expected: "callback reference".into(),
                        found: value.type_name().into(),
                    });
                };
                let callable = match handler.params().and_then(|specs| specs.get(position)) {
                    Some(ParamSpec::Callable { arity, returns_value }) => {
                        RemoteCallable::new(token, self.clone(), *arity, *returns_value)
                    }
                    Some(ParamSpec::Value(shape)) => {
                        return Err(weldtype::Error::TypeCast {
                            expected: shape.name().to_string(),
                            found: "callback reference".into(),
                        });
                    }
                    None => RemoteCallable::new(token, self.clone(), None, false),
                };
                native.push(NativeArg::Callable(callable));
            } else {
                let converted = match handler.params().and_then(|specs| specs.get(position)) {
                    Some(ParamSpec::Value(shape)) => {
                        match signature.and_then(|s| s.params.get(position)) {
                            Some(descriptor) => descriptor.assign_to_native(&value, shape)?,
                            None => shape.coerce(&value)?,
                        }
                    }
                    Some(ParamSpec::Callable { .. }) => {
                        return Err(weldtype::Error::TypeCast {
                            expected: "callback reference".into(),
                            found: value.type_name().into(),
                        });
                    }
                    None => value,
                };
                native.push(NativeArg::Value(converted));
            }
        }
        Ok(native)
    }

    async fn dispatch_response(
        &self,
        id: i64,
        outcome: std::result::Result<Option<Value>, Value>,
    ) -> Result<()> {
        let settled = match outcome {
            Ok(value) => self.inner.registry.resolve(id, Ok(value.unwrap_or(Value::Null))),
            Err(reason) => self.inner.registry.resolve(id, Err(CallError::Remote(reason))),
        };
        if !settled {
            self.send_error(NO_CALL_ID, format!("Invalid callID: {}", id)).await?;
        }
        Ok(())
    }

    async fn dispatch_error(&self, id: i64, reason: String) -> Result<()> {
        if id == NO_CALL_ID {
            // Not attributable to any call: the stream itself is suspect.
            return Err(Error::Fault(reason));
        }
        if !self.inner.registry.resolve(id, Err(CallError::Fault(reason.clone()))) {
            // A failure report for a call nobody is waiting on (one-way, or
            // already settled). Asymmetric with the Response case on purpose.
            debug!(id, %reason, "protocol error for a call no longer pending");
        }
        Ok(())
    }

    async fn send_response(
        &self,
        id: i64,
        outcome: std::result::Result<Option<Value>, Value>,
    ) -> Result<()> {
        let frame = self.inner.codec.serialize(&Message::Response { id, outcome })?;
        self.inner.transport.send(&frame).await?;
        Ok(())
    }

    async fn send_error(&self, id: i64, reason: String) -> Result<()> {
        let frame = self.inner.codec.serialize(&Message::Error { id, reason })?;
        self.inner.transport.send(&frame).await?;
        Ok(())
    }

    /// Looks up the schema signature for a `service.function` method name.
    ///
    /// A name that matches no loaded service takes the schemaless path; a
    /// known service with an unknown function is an error the caller sees
    /// synchronously.
    fn signature_of(&self, method: &str) -> Result<Option<Arc<FunctionSig>>> {
        let Some(schema) = &self.inner.schema else {
            return Ok(None);
        };
        let Some((service, function)) = method.rsplit_once('.') else {
            return Ok(None);
        };
        if !schema.has_service(service) {
            return Ok(None);
        }
        match schema.get_service_function(service, function) {
            Some(signature) => Ok(Some(signature)),
            None => Err(Error::UnknownFunction {
                service: service.to_string(),
                function: function.to_string(),
            }),
        }
    }

    /// One-way-ness per method name, computed once and memoized.
    fn is_one_way(&self, method: &str) -> bool {
        if let Some(hit) = self.inner.one_way.get(method) {
            return *hit;
        }
        let one_way = match &self.inner.schema {
            Some(schema) => method
                .rsplit_once('.')
                .and_then(|(service, function)| schema.get_service_function(service, function))
                .map(|signature| signature.is_one_way())
                .unwrap_or(false),
            None => false,
        };
        self.inner.one_way.insert(method.to_string(), one_way);
        one_way
    }
}
