//! # Callback Bridge
//!
//! Function values cannot cross the wire, so they travel by reference: the
//! first time a function value is passed as an argument it is assigned an
//! opaque UUID token, and the token is installed in the handler table as a
//! one-off method name routing back into the function. The receiving side
//! reconstructs a callable stand-in that forwards invocations to the token.
//!
//! ## Invariants
//!
//! - One token per function-value identity, for the life of the connection.
//! - The reverse route exists before the token is ever visible on the wire.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use weldwire::Value;

use crate::connection::CallArg;
use crate::connection::Connection;
use crate::handler::MethodHandler;
use crate::handler::NativeArg;

pub type CallbackFn =
    dyn Fn(Vec<NativeArg>) -> std::result::Result<Option<Value>, String> + Send + Sync;

/// A local function value that can be passed as a call argument.
///
/// Identity is the allocation, not the code: clones of one `Callback` share
/// a token, two separately constructed callbacks never do.
#[derive(Clone)]
pub struct Callback {
    func: Arc<CallbackFn>,
}

impl Callback {
    pub fn new(
        func: impl Fn(Vec<NativeArg>) -> std::result::Result<Option<Value>, String>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Callback { func: Arc::new(func) }
    }

    pub(crate) fn key(&self) -> usize {
        Arc::as_ptr(&self.func) as *const () as usize
    }

    pub(crate) fn invoke(
        &self,
        args: Vec<NativeArg>,
    ) -> std::result::Result<Option<Value>, String> {
        (self.func)(args)
    }
}

/// Maps function-value identities to their reference tokens.
pub(crate) struct CallbackBridge {
    tokens: DashMap<usize, String>,
}

impl CallbackBridge {
    pub(crate) fn new() -> Self {
        CallbackBridge { tokens: DashMap::new() }
    }

    /// Returns the token for a function value, minting one on first sight.
    ///
    /// Minting installs the reverse route into the handler table under the
    /// same entry lock, so no caller can observe a token whose handler does
    /// not exist yet.
    pub(crate) fn token_for(
        &self,
        callback: &Callback,
        handlers: &DashMap<String, Arc<MethodHandler>>,
    ) -> String {
        match self.tokens.entry(callback.key()) {
            Entry::Occupied(slot) => slot.get().clone(),
            Entry::Vacant(slot) => {
                let token = Uuid::new_v4().to_string();
                let callback = callback.clone();
                handlers.insert(
                    token.clone(),
                    Arc::new(MethodHandler::untyped(move |_context, args| {
                        callback.invoke(args)
                    })),
                );
                slot.insert(token.clone());
                token
            }
        }
    }
}

/// Errors from invoking a forwarding callable.
#[derive(Debug, Clone)]
pub enum InvokeError {
    /// The callable's declared return type is non-void. There is no way to
    /// await a nested reply without deadlocking the message-processing path,
    /// so such callables always refuse invocation.
    UnsupportedReturn,
    /// The callable was adapted to an exact signature and the argument count
    /// does not match it.
    ArityMismatch { expected: usize, received: usize },
}

impl std::fmt::Display for InvokeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedReturn => {
                write!(f, "Forwarding callables with a return value are not supported")
            }
            Self::ArityMismatch { expected, received } => write!(
                f,
                "Callable expects {} arguments, received {}",
                expected, received
            ),
        }
    }
}

impl std::error::Error for InvokeError {}

/// The callable stand-in for a function value held by the peer.
///
/// Invoking it issues a new outbound call addressed to the reference token.
/// The call is fire-and-forget from the invoker's point of view: handlers
/// run inside message dispatch and must never block on a nested reply.
#[derive(Clone)]
pub struct RemoteCallable {
    token: String,
    connection: Connection,
    arity: Option<usize>,
    returns_value: bool,
}

impl RemoteCallable {
    pub(crate) fn new(
        token: String,
        connection: Connection,
        arity: Option<usize>,
        returns_value: bool,
    ) -> Self {
        RemoteCallable { token, connection, arity, returns_value }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Forwards an invocation to the peer's function value.
    pub fn invoke(&self, args: Vec<Value>) -> std::result::Result<(), InvokeError> {
        if self.returns_value {
            return Err(InvokeError::UnsupportedReturn);
        }
        if let Some(expected) = self.arity {
            if args.len() != expected {
                return Err(InvokeError::ArityMismatch { expected, received: args.len() });
            }
        }
        let connection = self.connection.clone();
        let token = self.token.clone();
        tokio::spawn(async move {
            let args = args.into_iter().map(CallArg::Value).collect();
            if let Err(error) = connection.call(&token, args).await {
                tracing::warn!(%token, %error, "forwarding call to peer callback failed");
            }
        });
        Ok(())
    }
}

impl std::fmt::Debug for RemoteCallable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCallable")
            .field("token", &self.token)
            .field("arity", &self.arity)
            .field("returns_value", &self.returns_value)
            .finish()
    }
}
