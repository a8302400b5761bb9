//! # Method Handlers
//!
//! The local functions a peer can invoke. A handler declares its parameters
//! as native shapes (or callable slots) so the engine can convert inbound
//! wire arguments before the handler runs; a handler registered without
//! parameter specs accepts whatever arrives, which is how callback routes
//! are installed.

use weldtype::NativeShape;
use weldwire::Value;

use crate::bridge::RemoteCallable;
use crate::connection::Connection;

/// Ambient information handed to a handler alongside its arguments.
pub struct CallContext {
    /// Present when the handler declared the connection as its first
    /// parameter; the engine injects itself and the slot is not consumed
    /// from the wire arguments.
    pub connection: Option<Connection>,
}

/// A native argument as the handler sees it.
#[derive(Clone)]
pub enum NativeArg {
    Value(Value),
    Callable(RemoteCallable),
}

impl NativeArg {
    pub fn value(&self) -> Option<&Value> {
        match self {
            NativeArg::Value(value) => Some(value),
            NativeArg::Callable(_) => None,
        }
    }

    pub fn callable(&self) -> Option<&RemoteCallable> {
        match self {
            NativeArg::Value(_) => None,
            NativeArg::Callable(callable) => Some(callable),
        }
    }
}

impl std::fmt::Debug for NativeArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NativeArg::Value(value) => write!(f, "{:?}", value),
            NativeArg::Callable(callable) => write!(f, "callable({})", callable.token()),
        }
    }
}

/// One declared handler parameter.
pub enum ParamSpec {
    /// A data parameter of the given native shape.
    Value(NativeShape),
    /// A function-valued parameter. `arity: None` is the generic callable
    /// reference type; `Some(n)` adapts the forwarding thunk to an exact
    /// n-argument signature. A callable with `returns_value` set can be
    /// constructed but never invoked.
    Callable {
        arity: Option<usize>,
        returns_value: bool,
    },
}

/// What a handler produces: a result value (`None` for void) or the message
/// of the exception it raised.
pub type HandlerResult = std::result::Result<Option<Value>, String>;

pub type HandlerFn = dyn Fn(CallContext, Vec<NativeArg>) -> HandlerResult + Send + Sync;

/// A registered, remotely callable function.
pub struct MethodHandler {
    takes_connection: bool,
    params: Option<Vec<ParamSpec>>,
    func: Box<HandlerFn>,
}

impl MethodHandler {
    /// A handler with a declared parameter list. Inbound argument counts and
    /// types are checked against it before the handler runs.
    pub fn new(
        params: Vec<ParamSpec>,
        func: impl Fn(CallContext, Vec<NativeArg>) -> HandlerResult + Send + Sync + 'static,
    ) -> Self {
        MethodHandler {
            takes_connection: false,
            params: Some(params),
            func: Box::new(func),
        }
    }

    /// A handler that accepts any arguments unchecked.
    pub fn untyped(
        func: impl Fn(CallContext, Vec<NativeArg>) -> HandlerResult + Send + Sync + 'static,
    ) -> Self {
        MethodHandler {
            takes_connection: false,
            params: None,
            func: Box::new(func),
        }
    }

    /// Declares the connection as the handler's first parameter.
    pub fn with_connection(mut self) -> Self {
        self.takes_connection = true;
        self
    }

    pub fn takes_connection(&self) -> bool {
        self.takes_connection
    }

    /// Declared parameters, excluding the injected connection slot.
    pub fn params(&self) -> Option<&[ParamSpec]> {
        self.params.as_deref()
    }

    pub fn invoke(&self, context: CallContext, args: Vec<NativeArg>) -> HandlerResult {
        (self.func)(context, args)
    }
}
