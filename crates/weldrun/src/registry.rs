//! # Call Registry
//!
//! Allocates call identifiers and tracks outstanding calls until their reply
//! arrives. Identifiers come from a single monotonically increasing counter,
//! so they are unique for the lifetime of a connection.
//!
//! ## Invariants
//!
//! - A call id has at most one live pending entry.
//! - The caller registers the pending entry *before* transmitting the
//!   request, so a fast reply can never find missing bookkeeping.

use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use tokio::sync::oneshot;

use weldwire::Value;

/// Why a call failed to produce a result value.
#[derive(Debug, Clone)]
pub enum CallError {
    /// The peer's handler raised an exception; the payload is its message.
    Remote(Value),
    /// The connection closed while the call was outstanding.
    Closed,
    /// A protocol-level failure was reported against this call.
    Fault(String),
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote(reason) => match reason.as_str() {
                Some(text) => write!(f, "Remote exception: {}", text),
                None => write!(f, "Remote exception: {:?}", reason),
            },
            Self::Closed => write!(f, "Connection closed"),
            Self::Fault(reason) => write!(f, "Protocol fault: {}", reason),
        }
    }
}

impl std::error::Error for CallError {}

/// How a call settled: its result value, or the failure that ended it.
pub type CallOutcome = std::result::Result<Value, CallError>;

struct PendingCall {
    tx: oneshot::Sender<CallOutcome>,
}

/// Shared table of outstanding calls plus the id counter.
pub struct CallRegistry {
    next_id: AtomicI64,
    pending: DashMap<i64, PendingCall>,
}

impl CallRegistry {
    pub fn new() -> Self {
        CallRegistry {
            next_id: AtomicI64::new(0),
            pending: DashMap::new(),
        }
    }

    /// Hands out the next call id. Ids start at 0 and never repeat.
    pub fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers a pending entry for `id` and returns the receiving side.
    pub fn register(&self, id: i64) -> oneshot::Receiver<CallOutcome> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, PendingCall { tx });
        rx
    }

    /// Settles the pending call for `id`. Returns `false` if no call with
    /// that id is outstanding.
    pub fn resolve(&self, id: i64, outcome: CallOutcome) -> bool {
        match self.pending.remove(&id) {
            Some((_, call)) => {
                // The caller may have dropped its handle; that's fine.
                let _ = call.tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Drops the pending entry without settling it (the request never left).
    pub fn abandon(&self, id: i64) {
        self.pending.remove(&id);
    }

    /// Fails every outstanding call with the given error.
    pub fn fail_all(&self, error: CallError) {
        let ids: Vec<i64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, call)) = self.pending.remove(&id) {
                let _ = call.tx.send(Err(error.clone()));
            }
        }
    }

    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }
}

impl Default for CallRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The caller's side of an issued call.
pub struct CallHandle {
    rx: Option<oneshot::Receiver<CallOutcome>>,
}

impl CallHandle {
    pub(crate) fn awaited(rx: oneshot::Receiver<CallOutcome>) -> Self {
        CallHandle { rx: Some(rx) }
    }

    pub(crate) fn one_way() -> Self {
        CallHandle { rx: None }
    }

    pub fn is_one_way(&self) -> bool {
        self.rx.is_none()
    }

    /// Awaits settlement. One-way calls settle immediately with `Null`.
    pub async fn outcome(self) -> CallOutcome {
        match self.rx {
            None => Ok(Value::Null),
            Some(rx) => rx.await.unwrap_or(Err(CallError::Closed)),
        }
    }
}
