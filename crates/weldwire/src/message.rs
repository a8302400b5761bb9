//! # Protocol Messages
//!
//! The three message kinds a connection exchanges. The wire shape is a
//! positional array, tagged by its first element:
//!
//! - Request:   `["call", id, method, [callback indices...], arg0, arg1, ...]`
//! - Response:  `["call-reply", id, true, value]` on success
//!              (`["call-reply", id, true]` when the call returns nothing),
//!              `["call-reply", id, false, reason]` on a handler exception
//! - Error:     `["call-error", id, reason]` for protocol-level exceptions
//!              raised before a handler even runs
//!
//! `id` is chosen by the call initiator; [`NO_CALL_ID`] marks a fault that is
//! not attributable to any call.

use crate::value::Value;

/// Reserved call id meaning "no valid call context".
pub const NO_CALL_ID: i64 = -1;

/// One unit of protocol traffic.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// An invocation of a named method on the peer.
    Request {
        id: i64,
        method: String,
        /// Argument positions carrying callback reference tokens.
        callback_indices: Vec<usize>,
        args: Vec<Value>,
    },
    /// The settlement of a request: a result value (possibly none) or the
    /// message of an exception the handler raised.
    Response {
        id: i64,
        outcome: Result<Option<Value>, Value>,
    },
    /// A protocol-level exception: the peer could not get as far as running
    /// a handler (unknown method, bad arguments, unmatched reply).
    Error { id: i64, reason: String },
}

impl Message {
    /// The call id this message belongs to.
    pub fn id(&self) -> i64 {
        match self {
            Message::Request { id, .. } => *id,
            Message::Response { id, .. } => *id,
            Message::Error { id, .. } => *id,
        }
    }

    /// The wire tag for this message kind.
    pub fn tag(&self) -> &'static str {
        match self {
            Message::Request { .. } => "call",
            Message::Response { .. } => "call-reply",
            Message::Error { .. } => "call-error",
        }
    }
}
