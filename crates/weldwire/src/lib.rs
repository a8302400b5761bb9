//! Wire-neutral values and the message envelope for the weld RPC protocol.

mod codec;
mod message;
mod value;

#[cfg(test)]
mod tests;

pub use crate::codec::Error;
pub use crate::codec::JsonCodec;
pub use crate::codec::Result;
pub use crate::codec::WireCodec;

pub use crate::message::Message;
pub use crate::message::NO_CALL_ID;

pub use crate::value::Value;
