//! # Weldrun
//!
//! The per-connection RPC engine: call/response correlation, readiness-gated
//! deferred dispatch, schema-driven argument conversion, and callback
//! bridging by reference token. Transports and codecs are collaborators
//! supplied from outside; see `weldwire` for the message model and
//! `weldtype` for the schema layer.

pub mod bridge;
pub mod connection;
pub mod handler;
pub mod mock_transport;
pub mod registry;
pub mod transport;

#[cfg(test)]
mod tests;
