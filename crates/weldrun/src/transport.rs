//! # Transport Abstraction
//!
//! A minimal, async interface for moving serialized frames between peers.
//!
//! ## Philosophy
//!
//! - **Frame-Oriented**: The Transport knows nothing about messages, values,
//!   or schemas. It moves opaque frames the codec produced.
//! - **Push-Based**: The connection engine pulls inbound frames with `recv`
//!   (usually from a pump task) and pushes outbound frames with `send`.
//!   Correlation of calls with replies happens above this layer.

use std::fmt;

/// Errors that occur at the network/transport layer.
#[derive(Debug, Clone)]
pub enum Error {
    /// The peer is unreachable or the connection was dropped.
    ConnectionLost(String),
    /// Generic I/O error or internal transport failure.
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// A mechanism to exchange serialized frames with one peer.
///
/// This trait is designed to be object-safe (`Arc<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends one serialized frame.
    ///
    /// # invariants
    /// - Must not reorder frames relative to earlier `send` calls.
    /// - Should not interpret the frame content.
    async fn send(&self, frame: &str) -> Result<()>;

    /// Receives the next inbound frame.
    ///
    /// Returns `Ok(None)` when the stream has closed cleanly.
    async fn recv(&self) -> Result<Option<String>>;
}
