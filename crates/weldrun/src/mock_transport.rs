//! Mock transports for testing.
//!
//! These are used by the test suites and are not meant for production use.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::sync::mpsc;

use crate::transport;
use crate::transport::Transport;

/// A duplex channel transport using tokio mpsc channels.
///
/// Frames sent via one side's `send` appear on the peer's `recv` and vice
/// versa, which is enough to wire two connection engines to each other
/// in-process.
pub struct DuplexChannelTransport {
    tx: mpsc::UnboundedSender<String>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
}

impl DuplexChannelTransport {
    /// Creates a pair of transports connected to each other.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();

        let a = Self {
            tx: tx_a,
            rx: Arc::new(Mutex::new(rx_b)),
        };

        let b = Self {
            tx: tx_b,
            rx: Arc::new(Mutex::new(rx_a)),
        };

        (a, b)
    }
}

#[async_trait::async_trait]
impl Transport for DuplexChannelTransport {
    async fn send(&self, frame: &str) -> transport::Result<()> {
        self.tx
            .send(frame.to_string())
            .map_err(|_| transport::Error::ConnectionLost("Channel closed".into()))
    }

    async fn recv(&self) -> transport::Result<Option<String>> {
        let mut rx = self.rx.lock().await;
        Ok(rx.recv().await)
    }
}

/// A send-only transport that records every frame, for exact-wire assertions.
pub struct RecordingTransport {
    sent: Mutex<Vec<String>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self { sent: Mutex::new(Vec::new()) }
    }

    /// Everything sent so far, in order.
    pub async fn sent(&self) -> Vec<String> {
        self.sent.lock().await.clone()
    }
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, frame: &str) -> transport::Result<()> {
        self.sent.lock().await.push(frame.to_string());
        Ok(())
    }

    async fn recv(&self) -> transport::Result<Option<String>> {
        Err(transport::Error::Io("RecordingTransport does not receive".into()))
    }
}
