//! Transport boundary carrying one text frame per message.
//!
//! The session core never touches sockets directly. Concrete transports
//! implement [`FrameSink`] for the outbound half and [`FrameSource`] for the
//! inbound half; [`memory::duplex`] wires the two ends of an in-process pair.

use async_trait::async_trait;

use crate::error::TransportError;

/// Outbound half of a connection.
///
/// Implementations are shared between the correlator, the proxies and the
/// work tasks, so `send` takes `&self` and must serialise writes internally.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Writes one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the frame cannot be written.
    async fn send(&self, frame: String) -> Result<(), TransportError>;
}

/// Inbound half of a connection, owned by the dispatcher.
#[async_trait]
pub trait FrameSource: Send {
    /// Suspends until the next text frame arrives.
    ///
    /// Returns `Ok(None)` when the peer disconnects. Implementations must be
    /// cancel safe: dropping the future must not lose a frame.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the connection fails.
    async fn receive(&mut self) -> Result<Option<String>, TransportError>;
}

/// In-process transport built on tokio channels.
pub mod memory {
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::{FrameSink, FrameSource};
    use crate::error::TransportError;

    /// Sending end of an in-memory connection.
    #[derive(Debug, Clone)]
    pub struct MemorySink {
        sender: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl FrameSink for MemorySink {
        async fn send(&self, frame: String) -> Result<(), TransportError> {
            self.sender
                .send(frame)
                .map_err(|_| TransportError::Closed)
        }
    }

    /// Receiving end of an in-memory connection.
    #[derive(Debug)]
    pub struct MemorySource {
        receiver: mpsc::UnboundedReceiver<String>,
    }

    #[async_trait]
    impl FrameSource for MemorySource {
        async fn receive(&mut self) -> Result<Option<String>, TransportError> {
            Ok(self.receiver.recv().await)
        }
    }

    /// One side of an in-memory connection.
    #[derive(Debug)]
    pub struct Endpoint {
        /// Frames written here arrive at the other side's source.
        pub sink: MemorySink,
        /// Frames written by the other side arrive here.
        pub source: MemorySource,
    }

    /// Creates a connected pair of endpoints.
    ///
    /// Dropping every sink of one side makes the other side's source report
    /// a disconnect.
    #[must_use]
    pub fn duplex() -> (Endpoint, Endpoint) {
        let (left_tx, left_rx) = mpsc::unbounded_channel();
        let (right_tx, right_rx) = mpsc::unbounded_channel();
        (
            Endpoint {
                sink: MemorySink { sender: left_tx },
                source: MemorySource { receiver: right_rx },
            },
            Endpoint {
                sink: MemorySink { sender: right_tx },
                source: MemorySource { receiver: left_rx },
            },
        )
    }
}
