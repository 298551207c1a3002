//! Error types surfaced by the session core.

use std::time::Duration;

use thiserror::Error;

/// Failure to decode an inbound text frame.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The frame is not valid JSON.
    #[error("frame is not valid JSON: {0}")]
    Json(#[source] serde_json::Error),

    /// The frame is valid JSON but not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,

    /// The frame looks like a JSON-RPC reply but does not decode as one.
    #[error("reply frame is malformed: {0}")]
    Reply(#[source] serde_json::Error),
}

/// Failure reported by a transport implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection is gone and can no longer carry frames.
    #[error("connection closed")]
    Closed,

    /// The underlying channel reported an error.
    #[error("transport failure: {message}")]
    Io {
        /// Human-readable description.
        message: String,
        /// Underlying cause, when one exists.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl TransportError {
    /// Wraps a lower-level error raised by a transport implementation.
    #[must_use]
    pub fn io(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Io {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Failure of one correlated request.
#[derive(Debug, Error)]
pub enum CorrelationError {
    /// No reply arrived within the configured timeout.
    #[error("request {id} timed out after {timeout:?}")]
    Timeout {
        /// Identifier of the request.
        id: i64,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The session ended before a reply arrived, or had already ended.
    #[error("connection closed before request {id} completed")]
    ConnectionClosed {
        /// Identifier of the request, `0` when none was allocated.
        id: i64,
    },

    /// The request could not be written to the transport.
    #[error("failed to send request {id}: {source}")]
    Transport {
        /// Identifier of the request.
        id: i64,
        /// Underlying transport failure.
        #[source]
        source: TransportError,
    },

    /// The request parameters could not be serialised.
    #[error("failed to encode request: {source}")]
    Encode {
        /// Serialisation failure.
        #[source]
        source: serde_json::Error,
    },
}

/// Failure reported by a reasoning engine.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct EngineError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl EngineError {
    /// Builds an engine error with a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Builds an engine error wrapping an underlying cause.
    #[must_use]
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Human-readable description of the failure.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Failure of a session lifecycle operation.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A lifecycle step was attempted from the wrong state.
    #[error("session is {actual}, expected {expected}")]
    InvalidState {
        /// State required by the operation.
        expected: crate::SessionState,
        /// State the session was in.
        actual: crate::SessionState,
    },

    /// Work reached the engine before capability discovery completed.
    #[error("agent not ready")]
    EngineNotReady,

    /// The session closed before queued work could run.
    #[error("session closed")]
    Closed,

    /// Capability discovery failed because the connection closed.
    #[error("capability discovery failed: {0}")]
    Discovery(#[source] CorrelationError),

    /// The listener task ended abnormally.
    #[error("listener task failed: {0}")]
    Listener(#[source] tokio::task::JoinError),
}
