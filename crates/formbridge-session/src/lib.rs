//! Per-connection request correlation and capability proxies.
//!
//! A peer reachable over one bidirectional text-frame connection advertises
//! a set of capabilities. This crate turns those capabilities into local
//! proxies a reasoning engine can call, while concurrently accepting work
//! items from the same peer.
//!
//! # Architecture
//!
//! - [`RequestCorrelator`] allocates request ids and matches replies to the
//!   requests that are waiting for them.
//! - The read loop of a [`ConnectionSession`] classifies every inbound
//!   [`Frame`] as a reply (resolved inline) or a [`WorkItem`] (run as an
//!   independent task).
//! - [`discover`] fetches the capability list and binds one
//!   [`CapabilityProxy`] per entry.
//! - [`ConnectionSession`] ties the pieces together and owns their
//!   lifecycle; nothing it starts outlives it.
//!
//! Transports plug in through [`FrameSink`] and [`FrameSource`]; engines
//! plug in through [`ReasoningEngine`].

pub mod capability;
pub mod correlator;
mod dispatcher;
pub mod engine;
pub mod envelope;
pub mod error;
mod session;
pub mod transport;

#[cfg(test)]
mod test_support;
#[cfg(test)]
mod tests;

pub use self::capability::{
    CapabilityDescriptor, CapabilityMethods, CapabilityProxy, CapabilitySet, discover,
    render_output,
};
pub use self::correlator::{RequestCorrelator, Resolution};
pub use self::dispatcher::{DispatchExit, SessionCounters};
pub use self::engine::ReasoningEngine;
pub use self::envelope::{Frame, JsonRpcRequest, Reply, WorkItem, WorkReply};
pub use self::error::{CorrelationError, EngineError, FrameError, SessionError, TransportError};
pub use self::session::{ConnectionSession, SessionConfig, SessionReport, SessionState};
pub use self::transport::{FrameSink, FrameSource};
