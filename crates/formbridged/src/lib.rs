//! WebSocket daemon bridging form-filling peers to a reasoning engine.
//!
//! Each peer that upgrades on the configured chat route gets its own
//! [`formbridge_session::ConnectionSession`]. The session discovers the
//! capabilities the peer exposes, binds them as tools, and answers every
//! work item with the engine's reply.
//!
//! Start-up follows a fixed sequence: configuration is loaded, structured
//! telemetry is initialised, the listener is bound, and connections are
//! served until the shutdown token fires. Health reporting hooks emit a
//! structured event at each step so operators can see where a failure
//! happened.

mod bootstrap;
pub mod engine;
mod health;
mod telemetry;
mod transport;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Daemon, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
};
pub use engine::{AnthropicEngine, AnthropicSettings, EngineConfigError};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use transport::{ServeError, Server, WebSocketSink, WebSocketSource, split};

#[cfg(test)]
mod tests;
