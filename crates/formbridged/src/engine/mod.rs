//! Reasoning engines available to the daemon.

mod anthropic;
mod wire;

pub use self::anthropic::{AnthropicEngine, AnthropicSettings, EngineConfigError};
