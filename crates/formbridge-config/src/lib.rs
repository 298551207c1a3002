//! Shared configuration for the formbridge daemon and its session layer.
//!
//! Configuration is layered with `ortho_config`: built-in defaults are
//! overridden by a TOML file (`--config-path`), then by `FORMBRIDGE_*`
//! environment variables, then by command-line flags. Every field carries a
//! serde default so partial files and sparse environments remain valid.

mod defaults;
mod endpoint;
mod modes;

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_CALL_METHOD, DEFAULT_CHAT_PATH, DEFAULT_ENGINE_BASE_URL, DEFAULT_ENGINE_MAX_TOKENS,
    DEFAULT_ENGINE_MAX_TOOL_ROUNDS, DEFAULT_ENGINE_MODEL, DEFAULT_HOST, DEFAULT_LIST_METHOD,
    DEFAULT_LOG_FILTER, DEFAULT_PORT, DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_SYSTEM_PROMPT,
    default_early_work, default_listen_endpoint, default_log_filter, default_log_filter_string,
    default_log_format,
};
pub use endpoint::{ListenEndpoint, ListenEndpointParseError};
pub use modes::{EarlyWorkPolicy, EarlyWorkPolicyParseError, LogFormat, LogFormatParseError};

/// Resolved configuration shared by the daemon binary and its sessions.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, OrthoConfig)]
#[ortho_config(prefix = "FORMBRIDGE")]
pub struct Config {
    /// Address the WebSocket listener binds to.
    #[ortho_config(default = default_listen_endpoint())]
    #[serde(default = "default_listen_endpoint")]
    pub listen: ListenEndpoint,
    /// HTTP route that is upgraded to a WebSocket.
    #[ortho_config(default = defaults::default_chat_path())]
    #[serde(default = "defaults::default_chat_path")]
    pub chat_path: String,
    /// Deadline for a single correlated request, in seconds.
    #[ortho_config(default = DEFAULT_REQUEST_TIMEOUT_SECS)]
    #[serde(default = "defaults::default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Method name used to list the peer's capabilities.
    #[ortho_config(default = defaults::default_list_method())]
    #[serde(default = "defaults::default_list_method")]
    pub capability_list_method: String,
    /// Method name used to invoke one of the peer's capabilities.
    #[ortho_config(default = defaults::default_call_method())]
    #[serde(default = "defaults::default_call_method")]
    pub capability_call_method: String,
    /// Treatment of work items that arrive before discovery completes.
    #[ortho_config(default = default_early_work())]
    #[serde(default = "default_early_work")]
    pub early_work: EarlyWorkPolicy,
    /// `tracing` filter expression.
    #[ortho_config(default = default_log_filter_string())]
    #[serde(default = "default_log_filter_string")]
    pub log_filter: String,
    /// Log output format.
    #[ortho_config(default = default_log_format())]
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
    /// Model identifier requested from the reasoning engine.
    #[ortho_config(default = defaults::default_engine_model())]
    #[serde(default = "defaults::default_engine_model")]
    pub engine_model: String,
    /// API key for the reasoning engine. Falls back to `ANTHROPIC_API_KEY`.
    #[serde(default)]
    pub engine_api_key: Option<String>,
    /// Base URL of the reasoning engine API.
    #[ortho_config(default = defaults::default_engine_base_url())]
    #[serde(default = "defaults::default_engine_base_url")]
    pub engine_base_url: String,
    /// Completion token budget per engine round.
    #[ortho_config(default = DEFAULT_ENGINE_MAX_TOKENS)]
    #[serde(default = "defaults::default_engine_max_tokens")]
    pub engine_max_tokens: u32,
    /// Upper bound on tool-use rounds for one work item.
    #[ortho_config(default = DEFAULT_ENGINE_MAX_TOOL_ROUNDS)]
    #[serde(default = "defaults::default_engine_max_tool_rounds")]
    pub engine_max_tool_rounds: u32,
    /// System prompt handed to the reasoning engine.
    #[ortho_config(default = defaults::default_system_prompt())]
    #[serde(default = "defaults::default_system_prompt")]
    pub system_prompt: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen_endpoint(),
            chat_path: defaults::default_chat_path(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            capability_list_method: defaults::default_list_method(),
            capability_call_method: defaults::default_call_method(),
            early_work: default_early_work(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            engine_model: defaults::default_engine_model(),
            engine_api_key: None,
            engine_base_url: defaults::default_engine_base_url(),
            engine_max_tokens: DEFAULT_ENGINE_MAX_TOKENS,
            engine_max_tool_rounds: DEFAULT_ENGINE_MAX_TOOL_ROUNDS,
            system_prompt: defaults::default_system_prompt(),
        }
    }
}

impl Config {
    /// Address the WebSocket listener binds to.
    #[must_use]
    pub const fn listen(&self) -> &ListenEndpoint {
        &self.listen
    }

    /// Route upgraded to a WebSocket, always starting with `/`.
    #[must_use]
    pub fn chat_path(&self) -> String {
        if self.chat_path.starts_with('/') {
            self.chat_path.clone()
        } else {
            format!("/{}", self.chat_path)
        }
    }

    /// Deadline applied to each correlated request.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Method name used to list capabilities.
    #[must_use]
    pub fn capability_list_method(&self) -> &str {
        self.capability_list_method.as_str()
    }

    /// Method name used to invoke a capability.
    #[must_use]
    pub fn capability_call_method(&self) -> &str {
        self.capability_call_method.as_str()
    }

    /// Treatment of work items that arrive before discovery completes.
    #[must_use]
    pub const fn early_work(&self) -> EarlyWorkPolicy {
        self.early_work
    }

    /// `tracing` filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }
}
