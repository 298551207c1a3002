use crate::endpoint::ListenEndpoint;
use crate::modes::{EarlyWorkPolicy, LogFormat};

/// Default TCP port for the WebSocket listener.
pub const DEFAULT_PORT: u16 = 8000;

/// Default host the listener binds to.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default route upgraded to a WebSocket.
pub const DEFAULT_CHAT_PATH: &str = "/chat";

/// Default deadline for one correlated request, in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

/// Default method used to list the peer's capabilities.
pub const DEFAULT_LIST_METHOD: &str = "list";

/// Default method used to invoke one of the peer's capabilities.
pub const DEFAULT_CALL_METHOD: &str = "call";

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default model requested from the reasoning engine.
pub const DEFAULT_ENGINE_MODEL: &str = "claude-sonnet-4-20250514";

/// Default base URL of the reasoning engine API.
pub const DEFAULT_ENGINE_BASE_URL: &str = "https://api.anthropic.com";

/// Default completion budget per engine round.
pub const DEFAULT_ENGINE_MAX_TOKENS: u32 = 1024;

/// Default upper bound on tool-use rounds within one work item.
pub const DEFAULT_ENGINE_MAX_TOOL_ROUNDS: u32 = 8;

/// Default system prompt handed to the reasoning engine.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful form-filling assistant.";

/// Default log filter expression used by the binaries.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binaries.
#[must_use]
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Default listen endpoint.
#[must_use]
pub fn default_listen_endpoint() -> ListenEndpoint {
    ListenEndpoint::new(DEFAULT_HOST, DEFAULT_PORT)
}

/// Default early work policy.
#[must_use]
pub fn default_early_work() -> EarlyWorkPolicy {
    EarlyWorkPolicy::Reject
}

pub(crate) fn default_chat_path() -> String {
    DEFAULT_CHAT_PATH.to_owned()
}

pub(crate) const fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

pub(crate) fn default_list_method() -> String {
    DEFAULT_LIST_METHOD.to_owned()
}

pub(crate) fn default_call_method() -> String {
    DEFAULT_CALL_METHOD.to_owned()
}

pub(crate) fn default_engine_model() -> String {
    DEFAULT_ENGINE_MODEL.to_owned()
}

pub(crate) fn default_engine_base_url() -> String {
    DEFAULT_ENGINE_BASE_URL.to_owned()
}

pub(crate) const fn default_engine_max_tokens() -> u32 {
    DEFAULT_ENGINE_MAX_TOKENS
}

pub(crate) const fn default_engine_max_tool_rounds() -> u32 {
    DEFAULT_ENGINE_MAX_TOOL_ROUNDS
}

pub(crate) fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_owned()
}
