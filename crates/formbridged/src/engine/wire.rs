//! Request and response shapes of the Anthropic Messages API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use formbridge_session::CapabilityProxy;

#[derive(Debug, Serialize)]
pub(super) struct MessagesRequest<'a> {
    pub(super) model: &'a str,
    pub(super) max_tokens: u32,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub(super) system: &'a str,
    pub(super) messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    pub(super) tools: &'a [ToolSpec],
}

#[derive(Debug, Deserialize)]
pub(super) struct MessagesResponse {
    pub(super) content: Vec<ContentBlock>,
    #[serde(default)]
    pub(super) stop_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub(super) struct ChatMessage {
    pub(super) role: Role,
    pub(super) content: Vec<ContentBlock>,
}

impl ChatMessage {
    pub(super) fn user(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content,
        }
    }

    pub(super) fn assistant(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub(super) enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(super) enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
    /// Block kinds this engine neither produces nor echoes back.
    #[serde(other)]
    Unsupported,
}

impl ContentBlock {
    pub(super) fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

#[derive(Debug, Clone, Serialize)]
pub(super) struct ToolSpec {
    name: String,
    description: String,
    input_schema: Value,
}

impl From<&CapabilityProxy> for ToolSpec {
    fn from(proxy: &CapabilityProxy) -> Self {
        let descriptor = proxy.descriptor();
        Self {
            name: descriptor.name().to_owned(),
            description: descriptor.description().to_owned(),
            input_schema: descriptor
                .input_schema()
                .cloned()
                .unwrap_or_else(|| serde_json::json!({ "type": "object" })),
        }
    }
}
