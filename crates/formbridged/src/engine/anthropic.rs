//! Tool-calling engine backed by the Anthropic Messages API.
//!
//! The session's capability proxies are advertised as tools. Whenever the
//! model stops to use tools, each `tool_use` block is run through the
//! matching proxy and answered with a `tool_result` block, until the model
//! ends its turn or the round limit is reached.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use thiserror::Error;
use tracing::{debug, warn};

use formbridge_config::Config;
use formbridge_session::{CapabilitySet, EngineError, ReasoningEngine, render_output};

use super::wire::{ChatMessage, ContentBlock, MessagesRequest, MessagesResponse, ToolSpec};

const ENGINE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::engine");
const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
const API_VERSION: &str = "2023-06-01";
const OVERLOADED: u16 = 529;
const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Errors raised while building an engine from configuration.
#[derive(Debug, Error)]
pub enum EngineConfigError {
    /// Neither the configuration nor the environment carries an API key.
    #[error("no API key configured; set engine_api_key or ANTHROPIC_API_KEY")]
    MissingApiKey,
    /// The configured base URL does not parse.
    #[error("invalid engine base URL '{url}': {source}")]
    BaseUrl {
        /// The rejected URL.
        url: String,
        /// Parser error.
        #[source]
        source: url::ParseError,
    },
}

/// Connection and prompting parameters for [`AnthropicEngine`].
#[derive(Clone)]
pub struct AnthropicSettings {
    api_key: String,
    endpoint: Url,
    model: String,
    max_tokens: u32,
    max_tool_rounds: u32,
    system_prompt: String,
}

impl AnthropicSettings {
    /// Reads settings from the configuration, falling back to the
    /// `ANTHROPIC_API_KEY` environment variable for the key.
    pub fn from_config(config: &Config) -> Result<Self, EngineConfigError> {
        Self::from_config_with(config, |key| std::env::var(key).ok())
    }

    /// Like [`from_config`](Self::from_config) with an explicit environment
    /// lookup.
    pub fn from_config_with(
        config: &Config,
        lookup_env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, EngineConfigError> {
        let api_key = config
            .engine_api_key
            .clone()
            .filter(|key| !key.is_empty())
            .or_else(|| lookup_env(API_KEY_ENV).filter(|key| !key.is_empty()))
            .ok_or(EngineConfigError::MissingApiKey)?;
        let endpoint = Url::parse(&config.engine_base_url)
            .and_then(|base| base.join("v1/messages"))
            .map_err(|source| EngineConfigError::BaseUrl {
                url: config.engine_base_url.clone(),
                source,
            })?;
        Ok(Self {
            api_key,
            endpoint,
            model: config.engine_model.clone(),
            max_tokens: config.engine_max_tokens,
            max_tool_rounds: config.engine_max_tool_rounds.max(1),
            system_prompt: config.system_prompt.clone(),
        })
    }

    /// The Messages API URL requests are posted to.
    #[must_use]
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl fmt::Debug for AnthropicSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnthropicSettings")
            .field("api_key", &"<redacted>")
            .field("endpoint", &self.endpoint.as_str())
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("max_tool_rounds", &self.max_tool_rounds)
            .finish_non_exhaustive()
    }
}

/// [`ReasoningEngine`] that drives a Claude model through tool use.
#[derive(Debug, Clone)]
pub struct AnthropicEngine {
    client: Client,
    settings: AnthropicSettings,
}

impl AnthropicEngine {
    /// Creates an engine with a fresh HTTP client.
    #[must_use]
    pub fn new(settings: AnthropicSettings) -> Self {
        Self {
            client: Client::new(),
            settings,
        }
    }

    async fn complete(&self, request: &MessagesRequest<'_>) -> Result<MessagesResponse, EngineError> {
        let mut backoff = INITIAL_BACKOFF;
        let mut attempt = 1;
        loop {
            let response = self
                .client
                .post(self.settings.endpoint.clone())
                .header("x-api-key", &self.settings.api_key)
                .header("anthropic-version", API_VERSION)
                .json(request)
                .send()
                .await
                .map_err(|error| EngineError::with_source("Messages API request failed", error))?;

            let status = response.status();
            if status.as_u16() == OVERLOADED && attempt < MAX_ATTEMPTS {
                warn!(target: ENGINE_TARGET, attempt, ?backoff, "Messages API overloaded; retrying");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                attempt += 1;
                continue;
            }
            if !status.is_success() {
                return Err(api_failure(status, response.text().await.unwrap_or_default()));
            }

            return response.json().await.map_err(|error| {
                EngineError::with_source("Messages API returned an unreadable body", error)
            });
        }
    }
}

fn api_failure(status: StatusCode, body: String) -> EngineError {
    EngineError::new(format!("Messages API returned {status}: {body}"))
}

#[async_trait]
impl ReasoningEngine for AnthropicEngine {
    async fn respond(&self, tools: &CapabilitySet, input: &str) -> Result<String, EngineError> {
        let specs: Vec<ToolSpec> = tools.iter().map(ToolSpec::from).collect();
        let mut messages = vec![ChatMessage::user(vec![ContentBlock::text(input)])];

        for round in 1..=self.settings.max_tool_rounds {
            let request = MessagesRequest {
                model: &self.settings.model,
                max_tokens: self.settings.max_tokens,
                system: &self.settings.system_prompt,
                messages: &messages,
                tools: &specs,
            };
            let response = self.complete(&request).await?;

            let wants_tools = response.stop_reason.as_deref() == Some("tool_use")
                && response
                    .content
                    .iter()
                    .any(|block| matches!(block, ContentBlock::ToolUse { .. }));
            if !wants_tools {
                return Ok(collect_text(&response.content));
            }

            debug!(target: ENGINE_TARGET, round, "running requested tools");
            let results = run_tools(tools, &response.content).await;
            let echoed: Vec<ContentBlock> = response
                .content
                .into_iter()
                .filter(|block| !matches!(block, ContentBlock::Unsupported))
                .collect();
            messages.push(ChatMessage::assistant(echoed));
            messages.push(ChatMessage::user(results));
        }

        Err(EngineError::new(format!(
            "no final answer after {} tool rounds",
            self.settings.max_tool_rounds
        )))
    }
}

fn collect_text(content: &[ContentBlock]) -> String {
    content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("")
}

async fn run_tools(tools: &CapabilitySet, content: &[ContentBlock]) -> Vec<ContentBlock> {
    let mut results = Vec::new();
    for block in content {
        let ContentBlock::ToolUse { id, name, input } = block else {
            continue;
        };
        let outcome = match tools.get(name) {
            Some(proxy) => proxy.call(input.clone()).await,
            None => Err(format!("Error calling {name}: unknown capability")),
        };
        let (content, is_error) = match outcome {
            Ok(value) => (render_output(&value), false),
            Err(message) => (message, true),
        };
        results.push(ContentBlock::ToolResult {
            tool_use_id: id.clone(),
            content,
            is_error,
        });
    }
    results
}
