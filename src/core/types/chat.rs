//! Chat request type and builders

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::message::{ChatMessage, MessageContent, MessageRole};
use super::tools::{ResponseFormat, Tool, ToolChoice};
use crate::core::error::{GatewayError, Result};

/// Chat completion request in the gateway's canonical form
///
/// All upstream dialects are translated to and from this shape, so a
/// request that round-trips through the wire keeps every recognized field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Target model identifier
    pub model: String,
    /// Ordered conversation messages
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature (0.0 - 2.0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Nucleus sampling parameter (0.0 - 1.0]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Maximum number of tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Stop sequences; the wire accepts a single string or an array
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "de_stop_sequences"
    )]
    pub stop: Option<Vec<String>>,
    /// Presence penalty (-2.0 - 2.0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    /// Frequency penalty (-2.0 - 2.0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    /// Seed value for reproducible generation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    /// Tool list
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    /// Tool selection policy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    /// Response format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    /// Enable streaming
    #[serde(default)]
    pub stream: bool,
    /// Opaque end-user tag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Metadata map, passed through untouched
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ChatRequest {
    /// Create a new chat request for the given model.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    /// Append a message.
    pub fn add_message(mut self, role: MessageRole, content: impl Into<MessageContent>) -> Self {
        self.messages.push(ChatMessage {
            role,
            content: Some(content.into()),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        });
        self
    }

    /// Append a system message.
    pub fn add_system_message(self, content: impl Into<String>) -> Self {
        self.add_message(MessageRole::System, MessageContent::Text(content.into()))
    }

    /// Append a user message.
    pub fn add_user_message(self, content: impl Into<String>) -> Self {
        self.add_message(MessageRole::User, MessageContent::Text(content.into()))
    }

    /// Append an assistant message.
    pub fn add_assistant_message(self, content: impl Into<String>) -> Self {
        self.add_message(MessageRole::Assistant, MessageContent::Text(content.into()))
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_streaming(mut self) -> Self {
        self.stream = true;
        self
    }

    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// First user message flattened to text, used as the routing prompt.
    pub fn first_user_prompt(&self) -> Option<String> {
        self.messages
            .iter()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.text_content())
    }

    /// Validate the request before any provider call.
    ///
    /// Empty messages and out-of-range decoding parameters are rejected
    /// locally so they never reach an upstream.
    pub fn validate(&self) -> Result<()> {
        if self.model.is_empty() {
            return Err(GatewayError::invalid_request("model must not be empty"));
        }
        if self.messages.is_empty() {
            return Err(GatewayError::invalid_request("messages must not be empty"));
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(GatewayError::invalid_request(format!(
                    "temperature must be in [0, 2], got {t}"
                )));
            }
        }
        if let Some(p) = self.top_p {
            if p <= 0.0 || p > 1.0 {
                return Err(GatewayError::invalid_request(format!(
                    "top_p must be in (0, 1], got {p}"
                )));
            }
        }
        if let Some(m) = self.max_tokens {
            if m < 1 {
                return Err(GatewayError::invalid_request("max_tokens must be >= 1"));
            }
        }
        Ok(())
    }

    /// Estimate input token count (~4 characters per token, plus per-message
    /// structure overhead). Used when an upstream omits usage figures.
    pub fn estimate_input_tokens(&self) -> u32 {
        let mut total = 0;
        for message in &self.messages {
            total += 4;
            if let Some(content) = &message.content {
                total += (content.as_text().len() as f64 / 4.0).ceil() as u32;
            }
        }
        total
    }
}

fn de_stop_sequences<'de, D>(deserializer: D) -> std::result::Result<Option<Vec<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StopSequences {
        One(String),
        Many(Vec<String>),
    }

    Ok(Option::<StopSequences>::deserialize(deserializer)?.map(|s| match s {
        StopSequences::One(stop) => vec![stop],
        StopSequences::Many(stops) => stops,
    }))
}
