//! Chat response and streaming chunk types

use serde::{Deserialize, Serialize};

use super::message::{ChatDelta, ChatMessage, MessageContent};
use super::tools::ToolCall;

/// Reason a choice stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural stop or stop sequence hit
    Stop,
    /// Token limit reached
    Length,
    /// The model emitted tool calls
    ToolCalls,
    /// Content was filtered by the upstream
    ContentFilter,
    /// The upstream reported an error mid-generation
    Error,
}

impl FinishReason {
    /// Parse the common upstream spellings.
    pub fn parse(reason: &str) -> Option<Self> {
        match reason {
            "stop" | "end_turn" | "stop_sequence" => Some(FinishReason::Stop),
            "length" | "max_tokens" => Some(FinishReason::Length),
            "tool_calls" | "tool_use" | "function_call" => Some(FinishReason::ToolCalls),
            "content_filter" => Some(FinishReason::ContentFilter),
            "error" => Some(FinishReason::Error),
            _ => None,
        }
    }
}

/// Token usage statistics
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Merge usage from a later stage into an accumulated total.
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Chat completion response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Stable response ID
    pub id: String,
    /// Object type
    pub object: String,
    /// Creation timestamp (unix seconds)
    pub created: i64,
    /// Model actually used
    pub model: String,
    /// Choice list
    pub choices: Vec<ChatChoice>,
    /// Usage statistics
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// One response choice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: u32,
    /// Assistant message
    pub message: ChatMessage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

impl ChatResponse {
    /// Build a single-choice assistant response.
    pub fn assistant(model: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            choices: vec![ChatChoice {
                index: 0,
                message: super::message::assistant_message(content),
                finish_reason: Some(FinishReason::Stop),
            }],
            ..Default::default()
        }
    }

    /// First choice content as text.
    pub fn first_content(&self) -> Option<String> {
        self.choices.first().and_then(|choice| {
            choice.message.content.as_ref().map(|c| match c {
                MessageContent::Text(text) => text.clone(),
                parts => parts.as_text(),
            })
        })
    }

    pub fn first_finish_reason(&self) -> Option<FinishReason> {
        self.choices.first().and_then(|c| c.finish_reason)
    }

    pub fn has_tool_calls(&self) -> bool {
        self.choices
            .iter()
            .any(|choice| choice.message.tool_calls.is_some())
    }

    pub fn first_tool_calls(&self) -> Option<&[ToolCall]> {
        self.choices
            .first()
            .and_then(|choice| choice.message.tool_calls.as_deref())
    }

    pub fn total_tokens(&self) -> u32 {
        self.usage.map(|u| u.total_tokens).unwrap_or(0)
    }
}

impl Default for ChatResponse {
    fn default() -> Self {
        Self {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            object: "chat.completion".to_string(),
            created: chrono::Utc::now().timestamp(),
            model: String::new(),
            choices: Vec::new(),
            usage: None,
        }
    }
}

/// Streaming chat chunk
///
/// Chunks for a single response share an `id` and arrive strictly in the
/// order delivered by the upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatStreamChoice>,
    /// Final usage, usually only on the last chunk
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Streaming choice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatStreamChoice {
    pub index: u32,
    pub delta: ChatDelta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

impl ChatChunk {
    /// A chunk carrying a finish reason terminates its stream.
    pub fn is_terminal(&self) -> bool {
        self.choices.iter().any(|c| c.finish_reason.is_some())
    }

    pub fn first_delta_content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.delta.content.as_deref())
    }
}
