//! Canonical request-path types
//!
//! All upstream dialects and both downstream dialects translate to and
//! from these shapes.

pub mod chat;
pub mod context;
pub mod message;
pub mod model;
pub mod responses;
pub mod tools;

pub use chat::ChatRequest;
pub use context::RequestContext;
pub use message::{
    ChatDelta, ChatMessage, ContentPart, ImageUrl, MessageContent, MessageRole, assistant_message,
    system_message, user_message,
};
pub use model::{CostModel, Currency, ModelInfo, ProviderFeature};
pub use responses::{ChatChoice, ChatChunk, ChatResponse, ChatStreamChoice, FinishReason, Usage};
pub use tools::{
    FunctionCall, FunctionCallDelta, FunctionDefinition, NamedFunction, ResponseFormat, Tool,
    ToolCall, ToolCallDelta, ToolChoice,
};
